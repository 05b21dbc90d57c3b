//! Bounded retries with linear backoff over single delivery attempts.

use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::attempt::{FailureReason, RelayOutcome, RelaySender};
use super::event::{AnalyticsEvent, TransformError};
use super::throttle::Throttle;
use crate::config::RelayConfig;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("event not built: {0}")]
    Transform(#[from] TransformError),

    #[error("event for '{url}' rejected by {target} on attempt {attempt}: {reason}")]
    Rejected {
        url: String,
        target: Url,
        attempt: u32,
        reason: FailureReason,
    },

    #[error("event for '{url}' not delivered to {target} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        target: Url,
        attempts: u32,
        last: FailureReason,
    },

    #[error("outbound throttle closed")]
    ThrottleClosed,

    #[error("could not build collection client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Drives delivery of one event: attempt, classify, back off, try again.
///
/// Every attempt runs while holding a [`Throttle`] slot; the slot is released
/// before the backoff sleep so waiting retries do not starve other relays.
#[derive(Clone)]
pub struct RetryController {
    sender: Arc<dyn RelaySender>,
    throttle: Throttle,
    target: Url,
    max_attempts: u32,
    backoff_unit: Duration,
}

impl RetryController {
    pub fn new(config: &RelayConfig, sender: Arc<dyn RelaySender>, throttle: Throttle) -> Self {
        Self {
            sender,
            throttle,
            target: config.collection_url.clone(),
            max_attempts: config.retries.max(1),
            backoff_unit: config.backoff_unit,
        }
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// Delay before `attempt` (1-based). The first attempt starts immediately.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.backoff_unit * attempt
        }
    }

    /// Deliver `event`, returning the number of attempts it took.
    pub async fn deliver(
        &self,
        event: &AnalyticsEvent,
        user_agent: &str,
    ) -> Result<u32, RelayError> {
        let url = &event.payload.url;
        let mut attempt = 1;

        loop {
            let outcome = {
                let _permit = self
                    .throttle
                    .acquire()
                    .await
                    .map_err(|_| RelayError::ThrottleClosed)?;
                self.sender.send(event, user_agent).await
            };

            let reason = match outcome {
                RelayOutcome::Success => {
                    debug!(url = %url, attempt, "Event delivered");
                    return Ok(attempt);
                }
                RelayOutcome::TerminalFailure(reason) => {
                    return Err(RelayError::Rejected {
                        url: url.clone(),
                        target: self.target.clone(),
                        attempt,
                        reason,
                    });
                }
                RelayOutcome::RetryableFailure(reason) => reason,
            };

            if attempt >= self.max_attempts {
                return Err(RelayError::RetriesExhausted {
                    url: url.clone(),
                    target: self.target.clone(),
                    attempts: attempt,
                    last: reason,
                });
            }

            attempt += 1;
            let delay = self.backoff_for(attempt);
            warn!(
                url = %url,
                error = %reason,
                "Retrying event in {:?} (attempt {}/{})",
                delay,
                attempt,
                self.max_attempts
            );
            tokio::time::sleep(delay).await;
        }
    }
}
