//! A single delivery attempt to the collection endpoint.

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use reqwest::{Client, Url};
use std::fmt;
use tracing::debug;

use super::event::AnalyticsEvent;
use crate::config::RelayConfig;

/// Upper bound on how much of an error response body is kept for diagnostics.
const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;

/// Why an attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Connection refused, DNS, TLS, timeout or a broken body
    Transport(String),
    /// The endpoint answered with something other than 200
    Status { status: u16, body: String },
    /// The event could not be encoded
    Encode(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(e) => write!(f, "transport error: {e}"),
            FailureReason::Status { status, body } => {
                write!(f, "request failed with status {status}: {body}")
            }
            FailureReason::Encode(e) => write!(f, "could not encode event: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Success,
    RetryableFailure(FailureReason),
    TerminalFailure(FailureReason),
}

impl RelayOutcome {
    /// Classify a response status.
    ///
    /// Only 200 is success. 4xx is terminal; any other status (1xx, other
    /// 2xx, 3xx, 5xx) is worth another attempt.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::OK {
            return RelayOutcome::Success;
        }

        let code = status.as_u16();
        let reason = FailureReason::Status { status: code, body };
        if code < 400 || code >= 500 {
            RelayOutcome::RetryableFailure(reason)
        } else {
            RelayOutcome::TerminalFailure(reason)
        }
    }
}

/// Performs one outbound call for an event.
#[async_trait]
pub trait RelaySender: Send + Sync {
    /// Send `event`, identifying as `user_agent`, and classify the result.
    async fn send(&self, event: &AnalyticsEvent, user_agent: &str) -> RelayOutcome;
}

/// HTTP client for the collection endpoint.
#[derive(Clone)]
pub struct CollectorClient {
    client: Client,
    url: Url,
}

impl CollectorClient {
    pub fn new(config: &RelayConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.ignore_tls)
            .build()?;

        Ok(Self {
            client,
            url: config.collection_url.clone(),
        })
    }
}

#[async_trait]
impl RelaySender for CollectorClient {
    async fn send(&self, event: &AnalyticsEvent, user_agent: &str) -> RelayOutcome {
        let body = match event.to_json() {
            Ok(body) => body,
            Err(e) => return RelayOutcome::TerminalFailure(FailureReason::Encode(e.to_string())),
        };

        debug!(payload = %String::from_utf8_lossy(&body), "Sending event to collection endpoint");

        let response = self
            .client
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, user_agent)
            .body(body)
            .send()
            .await;

        let mut response = match response {
            Ok(response) => response,
            Err(e) => {
                return RelayOutcome::RetryableFailure(FailureReason::Transport(e.to_string()))
            }
        };

        let status = response.status();
        if status == StatusCode::OK {
            return RelayOutcome::Success;
        }

        let body = match read_bounded(&mut response, MAX_ERROR_BODY_BYTES).await {
            Ok(body) => body,
            Err(e) => format!("<unreadable body: {e}>"),
        };
        RelayOutcome::from_status(status, body)
    }
}

/// Read at most `limit` bytes of the response body as lossy UTF-8.
async fn read_bounded(
    response: &mut reqwest::Response,
    limit: usize,
) -> Result<String, reqwest::Error> {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match response.chunk().await? {
            Some(chunk) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            None => break,
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
