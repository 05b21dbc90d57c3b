//! Relay engine
//!
//! Turns mirrored requests into analytics events and delivers them to the
//! collection endpoint: filter, build the event, then retry the delivery
//! under a bounded outbound concurrency limit.

pub mod attempt;
pub mod event;
pub mod filter;
pub mod request;
pub mod retry;
pub mod tasks;
pub mod throttle;

pub use attempt::{CollectorClient, FailureReason, RelayOutcome, RelaySender};
pub use event::{AnalyticsEvent, TransformError};
pub use filter::{should_forward, FilterDecision};
pub use request::IncomingRequestView;
pub use retry::{RelayError, RetryController};
pub use tasks::{RelayTasks, ShutdownReport};
pub use throttle::Throttle;

use std::sync::Arc;
use tracing::{error, warn};

use crate::config::RelayConfig;

/// Final state of one mirrored request.
#[derive(Debug)]
pub enum Disposition {
    /// Dropped by the request filter; nothing was sent
    Filtered,
    Delivered { attempts: u32 },
    /// Could not be delivered; the event is gone
    Dropped(RelayError),
}

pub struct Relay {
    config: Arc<RelayConfig>,
    controller: RetryController,
}

impl Relay {
    /// Build a relay that delivers over HTTP to the configured collection endpoint.
    pub fn new(config: Arc<RelayConfig>) -> Result<Self, RelayError> {
        let client = CollectorClient::new(&config)?;
        Ok(Self::with_sender(config, Arc::new(client)))
    }

    /// Build a relay around a custom sender.
    pub fn with_sender(config: Arc<RelayConfig>, sender: Arc<dyn RelaySender>) -> Self {
        let throttle = Throttle::new(config.max_concurrency);
        let controller = RetryController::new(&config, sender, throttle);
        Self { config, controller }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn throttle(&self) -> &Throttle {
        self.controller.throttle()
    }

    /// Filter, build and deliver the event for one mirrored request.
    ///
    /// Failures are logged here; the returned disposition is informational.
    pub async fn relay(&self, request: IncomingRequestView) -> Disposition {
        if !should_forward(&self.config, &request) {
            return Disposition::Filtered;
        }

        let event = match AnalyticsEvent::build(&self.config, &request) {
            Ok(event) => event,
            Err(e) => {
                warn!(url = %request.url, "Cannot relay request: {e}");
                return Disposition::Dropped(e.into());
            }
        };

        let user_agent = event.payload.user_agent.clone();
        match self.controller.deliver(&event, &user_agent).await {
            Ok(attempts) => Disposition::Delivered { attempts },
            Err(e) => {
                match &e {
                    RelayError::Rejected { .. } => warn!("{e}"),
                    _ => error!("{e}"),
                }
                Disposition::Dropped(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::config::IpDenylist;

    struct SlowSender {
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        fail: bool,
    }

    impl SlowSender {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl RelaySender for SlowSender {
        async fn send(&self, _event: &AnalyticsEvent, _user_agent: &str) -> RelayOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                RelayOutcome::RetryableFailure(FailureReason::Transport(
                    "connection refused".into(),
                ))
            } else {
                RelayOutcome::Success
            }
        }
    }

    fn config(max_concurrency: usize) -> RelayConfig {
        let mut config = RelayConfig::new(
            "site",
            "http://collector.test/api/send".parse().unwrap(),
            "x-real-ip",
        );
        config.max_concurrency = max_concurrency;
        config.retries = 2;
        config.backoff_unit = Duration::from_millis(1);
        config
    }

    fn request(path: &str) -> IncomingRequestView {
        IncomingRequestView {
            path: path.to_string(),
            client_ip: Some("1.2.3.4".to_string()),
            user_agent: Some("UA1".to_string()),
            host: Some("example.com".to_string()),
            url: path.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_relays_respect_limit() {
        for fail in [false, true] {
            let sender = SlowSender::new(fail);
            let relay = Arc::new(Relay::with_sender(Arc::new(config(3)), sender.clone()));

            let mut handles = Vec::new();
            for i in 0..20 {
                let relay = Arc::clone(&relay);
                handles.push(tokio::spawn(async move {
                    relay.relay(request(&format!("/p/{i}"))).await
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert!(sender.peak.load(Ordering::SeqCst) <= 3);
            assert_eq!(relay.throttle().in_use(), 0);
            let expected_calls = if fail { 40 } else { 20 };
            assert_eq!(sender.calls.load(Ordering::SeqCst), expected_calls);
        }
    }

    #[tokio::test]
    async fn test_filtered_request_makes_no_call() {
        let sender = SlowSender::new(false);
        let mut config = config(1);
        config.ignored_ips = IpDenylist::parse("1.2.3.4");
        let relay = Relay::with_sender(Arc::new(config), sender.clone());

        assert!(matches!(relay.relay(request("/page")).await, Disposition::Filtered));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transform_error_is_not_retried() {
        let sender = SlowSender::new(false);
        let relay = Relay::with_sender(Arc::new(config(1)), sender.clone());

        let mut req = request("/page");
        req.user_agent = None;

        assert!(matches!(
            relay.relay(req).await,
            Disposition::Dropped(RelayError::Transform(TransformError::MissingUserAgent))
        ));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delivered_reports_attempts() {
        let sender = SlowSender::new(false);
        let relay = Relay::with_sender(Arc::new(config(1)), sender);

        assert!(matches!(
            relay.relay(request("/page")).await,
            Disposition::Delivered { attempts: 1 }
        ));
    }
}
