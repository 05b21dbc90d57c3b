//! End-to-end relay tests
//!
//! Mirrored requests go through the ingress router and the HTTP relay to a
//! real collection endpoint served by axum on a random local port.

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    routing::post,
    Router,
};
use beacon::config::RelayConfig;
use beacon::ingress::create_ingress_router;
use beacon::relay::{
    Disposition, FailureReason, IncomingRequestView, Relay, RelayError, RelayTasks,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower::ServiceExt;

/// One call received by the fake collection endpoint
#[derive(Clone, Debug)]
struct ReceivedCall {
    at: Instant,
    user_agent: Option<String>,
    content_type: Option<String>,
    body: Value,
}

/// Scripted response; the last entry repeats once the script runs out.
#[derive(Clone)]
struct Reply {
    status: StatusCode,
    body: String,
    delay: Duration,
}

impl Reply {
    fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: String::new(),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Collector {
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<ReceivedCall>>,
}

impl Collector {
    fn calls(&self) -> Vec<ReceivedCall> {
        self.calls.lock().unwrap().clone()
    }
}

async fn collect(
    State(collector): State<Arc<Collector>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    collector.calls.lock().unwrap().push(ReceivedCall {
        at: Instant::now(),
        user_agent: header("user-agent"),
        content_type: header("content-type"),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let reply = {
        let mut script = collector.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or(Reply::status(StatusCode::OK))
        }
    };

    tokio::time::sleep(reply.delay).await;
    (reply.status, reply.body)
}

/// Start a collection endpoint and return it with its URL.
async fn start_collector(script: Vec<Reply>) -> (Arc<Collector>, String) {
    let collector = Arc::new(Collector {
        script: Mutex::new(script.into()),
        calls: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/api/send", post(collect))
        .with_state(Arc::clone(&collector));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (collector, format!("http://{addr}/api/send"))
}

fn relay_config(collection_url: &str) -> RelayConfig {
    let mut config = RelayConfig::new(
        "3f8e6a1c-0000-4000-8000-000000000001",
        collection_url.parse().unwrap(),
        "X-Real-IP",
    );
    config.ignore_media = true;
    config.backoff_unit = Duration::from_millis(50);
    config
}

fn page_view(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", "example.com")
        .header("user-agent", "UA1")
        .header("x-real-ip", "1.2.3.4")
        .body(Body::empty())
        .unwrap()
}

fn view(path: &str) -> IncomingRequestView {
    IncomingRequestView {
        path: path.to_string(),
        client_ip: Some("1.2.3.4".to_string()),
        user_agent: Some("UA1".to_string()),
        host: Some("example.com".to_string()),
        url: path.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_page_view_relayed_once() {
    let (collector, url) = start_collector(vec![Reply::status(StatusCode::OK)]).await;
    let relay = Arc::new(Relay::new(Arc::new(relay_config(&url))).unwrap());
    let tasks = RelayTasks::new();
    let app = create_ingress_router(relay, tasks.clone());

    let response = app.oneshot(page_view("/page")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");

    let report = tasks.shutdown(Duration::from_secs(10)).await;
    assert_eq!(report.abandoned, 0);

    let calls = collector.calls();
    assert_eq!(calls.len(), 1, "exactly one outbound call, no retries");

    let call = &calls[0];
    assert_eq!(call.user_agent.as_deref(), Some("UA1"));
    assert_eq!(call.content_type.as_deref(), Some("application/json"));
    assert_eq!(
        call.body,
        json!({
            "type": "event",
            "payload": {
                "website": "3f8e6a1c-0000-4000-8000-000000000001",
                "hostname": "example.com",
                "url": "/page",
                "referrer": "",
                "user-agent": "UA1",
                "ip": "1.2.3.4"
            }
        })
    );
}

#[tokio::test]
async fn test_unavailable_endpoint_retried_with_linear_backoff() {
    let (collector, url) = start_collector(vec![
        Reply::status(StatusCode::SERVICE_UNAVAILABLE),
        Reply::status(StatusCode::SERVICE_UNAVAILABLE),
        Reply::status(StatusCode::OK),
    ])
    .await;
    let config = relay_config(&url);
    let unit = config.backoff_unit;
    let relay = Relay::new(Arc::new(config)).unwrap();

    let disposition = relay.relay(view("/page")).await;
    assert!(matches!(disposition, Disposition::Delivered { attempts: 3 }));

    let calls = collector.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[1].at - calls[0].at >= unit * 2);
    assert!(calls[2].at - calls[1].at >= unit * 3);
    assert_eq!(relay.throttle().in_use(), 0);
}

#[tokio::test]
async fn test_media_request_not_relayed() {
    let (collector, url) = start_collector(vec![Reply::status(StatusCode::OK)]).await;
    let relay = Arc::new(Relay::new(Arc::new(relay_config(&url))).unwrap());
    let tasks = RelayTasks::new();
    let app = create_ingress_router(relay, tasks.clone());

    let response = app.oneshot(page_view("/logo.svg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tasks.shutdown(Duration::from_secs(10)).await;
    assert!(collector.calls().is_empty());
}

#[tokio::test]
async fn test_client_error_is_terminal() {
    let (collector, url) = start_collector(vec![Reply {
        status: StatusCode::BAD_REQUEST,
        body: "invalid website".to_string(),
        delay: Duration::ZERO,
    }])
    .await;
    let relay = Relay::new(Arc::new(relay_config(&url))).unwrap();

    let disposition = relay.relay(view("/page")).await;

    assert_eq!(collector.calls().len(), 1);
    match disposition {
        Disposition::Dropped(RelayError::Rejected { attempt, reason, .. }) => {
            assert_eq!(attempt, 1);
            assert_eq!(
                reason,
                FailureReason::Status {
                    status: 400,
                    body: "invalid website".to_string()
                }
            );
        }
        other => panic!("unexpected disposition: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let (collector, url) = start_collector(vec![Reply {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: "x".repeat(10_000),
        delay: Duration::ZERO,
    }])
    .await;
    let mut config = relay_config(&url);
    config.backoff_unit = Duration::from_millis(1);
    let relay = Relay::new(Arc::new(config)).unwrap();

    let disposition = relay.relay(view("/page")).await;

    assert_eq!(collector.calls().len(), 3);
    match disposition {
        Disposition::Dropped(RelayError::RetriesExhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 3);
            let FailureReason::Status { status, body } = last else {
                panic!("expected a status failure, got {last}");
            };
            assert_eq!(status, 500);
            assert_eq!(body.len(), 4096);
        }
        other => panic!("unexpected disposition: {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let (collector, url) = start_collector(vec![Reply {
        status: StatusCode::OK,
        body: String::new(),
        delay: Duration::from_secs(5),
    }])
    .await;
    let mut config = relay_config(&url);
    config.timeout = Duration::from_millis(200);
    config.retries = 2;
    config.backoff_unit = Duration::from_millis(1);
    let relay = Relay::new(Arc::new(config)).unwrap();

    let started = Instant::now();
    let disposition = relay.relay(view("/page")).await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(collector.calls().len(), 2);
    assert!(matches!(
        disposition,
        Disposition::Dropped(RelayError::RetriesExhausted {
            attempts: 2,
            last: FailureReason::Transport(_),
            ..
        })
    ));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_retryable() {
    // Reserve a port, then free it so nothing is listening there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = relay_config(&format!("http://{addr}/api/send"));
    config.backoff_unit = Duration::from_millis(1);
    let relay = Relay::new(Arc::new(config)).unwrap();

    let disposition = relay.relay(view("/page")).await;

    assert!(matches!(
        disposition,
        Disposition::Dropped(RelayError::RetriesExhausted {
            attempts: 3,
            last: FailureReason::Transport(_),
            ..
        })
    ));
    assert_eq!(relay.throttle().in_use(), 0);
}

#[tokio::test]
async fn test_concurrency_limit_against_real_endpoint() {
    let (collector, url) = start_collector(vec![Reply {
        status: StatusCode::OK,
        body: String::new(),
        delay: Duration::from_millis(100),
    }])
    .await;
    let mut config = relay_config(&url);
    config.max_concurrency = 2;
    let relay = Arc::new(Relay::new(Arc::new(config)).unwrap());
    let tasks = RelayTasks::new();

    for i in 0..6 {
        let relay = Arc::clone(&relay);
        tasks.spawn(async move {
            relay.relay(view(&format!("/p/{i}"))).await;
        });
    }

    // Sample the throttle while the relays run.
    let mut peak = 0;
    while tasks.in_flight() > 0 {
        peak = peak.max(relay.throttle().in_use());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tasks.shutdown(Duration::from_secs(10)).await;

    assert!(peak <= 2);
    assert_eq!(collector.calls().len(), 6);

    // With two slots and 100ms per call, six calls need at least three rounds.
    let calls = collector.calls();
    let first = calls.iter().map(|c| c.at).min().unwrap();
    let last = calls.iter().map(|c| c.at).max().unwrap();
    assert!(last - first >= Duration::from_millis(200));
}
