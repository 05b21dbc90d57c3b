use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::relay::{Relay, RelayTasks};

use super::handlers::{accept_mirrored_request, IngressState};

/// Every method and path is accepted; the answer is always `200 OK`.
pub fn create_ingress_router(relay: Arc<Relay>, tasks: RelayTasks) -> Router {
    let state = Arc::new(IngressState { relay, tasks });

    Router::new()
        .fallback(accept_mirrored_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
