use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::Instrument;

use crate::relay::{IncomingRequestView, Relay, RelayTasks};

pub struct IngressState {
    pub relay: Arc<Relay>,
    pub tasks: RelayTasks,
}

/// Acknowledge a mirrored request and relay it in the background.
///
/// The response never waits for, nor reports, the relay outcome.
pub async fn accept_mirrored_request(
    State(state): State<Arc<IngressState>>,
    uri: Uri,
    headers: HeaderMap,
) -> impl IntoResponse {
    let request = IncomingRequestView::from_parts(&uri, &headers, &state.relay.config().ip_header);

    let relay = Arc::clone(&state.relay);
    let span = tracing::info_span!("relay", url = %request.url);
    state.tasks.spawn(
        async move {
            relay.relay(request).await;
        }
        .instrument(span),
    );

    (StatusCode::OK, "OK")
}
