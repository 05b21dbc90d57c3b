//! Analytics events in the shape the collection endpoint expects.

use serde::Serialize;
use thiserror::Error;

use super::request::IncomingRequestView;
use crate::config::RelayConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("missing ip header '{0}'")]
    MissingIp(String),
    #[error("missing user agent")]
    MissingUserAgent,
}

/// `{ "type": "event", "payload": { ... } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventPayload {
    pub website: String,
    pub hostname: String,
    pub url: String,
    pub referrer: String,
    #[serde(rename = "user-agent")]
    pub user_agent: String,
    pub ip: String,
}

impl AnalyticsEvent {
    /// Build the event for a mirrored request.
    ///
    /// Fails when the client IP or the user agent is missing or blank; the
    /// referrer may be empty.
    pub fn build(
        config: &RelayConfig,
        request: &IncomingRequestView,
    ) -> Result<Self, TransformError> {
        let trimmed = |value: &Option<String>| {
            value.as_deref().map(str::trim).unwrap_or("").to_string()
        };

        let ip = trimmed(&request.client_ip);
        if ip.is_empty() {
            return Err(TransformError::MissingIp(config.ip_header.clone()));
        }

        let user_agent = trimmed(&request.user_agent);
        if user_agent.is_empty() {
            return Err(TransformError::MissingUserAgent);
        }

        Ok(AnalyticsEvent {
            kind: EventKind::Event,
            payload: EventPayload {
                website: config.website_id.clone(),
                hostname: request.host.clone().unwrap_or_default(),
                url: request.url.clone(),
                referrer: trimmed(&request.referrer),
                user_agent,
                ip,
            },
        })
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
