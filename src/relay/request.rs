use axum::http::{header, HeaderMap, Uri};

/// The parts of a mirrored request the relay engine needs.
///
/// Header values are kept as received (untrimmed). Bytes that are not valid
/// UTF-8 are replaced rather than discarding the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingRequestView {
    /// Request path, used for extension extraction
    pub path: String,
    /// Value of the configured real-client-IP header
    pub client_ip: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub host: Option<String>,
    /// Request target as received (path and query, or absolute form)
    pub url: String,
}

impl IncomingRequestView {
    /// Capture a view of an inbound request, reading the client IP from `ip_header`.
    pub fn from_parts(uri: &Uri, headers: &HeaderMap, ip_header: &str) -> Self {
        let value = |name: &str| {
            headers
                .get(name)
                .map(|h| String::from_utf8_lossy(h.as_bytes()).into_owned())
        };

        let host = value(header::HOST.as_str())
            .or_else(|| uri.authority().map(|a| a.to_string()));

        Self {
            path: uri.path().to_string(),
            client_ip: value(ip_header),
            referrer: value(header::REFERER.as_str()).or_else(|| value("referrer")),
            user_agent: value(header::USER_AGENT.as_str()),
            host,
            url: uri.to_string(),
        }
    }
}
