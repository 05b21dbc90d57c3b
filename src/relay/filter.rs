//! Decides whether a mirrored request is worth relaying.
//!
//! The decision is a pure function of the relay configuration and the
//! request view. Rejections are logged at debug level only.

use std::fmt;
use tracing::debug;

use super::request::IncomingRequestView;
use crate::config::RelayConfig;

/// Images, audio, video and web fonts. Requests for these are not page views.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".bmp", ".ico", ".tiff", ".tif", ".avif",
    ".mp4", ".webm", ".ogg", ".mov", ".avi", ".wmv", ".flv", ".mkv", ".m4v", ".mp3", ".wav",
    ".m4a", ".aac", ".flac", ".wma", ".opus", ".woff", ".woff2", ".ttf", ".otf", ".eot",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Forward,
    /// The client IP is on the configured denylist
    DeniedIp(String),
    /// The extension is on the configured denylist
    DeniedExtension(String),
    /// The extension belongs to a common media or font file
    MediaFile(String),
}

impl FilterDecision {
    pub fn is_forward(&self) -> bool {
        matches!(self, FilterDecision::Forward)
    }
}

impl fmt::Display for FilterDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterDecision::Forward => write!(f, "forward"),
            FilterDecision::DeniedIp(ip) => write!(f, "drop: IP {ip} is on the IP denylist"),
            FilterDecision::DeniedExtension(ext) => {
                write!(f, "drop: extension {ext} is on the extension denylist")
            }
            FilterDecision::MediaFile(ext) => write!(f, "drop: extension {ext} is a media file"),
        }
    }
}

/// Extract the lowercase, dot-prefixed extension of the last path segment.
///
/// Returns an empty string when the segment has no dot.
pub fn extension_of(path: &str) -> String {
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rfind('.') {
        Some(idx) => segment[idx..].to_lowercase(),
        None => String::new(),
    }
}

/// Classify a request, reporting why it would be dropped.
pub fn decide(config: &RelayConfig, request: &IncomingRequestView) -> FilterDecision {
    if config.skip_filtering() {
        return FilterDecision::Forward;
    }

    if let Some(ip) = request.client_ip.as_deref() {
        if config.ignored_ips.contains(ip) {
            return FilterDecision::DeniedIp(ip.trim().to_string());
        }
    }

    let extension = extension_of(&request.path);
    if extension.is_empty() {
        return FilterDecision::Forward;
    }

    if config.ignored_extensions.contains(&extension) {
        return FilterDecision::DeniedExtension(extension);
    }

    if MEDIA_EXTENSIONS.contains(&extension.as_str()) {
        return FilterDecision::MediaFile(extension);
    }

    FilterDecision::Forward
}

/// Returns true if the request should be relayed to the collection endpoint.
pub fn should_forward(config: &RelayConfig, request: &IncomingRequestView) -> bool {
    let decision = decide(config, request);
    if !decision.is_forward() {
        debug!(path = %request.path, "Skipping request ({decision})");
    }
    decision.is_forward()
}
