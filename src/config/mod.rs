mod denylist;

pub use denylist::{ExtensionDenylist, IpDenylist};

use axum::http::HeaderName;
use reqwest::Url;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),
    #[error("invalid {key} value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    /// How long in-flight relays may keep running once shutdown starts
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings shared read-only by every relay task.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Website identifier tagged onto every event
    pub website_id: String,
    /// Absolute collection endpoint, e.g. http://umami:3000/api/send
    pub collection_url: Url,
    /// Header on the mirrored request that carries the real client IP
    pub ip_header: String,
    /// Turn filtering on; active filtering always drops media and font files
    pub ignore_media: bool,
    pub ignored_extensions: ExtensionDenylist,
    pub ignored_ips: IpDenylist,
    /// Deadline for a single outbound call
    pub timeout: Duration,
    /// Maximum attempts per mirrored request
    pub retries: u32,
    /// Maximum simultaneous outbound calls
    pub max_concurrency: usize,
    /// Skip TLS certificate verification for the collection endpoint
    pub ignore_tls: bool,
    /// Attempt `n` waits `n * backoff_unit` before it starts
    pub backoff_unit: Duration,
}

impl RelayConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
    pub const DEFAULT_RETRIES: u32 = 3;
    pub const DEFAULT_MAX_CONCURRENCY: usize = 25;

    /// Build a config with every optional setting at its default.
    pub fn new(
        website_id: impl Into<String>,
        collection_url: Url,
        ip_header: impl Into<String>,
    ) -> Self {
        Self {
            website_id: website_id.into(),
            collection_url,
            ip_header: ip_header.into(),
            ignore_media: false,
            ignored_extensions: ExtensionDenylist::default(),
            ignored_ips: IpDenylist::default(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            retries: Self::DEFAULT_RETRIES,
            max_concurrency: Self::DEFAULT_MAX_CONCURRENCY,
            ignore_tls: false,
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// True when no filtering criterion is configured at all.
    pub fn skip_filtering(&self) -> bool {
        !self.ignore_media && self.ignored_extensions.is_empty() && self.ignored_ips.is_empty()
    }
}

impl fmt::Display for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "website id:        {}", self.website_id)?;
        writeln!(f, "collection url:    {}", self.collection_url)?;
        writeln!(f, "ip header:         {}", self.ip_header)?;
        writeln!(f, "ignore media:      {}", self.ignore_media)?;
        writeln!(f, "ignore extensions: {}", self.ignored_extensions)?;
        writeln!(f, "ignore ips:        {}", self.ignored_ips)?;
        writeln!(f, "timeout:           {}s", self.timeout.as_secs())?;
        writeln!(f, "retries:           {}", self.retries)?;
        writeln!(f, "max concurrency:   {}", self.max_concurrency)?;
        write!(f, "ignore tls:        {}", self.ignore_tls)
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let website_id = get("WEBSITE_ID").ok_or(ConfigError::Missing("WEBSITE_ID"))?;
        let raw_url = get("COLLECTION_URL").ok_or(ConfigError::Missing("COLLECTION_URL"))?;
        let collection_url = parse_collection_url(&raw_url)?;
        let ip_header = get("IP_HEADER").ok_or(ConfigError::Missing("IP_HEADER"))?;
        HeaderName::from_bytes(ip_header.as_bytes())
            .map_err(|e| invalid("IP_HEADER", &ip_header, e))?;

        let ignore_media = parse_bool("IGNORE_MEDIA", get("IGNORE_MEDIA"), false)?;
        let ignore_tls = parse_bool("HTTP_IGNORE_TLS", get("HTTP_IGNORE_TLS"), false)?;
        let timeout_secs = parse_positive(
            "HTTP_TIMEOUT",
            get("HTTP_TIMEOUT"),
            RelayConfig::DEFAULT_TIMEOUT_SECS,
        )?;
        let retries = parse_positive(
            "HTTP_RETRIES",
            get("HTTP_RETRIES"),
            RelayConfig::DEFAULT_RETRIES,
        )?;
        let max_concurrency = parse_positive(
            "HTTP_MAX_REQUESTS",
            get("HTTP_MAX_REQUESTS"),
            RelayConfig::DEFAULT_MAX_CONCURRENCY,
        )?;

        let ignored_extensions = get("IGNORE_EXT")
            .map(|raw| ExtensionDenylist::parse(&raw))
            .unwrap_or_default();
        let ignored_ips = get("IGNORE_IPS")
            .map(|raw| IpDenylist::parse(&raw))
            .unwrap_or_default();

        let host = get("LISTEN_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_positive("LISTEN_PORT", get("LISTEN_PORT"), 8080u16)?;
        let grace_secs = match get("SHUTDOWN_GRACE_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| invalid("SHUTDOWN_GRACE_SECS", &raw, e))?,
            None => 5,
        };

        let mut relay = RelayConfig::new(website_id, collection_url, ip_header);
        relay.ignore_media = ignore_media;
        relay.ignored_extensions = ignored_extensions;
        relay.ignored_ips = ignored_ips;
        relay.timeout = Duration::from_secs(timeout_secs);
        relay.retries = retries;
        relay.max_concurrency = max_concurrency;
        relay.ignore_tls = ignore_tls;

        Ok(Config {
            server: ServerConfig { host, port },
            relay,
            shutdown_grace: Duration::from_secs(grace_secs),
        })
    }
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_collection_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| invalid("COLLECTION_URL", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(
            "COLLECTION_URL",
            raw,
            format!("unsupported scheme '{other}'"),
        )),
    }
}

fn parse_bool(
    key: &'static str,
    value: Option<String>,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(default);
    };

    match raw.to_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Ok(true),
        "0" | "f" | "false" | "no" => Ok(false),
        _ => Err(invalid(key, &raw, "expected a boolean")),
    }
}

fn parse_positive<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: fmt::Display,
{
    let Some(raw) = value else {
        return Ok(default);
    };

    let parsed = raw.parse::<T>().map_err(|e| invalid(key, &raw, e))?;
    if parsed == T::default() {
        return Err(invalid(key, &raw, "cannot be 0"));
    }
    Ok(parsed)
}
