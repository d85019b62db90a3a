//! Failure taxonomy shared by every component.
//!
//! The retry loop in the HTTP engine is driven by `is_retryable`, not by
//! downcasting transport errors: every outcome is classified once, at the
//! edge, into a retryable or terminal kind.

use std::fmt;

use thiserror::Error;

use crate::models::Venue;

/// Transport-level failure kinds surfaced by the HTTP engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Timeout,
    ConnectionReset,
    DnsFailure,
    Other,
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkKind::Timeout => f.write_str("timeout"),
            NetworkKind::ConnectionReset => f.write_str("connection_reset"),
            NetworkKind::DnsFailure => f.write_str("dns_failure"),
            NetworkKind::Other => f.write_str("other"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing API key for venue {0}")]
    MissingApiKey(Venue),

    #[error("network error: {0}")]
    Network(NetworkKind),

    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("no proxy available")]
    ProxyUnavailable,

    #[error("empty response body")]
    EmptyBody,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("run canceled")]
    Canceled,
}

impl ScrapeError {
    /// Whether the HTTP engine should retry the request that produced this.
    ///
    /// 429 maps to `RateLimited` during classification, so `Http` here only
    /// carries non-429 statuses: 5xx retry, everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Network(_) => true,
            ScrapeError::RateLimited => true,
            ScrapeError::Http { status } => (500..600).contains(status),
            _ => false,
        }
    }

    /// Classify a reqwest transport error. Status-bearing responses are
    /// classified separately via [`ScrapeError::from_status`].
    pub fn from_transport(err: &reqwest::Error) -> ScrapeError {
        if err.is_timeout() {
            return ScrapeError::Network(NetworkKind::Timeout);
        }
        if err.is_connect() {
            // reqwest folds DNS failures into connect errors; the message is
            // the only discriminator it exposes.
            let msg = err.to_string();
            if msg.contains("dns") || msg.contains("resolve") {
                return ScrapeError::Network(NetworkKind::DnsFailure);
            }
            return ScrapeError::Network(NetworkKind::ConnectionReset);
        }
        if err.is_request() || err.is_body() {
            return ScrapeError::Network(NetworkKind::ConnectionReset);
        }
        ScrapeError::Network(NetworkKind::Other)
    }

    pub fn from_status(status: u16) -> ScrapeError {
        if status == 429 {
            ScrapeError::RateLimited
        } else {
            ScrapeError::Http { status }
        }
    }

    pub fn from_io(err: std::io::Error) -> ScrapeError {
        ScrapeError::Persistence(err.to_string())
    }

    /// Terse machine-readable kind for summaries and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Config(_) => "config",
            ScrapeError::MissingApiKey(_) => "missing_api_key",
            ScrapeError::Network(_) => "network",
            ScrapeError::Http { .. } => "http",
            ScrapeError::RateLimited => "rate_limited",
            ScrapeError::ProxyUnavailable => "proxy_unavailable",
            ScrapeError::EmptyBody => "empty_body",
            ScrapeError::Parse(_) => "parse",
            ScrapeError::Validation(_) => "validation",
            ScrapeError::Persistence(_) => "persistence",
            ScrapeError::Canceled => "canceled",
        }
    }
}
