//! Error types for the curation pipeline.
//!
//! Each stage owns a small error enum. Most of these never escape the
//! pipeline: they are logged where they happen and folded into
//! [`RunStats`](crate::models::RunStats). Only configuration, source-list
//! and output errors reach `main`.

use thiserror::Error;

/// Errors raised while retrieving a feed or page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// Server answered with a non-2xx status.
    #[error("HTTP status {status} for {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// URL that produced it
        url: String,
    },

    /// Body could not be parsed as RSS/Atom.
    #[error("feed parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Request(e.to_string())
    }
}

/// Errors raised while loading configuration or the source list.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the run-state tracker.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("run-state IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unparseable run-state timestamp {0:?}")]
    Timestamp(String),
}

/// Errors raised by the article store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store record error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while generating a digest.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("digest request failed: {0}")]
    Request(String),

    #[error("digest endpoint returned status {0}")]
    Status(u16),

    #[error("digest response had no content")]
    EmptyResponse,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<reqwest::Error> for DigestError {
    fn from(e: reqwest::Error) -> Self {
        DigestError::Request(e.to_string())
    }
}
