//! Error types for the connector, normalizer and sinks
//!
//! Failures fall into two groups. Connector-level errors ([`ConnectorError`])
//! abort the stream they occur in. Per-record errors ([`NormalizationError`],
//! [`ForwardingError`]) are counted and the stream moves on.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Failure of a single remote API call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Rate limited by remote API (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Remote server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Credentials rejected (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Request rejected (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the call may succeed if repeated after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. } | ApiError::Server { .. } | ApiError::Transport(_)
        )
    }

    /// Minimum delay requested by the server before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Connector-level failure; aborts the current stream or sync run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Credentials missing or rejected; never retried
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Transient failures outlasted the retry budget
    #[error("Remote API unavailable after {attempts} attempt(s): {message}")]
    RemoteUnavailable { attempts: u32, message: String },

    /// Non-retryable rejection that is not about credentials (bad request, undecodable body)
    #[error("Remote API rejected the request: {0}")]
    Rejected(String),

    /// Used before `connect` or after `disconnect`
    #[error("Connector is not connected. Call connect() first; a disconnected connector cannot be reused.")]
    NotConnected,

    #[error("Invalid connector configuration: {0}")]
    Config(String),
}

impl ConnectorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify a non-retryable API failure
    pub fn from_fatal(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { .. } => ConnectorError::AuthFailure(err.to_string()),
            other => ConnectorError::Rejected(other.to_string()),
        }
    }
}

/// A raw record could not be turned into a typed record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Record has no id")]
    MissingId,
}

/// The ingestion boundary refused or failed to store a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to forward record {key}: {message}")]
pub struct ForwardingError {
    pub key: String,
    pub message: String,
}

impl ForwardingError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Dead-letter sink failure; logged, never propagated into the stream
#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}
