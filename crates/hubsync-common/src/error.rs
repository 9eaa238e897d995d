//! Error types shared across hubsync crates

use thiserror::Error;

/// Result type alias for hubsync operations
pub type Result<T> = std::result::Result<T, HubsyncError>;

/// Errors that are not specific to one component
#[derive(Error, Debug)]
pub enum HubsyncError {
    #[error("Parse error: {0}")]
    Parse(String),
}

impl HubsyncError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
