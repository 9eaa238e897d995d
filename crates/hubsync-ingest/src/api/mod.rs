//! Remote CRM API transport
//!
//! [`CrmApi`] is the seam between the connector core and the network. The
//! pager only ever talks to this trait, which keeps retry, rate limiting and
//! pagination independent of HTTP details and lets tests script responses.

pub mod hubspot;

use async_trait::async_trait;
use hubsync_common::RawRecord;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub use hubspot::HubSpotApi;

/// Opaque pagination continuation token returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One list call against an object type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Remote object type, e.g. `deals` or `calls`
    pub object_type: String,
    pub after: Option<Cursor>,
    pub limit: u32,
    pub properties: Vec<String>,
    pub archived: bool,
}

/// Records from one list call plus the cursor for the next one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiPage {
    pub records: Vec<RawRecord>,
    /// `None` when this was the last page
    pub next_cursor: Option<Cursor>,
}

/// Operations the connector needs from the remote CRM
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Cheap authenticated call used as a liveness and credentials check
    async fn ping(&self) -> Result<(), ApiError>;

    /// Fetch one page of records
    async fn list_page(&self, request: &PageRequest) -> Result<ApiPage, ApiError>;
}
