//! hubsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging for the hubsync workspace.
//!
//! # Overview
//!
//! - **Types**: raw CRM records, property bags, object kinds and dead-letter entries
//! - **Error Handling**: the workspace-wide error and result types
//! - **Logging**: `tracing` subscriber setup for every binary
//!
//! # Example
//!
//! ```no_run
//! use hubsync_common::types::{ObjectKind, RawRecord};
//!
//! let record: RawRecord = serde_json::from_str(r#"{"id":"1","properties":{}}"#).unwrap();
//! assert_eq!(record.key().map(|k| k.to_string()), Some("1".to_string()));
//! assert_eq!("deals".parse::<ObjectKind>().unwrap(), ObjectKind::Deals);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{HubsyncError, Result};
pub use types::{DeadLetterEntry, ObjectKind, PropertyMap, RawRecord, RecordKey};
