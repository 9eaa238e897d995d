//! hubsync ingest library
//!
//! Streams CRM objects out of HubSpot and into a downstream ingestion sink.
//!
//! # Components
//!
//! - [`rate_limit`]: token bucket shared by every request of a connector
//! - [`pager`]: cursor pagination with retry and exponential backoff
//! - [`connector`]: connect/disconnect lifecycle and lazy per-kind record streams
//! - [`normalize`]: raw records to typed records
//! - [`dead_letter`]: routing of records that fail normalization
//! - [`sync`]: the sync driver state machine
//! - [`trigger`]: manual, single-flight sync runs by workflow name
//! - `store` (feature `database`): Postgres raw store
//!
//! # Example
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use hubsync_ingest::{Connector, ConnectorConfig, StreamOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connector = Connector::initialize(ConnectorConfig::from_env()?)?;
//!     let session = connector.session().await?;
//!
//!     let mut deals = session.stream_deals(StreamOptions::new().max_records(10))?;
//!     while let Some(deal) = deals.try_next().await? {
//!         println!("{} {:?}", deal.id, deal.properties.get("dealname"));
//!     }
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod connector;
pub mod dead_letter;
pub mod error;
pub mod normalize;
pub mod pager;
pub mod rate_limit;
pub mod sink;
#[cfg(feature = "database")]
pub mod store;
pub mod sync;
pub mod trigger;

pub use config::{ConnectorConfig, SyncConfig};
pub use connector::{Connector, RecordStream, Session, StreamOptions};
pub use dead_letter::{DeadLetterRouter, DeadLetterSink, JsonLinesDeadLetterSink, MemoryDeadLetterSink};
pub use error::{ApiError, ConnectorError, ForwardingError, NormalizationError};
pub use normalize::{normalize, NormalizedRecord};
pub use rate_limit::RateLimiter;
pub use sink::{IngestRecord, IngestionSink, JsonLinesSink, MemorySink};
pub use sync::{SyncDriver, SyncReport, SyncState};
pub use trigger::{SyncTrigger, TriggerResponse, TriggerStatus, Workflow};
