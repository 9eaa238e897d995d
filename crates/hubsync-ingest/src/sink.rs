//! Ingestion boundary
//!
//! Normalized records leave the connector through an [`IngestionSink`]. Each
//! write is keyed by [`RecordKey`], and sinks must tolerate the same key
//! arriving more than once (delivery is at-least-once).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hubsync_common::{ObjectKind, RawRecord, RecordKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::ForwardingError;
use crate::normalize::NormalizedRecord;

/// One write to the ingestion boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRecord {
    pub key: RecordKey,
    pub kind: ObjectKind,
    /// Present values only; blank and null properties are dropped
    pub properties: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived: bool,
    pub normalized: NormalizedRecord,
}

impl IngestRecord {
    /// Pair a raw record with its normalized form.
    ///
    /// The key comes from the normalized record, whose id is never empty.
    pub fn new(kind: ObjectKind, raw: &RawRecord, normalized: NormalizedRecord) -> Self {
        Self {
            key: RecordKey {
                id: normalized.id().to_string(),
                object_type: raw.object_type.clone(),
            },
            kind,
            properties: raw.properties.compacted(),
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            archived: raw.archived,
            normalized,
        }
    }
}

/// Destination for normalized records
#[async_trait]
pub trait IngestionSink: Send + Sync {
    async fn write(&self, record: &IngestRecord) -> Result<(), ForwardingError>;
}

// ============================================================================
// In-memory Sink
// ============================================================================

type FailurePredicate = Box<dyn Fn(&IngestRecord) -> bool + Send + Sync>;

/// Keeps the latest write per key in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<RecordKey, IngestRecord>>,
    writes: AtomicUsize,
    fail_when: Option<FailurePredicate>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every record for which `predicate` holds
    pub fn failing_when<F>(predicate: F) -> Self
    where
        F: Fn(&IngestRecord) -> bool + Send + Sync + 'static,
    {
        Self {
            fail_when: Some(Box::new(predicate)),
            ..Self::default()
        }
    }

    /// Stored records in key order
    pub fn records(&self) -> Vec<IngestRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accepted writes, duplicates included
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl IngestionSink for MemorySink {
    async fn write(&self, record: &IngestRecord) -> Result<(), ForwardingError> {
        if self.fail_when.as_ref().is_some_and(|fail| fail(record)) {
            return Err(ForwardingError::new(record.key.to_string(), "rejected by sink"));
        }

        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.key.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// JSON Lines Sink
// ============================================================================

/// Appends one JSON document per record to a file
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), "Opened JSON lines sink");

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IngestionSink for JsonLinesSink {
    async fn write(&self, record: &IngestRecord) -> Result<(), ForwardingError> {
        let key = record.key.to_string();
        let mut line =
            serde_json::to_vec(record).map_err(|e| ForwardingError::new(key.as_str(), e.to_string()))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| ForwardingError::new(key.as_str(), e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ForwardingError::new(key.as_str(), e.to_string()))
    }
}
