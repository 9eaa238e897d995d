//! Dead-letter routing
//!
//! Records that fail normalization are wrapped in a [`DeadLetterEntry`] and
//! handed to a background worker that writes them to a [`DeadLetterSink`].
//! Routing never blocks the stream and never fails it: sink errors are
//! logged and counted. Entries are written once and never replayed.

use async_trait::async_trait;
use hubsync_common::{DeadLetterEntry, ObjectKind, RawRecord};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{DeadLetterError, NormalizationError};

/// Destination for dead-letter entries
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn write(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError>;
}

/// Collects entries in memory
#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn write(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

/// Appends one JSON document per entry to a file
pub struct JsonLinesDeadLetterSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonLinesDeadLetterSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DeadLetterError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

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
impl DeadLetterSink for JsonLinesDeadLetterSink {
    async fn write(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Outcome of a router's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeadLetterStats {
    pub routed: usize,
    pub written: usize,
    pub failed: usize,
}

/// Fire-and-forget hand-off from the normalizing flow to a dead-letter sink
pub struct DeadLetterRouter {
    sender: Mutex<Option<mpsc::UnboundedSender<DeadLetterEntry>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<(usize, usize)>>>,
    routed: AtomicUsize,
}

impl DeadLetterRouter {
    /// Start the background writer. Must be called inside a Tokio runtime.
    pub fn new(sink: Arc<dyn DeadLetterSink>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<DeadLetterEntry>();

        let worker = tokio::spawn(async move {
            let mut written = 0usize;
            let mut failed = 0usize;
            while let Some(entry) = receiver.recv().await {
                match sink.write(&entry).await {
                    Ok(()) => {
                        written += 1;
                        debug!(record_id = %entry.original_record.id, kind = %entry.object_kind, "Dead letter written");
                    },
                    Err(e) => {
                        failed += 1;
                        error!(
                            record_id = %entry.original_record.id,
                            kind = %entry.object_kind,
                            error = %e,
                            "Failed to write dead letter"
                        );
                    },
                }
            }
            (written, failed)
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            routed: AtomicUsize::new(0),
        }
    }

    /// Queue a failed record for the dead-letter sink. Never blocks or fails.
    pub fn route(&self, record: RawRecord, kind: ObjectKind, reason: &NormalizationError) {
        let entry = DeadLetterEntry::new(record, kind, reason.to_string());
        let record_id = entry.original_record.id.clone();

        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref().map(|s| s.send(entry)) {
            Some(Ok(())) => {
                self.routed.fetch_add(1, Ordering::Relaxed);
                warn!(record_id = %record_id, kind = %kind, reason = %reason, "Record dead-lettered");
            },
            _ => {
                error!(record_id = %record_id, kind = %kind, "Dead-letter router is closed, entry dropped");
            },
        }
    }

    /// Entries accepted by `route` so far
    pub fn routed(&self) -> usize {
        self.routed.load(Ordering::Relaxed)
    }

    /// Stop accepting entries and wait until every queued entry is written
    pub async fn close(&self) -> DeadLetterStats {
        drop(self.sender.lock().unwrap_or_else(PoisonError::into_inner).take());

        let mut stats = DeadLetterStats {
            routed: self.routed(),
            ..DeadLetterStats::default()
        };

        if let Some(worker) = self.worker.lock().await.take() {
            match worker.await {
                Ok((written, failed)) => {
                    stats.written = written;
                    stats.failed = failed;
                },
                Err(e) => error!(error = %e, "Dead-letter worker panicked"),
            }
        }

        stats
    }
}
