//! Sync driver
//!
//! Runs one sync: connect, stream each requested object kind, normalize every
//! record, forward it to the ingestion sink or dead-letter it, disconnect.
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Disconnecting -> Completed
//!   \________\______________\_____________\________-> Failed
//! ```
//!
//! Kinds are streamed concurrently and share only the connector's rate
//! limiter. A connector-level failure (auth, exhausted retries, overall
//! timeout) aborts the whole run; per-record failures are counted and the
//! run carries on. The connection is held through a session guard, so the
//! disconnect happens on every exit path.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use futures::StreamExt;
use hubsync_common::ObjectKind;
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::connector::{Connector, StreamOptions};
use crate::dead_letter::{DeadLetterRouter, DeadLetterSink, DeadLetterStats};
use crate::error::{ConnectorError, Result};
use crate::normalize::normalize;
use crate::sink::{IngestRecord, IngestionSink};

/// Sync driver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Connecting,
    Streaming,
    Disconnecting,
    Completed,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Connecting => "connecting",
            SyncState::Streaming => "streaming",
            SyncState::Disconnecting => "disconnecting",
            SyncState::Completed => "completed",
            SyncState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Completed | SyncState::Failed)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one object kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSummary {
    pub kind: ObjectKind,
    /// Records pulled from the stream
    pub total: u64,
    /// Records accepted by the ingestion sink
    pub succeeded: u64,
    pub forwarding_failed: u64,
    pub dead_lettered: u64,
}

impl KindSummary {
    pub fn errors(&self) -> u64 {
        self.forwarding_failed + self.dead_lettered
    }
}

/// Live counters of one flow; readable after the flow was cancelled
#[derive(Debug)]
struct KindProgress {
    kind: ObjectKind,
    total: AtomicU64,
    succeeded: AtomicU64,
    forwarding_failed: AtomicU64,
    dead_lettered: AtomicU64,
}

impl KindProgress {
    fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            forwarding_failed: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> KindSummary {
        KindSummary {
            kind: self.kind,
            total: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            forwarding_failed: self.forwarding_failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one sync run, produced even when the run fails
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub state: SyncState,
    pub kinds: Vec<KindSummary>,
    pub dead_letters: DeadLetterStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub timed_out: bool,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ConnectorError>,
}

fn serialize_error<S: Serializer>(error: &Option<ConnectorError>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.state == SyncState::Completed
    }

    pub fn total(&self) -> u64 {
        self.kinds.iter().map(|k| k.total).sum()
    }

    pub fn succeeded(&self) -> u64 {
        self.kinds.iter().map(|k| k.succeeded).sum()
    }

    /// Forwarding failures plus dead letters
    pub fn errors(&self) -> u64 {
        self.kinds.iter().map(KindSummary::errors).sum()
    }

    pub fn kind(&self, kind: ObjectKind) -> Option<&KindSummary> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

/// Drives a single sync run over one connector.
///
/// A connector cannot reconnect after disconnecting, so a driver is good for
/// one run; later runs report `NotConnected`.
pub struct SyncDriver {
    connector: Connector,
    sink: Arc<dyn IngestionSink>,
    dead_letters: Arc<dyn DeadLetterSink>,
    options: StreamOptions,
    config: SyncConfig,
    state: Mutex<SyncState>,
}

impl SyncDriver {
    pub fn new(connector: Connector, sink: Arc<dyn IngestionSink>, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            connector,
            sink,
            dead_letters,
            options: StreamOptions::default(),
            config: SyncConfig::default(),
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Options applied to every kind's stream
    pub fn with_stream_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    fn transition(&self, next: SyncState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        debug!(from = %previous, to = %next, "Sync state transition");
        *state = next;
    }

    /// Sync the given kinds and report what happened
    #[instrument(skip_all, fields(kinds = ?kinds))]
    pub async fn run(&self, kinds: &[ObjectKind]) -> SyncReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Starting sync run");

        let progress: Vec<KindProgress> = kinds.iter().copied().map(KindProgress::new).collect();
        let router = DeadLetterRouter::new(self.dead_letters.clone());

        let mut timed_out = false;
        let outcome = match self.config.run_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run_flows(&progress, &router)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    timed_out = true;
                    // Dropping the flows dropped the session, which disconnected
                    Err(ConnectorError::RemoteUnavailable {
                        attempts: 0,
                        message: format!("sync run exceeded its {}s deadline", limit.as_secs_f64()),
                    })
                },
            },
            None => self.run_flows(&progress, &router).await,
        };

        let dead_letters = router.close().await;
        let state = match &outcome {
            Ok(()) => SyncState::Completed,
            Err(_) => SyncState::Failed,
        };
        self.transition(state);

        let report = SyncReport {
            state,
            kinds: progress.iter().map(KindProgress::snapshot).collect(),
            dead_letters,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            timed_out,
            error: outcome.err(),
        };

        match &report.error {
            None => info!(
                total = report.total(),
                succeeded = report.succeeded(),
                errors = report.errors(),
                duration_ms = report.duration_ms,
                "Sync run completed"
            ),
            Some(e) => error!(
                total = report.total(),
                succeeded = report.succeeded(),
                errors = report.errors(),
                timed_out = timed_out,
                error = %e,
                "Sync run failed"
            ),
        }

        report
    }

    async fn run_flows(&self, progress: &[KindProgress], router: &DeadLetterRouter) -> Result<()> {
        self.transition(SyncState::Connecting);
        let session = self.connector.session().await?;

        self.transition(SyncState::Streaming);
        let result = try_join_all(progress.iter().map(|p| self.run_kind(p, router))).await;

        self.transition(SyncState::Disconnecting);
        drop(session);

        result.map(|_| ())
    }

    #[instrument(skip(self, progress, router), fields(kind = %progress.kind))]
    async fn run_kind(&self, progress: &KindProgress, router: &DeadLetterRouter) -> Result<()> {
        let kind = progress.kind;
        let mut stream = self.connector.stream(kind, self.options.clone())?;

        while let Some(item) = stream.next().await {
            let raw = item?;
            progress.total.fetch_add(1, Ordering::Relaxed);

            let normalized = match normalize(kind, &raw) {
                Ok(normalized) => normalized,
                Err(e) => {
                    progress.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    router.route(raw, kind, &e);
                    continue;
                },
            };

            let record = IngestRecord::new(kind, &raw, normalized);

            match self.sink.write(&record).await {
                Ok(()) => {
                    progress.succeeded.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) => {
                    progress.forwarding_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(record_id = %record.key, error = %e, "Failed to forward record");
                },
            }
        }

        let summary = progress.snapshot();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            forwarding_failed = summary.forwarding_failed,
            dead_lettered = summary.dead_lettered,
            "Finished streaming kind"
        );
        Ok(())
    }
}
