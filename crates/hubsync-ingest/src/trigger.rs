//! Manual sync trigger
//!
//! Operational entry point for starting sync runs by workflow name. A
//! workflow is either `full-sync` (every object kind) or the name of a single
//! kind. At most one run per workflow name is active at a time unless the
//! caller forces another.

use chrono::{DateTime, Utc};
use hubsync_common::ObjectKind;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ConnectorError, Result};
use crate::sync::{SyncDriver, SyncReport};

/// Workflow run when none is named
pub const FULL_SYNC_WORKFLOW: &str = "full-sync";

/// What a trigger run syncs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    FullSync,
    Kind(ObjectKind),
}

impl Workflow {
    /// Resolve a workflow name; `None` means a full sync
    pub fn parse(name: Option<&str>) -> Result<Self> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            None => Ok(Workflow::FullSync),
            Some(n) if n.eq_ignore_ascii_case(FULL_SYNC_WORKFLOW) => Ok(Workflow::FullSync),
            Some(n) => n
                .parse::<ObjectKind>()
                .map(Workflow::Kind)
                .map_err(|_| ConnectorError::config(format!("Unknown workflow: {}", n))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Workflow::FullSync => FULL_SYNC_WORKFLOW,
            Workflow::Kind(kind) => kind.as_str(),
        }
    }

    pub fn kinds(&self) -> Vec<ObjectKind> {
        match self {
            Workflow::FullSync => ObjectKind::ALL.to_vec(),
            Workflow::Kind(kind) => vec![*kind],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStatus {
    Started,
    Completed,
    Failed,
    Timeout,
}

/// Result of a trigger call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    pub status: TriggerStatus,
    pub execution_id: Uuid,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
}

impl TriggerResponse {
    fn rejected(execution_id: Uuid, workflow: impl Into<String>, started_at: DateTime<Utc>, error: String) -> Self {
        Self {
            success: false,
            status: TriggerStatus::Failed,
            execution_id,
            workflow: workflow.into(),
            started_at,
            completed_at: Some(Utc::now()),
            error: Some(error),
            report: None,
        }
    }

    fn from_report(execution_id: Uuid, workflow: &str, started_at: DateTime<Utc>, report: SyncReport) -> Self {
        let status = if report.is_success() {
            TriggerStatus::Completed
        } else if report.timed_out {
            TriggerStatus::Timeout
        } else {
            TriggerStatus::Failed
        };

        Self {
            success: report.is_success(),
            status,
            execution_id,
            workflow: workflow.to_string(),
            started_at,
            completed_at: Some(report.finished_at),
            error: report.error.as_ref().map(ToString::to_string),
            report: Some(report),
        }
    }
}

/// Builds a fresh driver for every run
pub type DriverFactory = Arc<dyn Fn() -> Result<SyncDriver> + Send + Sync>;

type RunningSet = Arc<Mutex<HashMap<String, usize>>>;

/// Held for the lifetime of a run; releases the workflow slot on drop
struct RunSlot {
    running: RunningSet,
    workflow: String,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = running.get_mut(&self.workflow) {
            *count -= 1;
            if *count == 0 {
                running.remove(&self.workflow);
            }
        }
    }
}

/// Starts sync runs on demand
#[derive(Clone)]
pub struct SyncTrigger {
    factory: DriverFactory,
    running: RunningSet,
}

impl SyncTrigger {
    pub fn new(factory: DriverFactory) -> Self {
        Self {
            factory,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether a run of `workflow` is in progress
    pub fn is_running(&self, workflow: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(workflow)
    }

    /// Run a workflow to completion
    pub async fn run_sync(&self, workflow: Option<&str>, force: bool) -> TriggerResponse {
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();

        let (workflow, slot) = match self.admit(workflow, force) {
            Ok(admitted) => admitted,
            Err((name, e)) => return TriggerResponse::rejected(execution_id, name, started_at, e),
        };

        self.execute(workflow, slot, execution_id, started_at).await
    }

    /// Start a workflow in the background.
    ///
    /// Returns `started` and a handle to the final response, or `failed` and
    /// no handle when the run could not be admitted.
    pub fn spawn_sync(
        &self,
        workflow: Option<&str>,
        force: bool,
    ) -> (TriggerResponse, Option<JoinHandle<TriggerResponse>>) {
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();

        let (workflow, slot) = match self.admit(workflow, force) {
            Ok(admitted) => admitted,
            Err((name, e)) => return (TriggerResponse::rejected(execution_id, name, started_at, e), None),
        };

        let trigger = self.clone();
        let handle = tokio::spawn(async move { trigger.execute(workflow, slot, execution_id, started_at).await });

        let response = TriggerResponse {
            success: true,
            status: TriggerStatus::Started,
            execution_id,
            workflow: workflow.name().to_string(),
            started_at,
            completed_at: None,
            error: None,
            report: None,
        };
        (response, Some(handle))
    }

    fn admit(
        &self,
        workflow: Option<&str>,
        force: bool,
    ) -> std::result::Result<(Workflow, RunSlot), (String, String)> {
        let requested = workflow.unwrap_or(FULL_SYNC_WORKFLOW).to_string();
        let workflow = Workflow::parse(workflow).map_err(|e| (requested, e.to_string()))?;
        let name = workflow.name().to_string();

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let active = running.get(&name).copied().unwrap_or(0);
        if active > 0 && !force {
            warn!(workflow = %name, "Workflow already running, rejecting trigger");
            return Err((name.clone(), format!("Workflow {} is already running; pass force to run it anyway", name)));
        }
        if active > 0 {
            warn!(workflow = %name, "Workflow already running, forcing another run");
        }
        running.insert(name.clone(), active + 1);

        Ok((
            workflow,
            RunSlot {
                running: self.running.clone(),
                workflow: name,
            },
        ))
    }

    async fn execute(
        &self,
        workflow: Workflow,
        slot: RunSlot,
        execution_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> TriggerResponse {
        let _slot = slot;
        info!(workflow = workflow.name(), execution_id = %execution_id, "Sync triggered");

        let driver = match (self.factory)() {
            Ok(driver) => driver,
            Err(e) => {
                warn!(workflow = workflow.name(), error = %e, "Could not build sync driver");
                return TriggerResponse::rejected(execution_id, workflow.name(), started_at, e.to_string());
            },
        };

        let report = driver.run(&workflow.kinds()).await;
        let response = TriggerResponse::from_report(execution_id, workflow.name(), started_at, report);
        info!(
            workflow = workflow.name(),
            execution_id = %execution_id,
            status = ?response.status,
            "Sync trigger finished"
        );
        response
    }
}
