// Run Recorder - durable per-workflow execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigflow_shared::{ActionResultRow, WorkflowRunRow};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::actions::{ActionResult, ActionStatus};
use super::events::LifecycleEvent;
use super::matcher::MatchedWorkflow;
use super::store::{RunStore, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }

    /// Aggregate over action results. A workflow with no actions has nothing that failed.
    pub fn aggregate(results: &[ActionResult]) -> Self {
        let completed = results.iter().filter(|r| r.status == ActionStatus::Completed).count();

        if completed == results.len() {
            Self::Completed
        } else if completed == 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized (or loaded) run with its ordered action results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: Uuid,
    pub event_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub organization_id: Uuid,
    pub workflow_organization_id: Uuid,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub action_results: Vec<ActionResult>,
}

impl WorkflowRun {
    pub fn from_rows(row: WorkflowRunRow, results: Vec<ActionResultRow>) -> StoreResult<Self> {
        let status = RunStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("run {} has unknown status '{}'", row.id, row.status)))?;
        let action_results = results
            .into_iter()
            .map(ActionResult::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Corrupt)?;

        Ok(Self {
            id: row.id,
            event_id: row.event_id,
            workflow_id: row.workflow_id,
            workflow_name: row.workflow_name,
            organization_id: row.organization_id,
            workflow_organization_id: row.workflow_organization_id,
            status,
            error: row.error,
            started_at: row.started_at,
            finished_at: row.finished_at,
            action_results,
        })
    }
}

/// An open run. Consumed by [`RunRecorder::finalize`] or [`RunRecorder::fail`], so a
/// run can only be closed once.
#[derive(Debug)]
pub struct RunHandle {
    run: WorkflowRunRow,
    results: Vec<ActionResult>,
}

pub struct RunRecorder {
    runs: Arc<dyn RunStore>,
}

impl RunRecorder {
    pub fn new(runs: Arc<dyn RunStore>) -> Self {
        Self { runs }
    }

    pub async fn begin_run(&self, event: &LifecycleEvent, workflow: &MatchedWorkflow) -> StoreResult<RunHandle> {
        let run = WorkflowRunRow {
            id: Uuid::new_v4(),
            event_id: event.id,
            workflow_id: workflow.workflow_id,
            workflow_name: workflow.name.clone(),
            organization_id: event.organization_id,
            workflow_organization_id: workflow.owner_organization_id,
            status: RunStatus::Running.as_str().to_string(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };

        self.runs.insert_run(&run).await?;
        debug!("Started run {} of workflow '{}' for event {}", run.id, run.workflow_name, event.id);

        Ok(RunHandle {
            run,
            results: Vec::new(),
        })
    }

    pub async fn record_action_result(&self, handle: &mut RunHandle, result: ActionResult) -> StoreResult<()> {
        let row = ActionResultRow {
            run_id: handle.run.id,
            position: handle.results.len() as i32,
            kind: result.kind.as_str().to_string(),
            status: result.status.as_str().to_string(),
            error: result.error.clone(),
            duration_ms: result.duration_ms,
            executed_at: result.executed_at,
        };

        self.runs.append_action_result(&row).await?;
        handle.results.push(result);
        Ok(())
    }

    /// Commit point: the terminal status is durable once this returns
    pub async fn finalize(&self, handle: RunHandle) -> StoreResult<WorkflowRun> {
        let status = RunStatus::aggregate(&handle.results);
        let error = summarize_failures(&handle.results);
        self.close(handle, status, error).await
    }

    /// Close a run that could not execute at all (e.g. an undecodable workflow)
    pub async fn fail(&self, handle: RunHandle, error: &str) -> StoreResult<WorkflowRun> {
        warn!("Run {} of workflow '{}' failed: {}", handle.run.id, handle.run.workflow_name, error);
        self.close(handle, RunStatus::Failed, Some(error.to_string())).await
    }

    async fn close(&self, handle: RunHandle, status: RunStatus, error: Option<String>) -> StoreResult<WorkflowRun> {
        let finished_at = Utc::now();
        self.runs
            .finalize_run(handle.run.id, status, error.as_deref(), finished_at)
            .await?;

        let RunHandle { run, results } = handle;
        Ok(WorkflowRun {
            id: run.id,
            event_id: run.event_id,
            workflow_id: run.workflow_id,
            workflow_name: run.workflow_name,
            organization_id: run.organization_id,
            workflow_organization_id: run.workflow_organization_id,
            status,
            error,
            started_at: run.started_at,
            finished_at: Some(finished_at),
            action_results: results,
        })
    }
}

fn summarize_failures(results: &[ActionResult]) -> Option<String> {
    let failures: Vec<String> = results
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.error.as_ref().map(|e| format!("action {} ({}): {}", i + 1, r.kind, e)))
        .collect();

    (!failures.is_empty()).then(|| failures.join("; "))
}
