// Job Scheduler - cron-driven lifecycle sweeps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use super::{DirectorySyncJob, PendingEventsJob, PendingSweepReport, SyncSweepReport};
use crate::config::LifecycleConfig;
use crate::lifecycle::store::StoreError;

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: usize,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Completed,
    Failed,
    PartialFailure,
}

pub const DIRECTORY_SYNC: &str = "Directory Sync";
pub const PENDING_EVENTS: &str = "Pending Events";

/// Runs the lifecycle sweeps and keeps an in-memory execution log. Shared by the cron
/// scheduler and the cron HTTP endpoints.
#[derive(Clone)]
pub struct SweepRunner {
    sync_job: Arc<DirectorySyncJob>,
    pending_job: Arc<PendingEventsJob>,
    cancel: CancellationToken,
    logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl SweepRunner {
    pub fn new(sync_job: Arc<DirectorySyncJob>, pending_job: Arc<PendingEventsJob>, cancel: CancellationToken) -> Self {
        Self {
            sync_job,
            pending_job,
            cancel,
            logs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn run_directory_sync(&self) -> JobResult<SyncSweepReport> {
        let started_at = Utc::now();
        info!("Running {} job", DIRECTORY_SYNC);

        let outcome = self.sync_job.run(&self.cancel).await;
        let summary = outcome.as_ref().ok().map(|report| {
            let mut errors: Vec<String> = report.results.iter().flat_map(|r| r.errors.clone()).collect();
            if report.cancelled {
                errors.push("sweep cancelled".to_string());
            }
            (report.results.len(), errors)
        });

        self.record(DIRECTORY_SYNC, started_at, summary, outcome.as_ref().err()).await;
        Ok(outcome?)
    }

    pub async fn run_pending_events(&self) -> JobResult<PendingSweepReport> {
        let started_at = Utc::now();
        info!("Running {} job", PENDING_EVENTS);

        let outcome = self.pending_job.run(&self.cancel).await;
        let summary = outcome
            .as_ref()
            .ok()
            .map(|report| (report.examined, report.errors.clone()));

        self.record(PENDING_EVENTS, started_at, summary, outcome.as_ref().err()).await;
        Ok(outcome?)
    }

    pub async fn execution_logs(&self) -> Vec<JobExecutionLog> {
        self.logs.read().await.clone()
    }

    async fn record(
        &self,
        job_name: &str,
        started_at: DateTime<Utc>,
        summary: Option<(usize, Vec<String>)>,
        failure: Option<&StoreError>,
    ) {
        let completed_at = Utc::now();
        let (status, items_processed, errors) = match (summary, failure) {
            (Some((items, errors)), _) => {
                let status = if errors.is_empty() { JobStatus::Completed } else { JobStatus::PartialFailure };
                (status, items, errors)
            }
            (None, failure) => {
                let message = failure.map(|e| e.to_string()).unwrap_or_default();
                error!("{} job failed: {}", job_name, message);
                (JobStatus::Failed, 0, vec![message])
            }
        };

        let mut logs = self.logs.write().await;
        logs.push(JobExecutionLog {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            started_at,
            completed_at: Some(completed_at),
            status,
            items_processed,
            errors,
            duration_ms: Some((completed_at - started_at).num_milliseconds()),
        });
        // Keep only the most recent logs
        if logs.len() > MAX_EXECUTION_LOGS {
            logs.remove(0);
        }
    }
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    runner: SweepRunner,
    config: LifecycleConfig,
}

impl JobScheduler {
    pub async fn new(runner: SweepRunner, config: LifecycleConfig) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            runner,
            config,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting lifecycle job scheduler");

        self.schedule_directory_sync().await?;
        self.schedule_pending_events().await?;

        self.scheduler.start().await?;

        info!("Lifecycle job scheduler started");
        Ok(())
    }

    /// Cancel in-flight sweeps (between items) and stop the scheduler
    pub async fn shutdown(&self) -> JobResult<()> {
        info!("Shutting down lifecycle job scheduler");
        self.runner.cancel_token().cancel();
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_directory_sync(&self) -> JobResult<()> {
        let cron_expr = self.config.sync_sweep_cron.as_str();
        let runner = self.runner.clone();

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                // Failures are logged and kept in the execution log
                let _ = runner.run_directory_sync().await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled {} job with cron '{}'", DIRECTORY_SYNC, cron_expr);

        Ok(())
    }

    async fn schedule_pending_events(&self) -> JobResult<()> {
        let cron_expr = self.config.pending_sweep_cron.as_str();
        let runner = self.runner.clone();

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                let _ = runner.run_pending_events().await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled {} job with cron '{}'", PENDING_EVENTS, cron_expr);

        Ok(())
    }
}
