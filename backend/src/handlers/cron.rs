//! Cron endpoints, authenticated by the shared `CRON_SECRET` instead of a session

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::auth::CronCaller;
use crate::jobs::scheduler::JobExecutionLog;
use crate::jobs::{PendingSweepReport, SyncSweepReport};
use crate::{ApiError, ApiResult, AppState};

pub fn cron_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/run-due-syncs", post(run_due_syncs))
        .route("/process-pending", post(process_pending))
        .route("/job-logs", get(job_logs))
}

async fn run_due_syncs(State(state): State<Arc<AppState>>, _caller: CronCaller) -> ApiResult<Json<SyncSweepReport>> {
    let report = state
        .sweeps
        .run_directory_sync()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(report))
}

async fn process_pending(
    State(state): State<Arc<AppState>>,
    _caller: CronCaller,
) -> ApiResult<Json<PendingSweepReport>> {
    let report = state
        .sweeps
        .run_pending_events()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(report))
}

async fn job_logs(State(state): State<Arc<AppState>>, _caller: CronCaller) -> Json<Vec<JobExecutionLog>> {
    Json(state.sweeps.execution_logs().await)
}
