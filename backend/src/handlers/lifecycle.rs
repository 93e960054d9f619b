//! Lifecycle automation API
//!
//! Events, workflows and run history for the caller's organization. Every route requires the
//! `workflow_automation` feature; mutations, tests and reprocessing require an admin.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sigflow_shared::WorkflowRow;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::lifecycle::capabilities::{Capabilities, Feature};
use crate::lifecycle::events::{EventSource, LifecycleEvent, NewLifecycleEvent};
use crate::lifecycle::processor::ProcessingReport;
use crate::lifecycle::recorder::WorkflowRun;
use crate::lifecycle::store::RunListEntry;
use crate::lifecycle::triggers::{Ingested, TestRunOutcome};
use crate::lifecycle::workflow::{ValidatedWorkflow, WorkflowInput};
use crate::{ApiError, ApiResult, AppError, AppState, PaginatedResponse, PaginationParams};

pub fn lifecycle_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route("/events/:id", get(get_event))
        .route("/events/:id/reprocess", post(reprocess_event))
        .route("/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/workflows/:id",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/workflows/:id/test", post(test_workflow))
        .route("/runs", get(list_runs))
        .route("/runs/:id", get(get_run))
}

// ==================== Request/response types ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListQuery {
    pub event_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub user_id: Option<Uuid>,
    pub event_type: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestWorkflowRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: LifecycleEvent,
    pub runs: Vec<WorkflowRun>,
}

// ==================== Gates ====================

async fn require_automation(state: &AppState, auth: &AuthUser) -> ApiResult<Capabilities> {
    let capabilities = Capabilities::load(state.stores.features.as_ref(), auth.organization_id()).await?;
    if !capabilities.allows(Feature::WorkflowAutomation) {
        return Err(AppError::FeatureNotAvailable {
            feature: Feature::WorkflowAutomation.to_string(),
        });
    }
    Ok(capabilities)
}

async fn validate_input(
    state: &AppState,
    auth: &AuthUser,
    capabilities: &Capabilities,
    input: WorkflowInput,
) -> ApiResult<ValidatedWorkflow> {
    let organization = state
        .stores
        .directory
        .get_organization(auth.organization_id())
        .await?
        .ok_or_else(|| ApiError::internal("Caller organization is missing"))?;

    let workflow = input.validate(capabilities, &organization)?;

    for template_id in workflow.email_template_ids() {
        let exists = state
            .stores
            .workflows
            .get_email_template(organization.id, template_id)
            .await?
            .is_some();
        if !exists {
            return Err(ApiError::validation_single(
                "actions",
                format!("Email template {} not found", template_id),
            ));
        }
    }

    Ok(workflow)
}

async fn load_runs(state: &AppState, event_id: Uuid) -> ApiResult<Vec<WorkflowRun>> {
    let mut runs = Vec::new();
    for row in state.stores.runs.runs_for_event(event_id).await? {
        let results = state.stores.runs.action_results(row.id).await?;
        runs.push(WorkflowRun::from_rows(row, results)?);
    }
    Ok(runs)
}

// ==================== Events ====================

async fn list_events(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<EventListQuery>,
) -> ApiResult<Json<PaginatedResponse<LifecycleEvent>>> {
    require_automation(&state, &auth).await?;

    let params = PaginationParams {
        limit: query.limit,
        offset: query.offset,
    };
    let event_type = query.event_type.as_deref().map(str::trim).filter(|t| !t.is_empty());

    let (events, total) = state
        .stores
        .events
        .list_events(auth.organization_id(), event_type, params.limit(), params.offset())
        .await?;

    Ok(Json(PaginatedResponse::new(events, &params, total)))
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EventDetail>> {
    require_automation(&state, &auth).await?;

    let event = state
        .stores
        .events
        .get_event(id)
        .await?
        .filter(|e| e.organization_id == auth.organization_id())
        .ok_or_else(|| ApiError::not_found("Event"))?;

    let runs = load_runs(&state, event.id).await?;
    Ok(Json(EventDetail { event, runs }))
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateEventRequest>,
) -> ApiResult<(StatusCode, Json<Ingested>)> {
    require_automation(&state, &auth).await?;
    auth.require_admin()?;

    let event_type = payload.event_type.trim();
    if event_type.is_empty() {
        return Err(ApiError::validation_single("eventType", "Event type is required"));
    }

    if let Some(user_id) = payload.user_id {
        state
            .stores
            .directory
            .get_user(user_id)
            .await?
            .filter(|u| u.organization_id == auth.organization_id())
            .ok_or_else(|| ApiError::not_found("User"))?;
    }

    let mut new_event = NewLifecycleEvent::new(auth.organization_id(), payload.user_id, event_type, EventSource::Api);
    if let Some(data) = payload.data.filter(|d| d.is_object()) {
        new_event = new_event.with_data(data);
    }

    let ingested = state.triggers.ingest(new_event).await?;
    Ok((StatusCode::CREATED, Json(ingested)))
}

async fn reprocess_event(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProcessingReport>> {
    require_automation(&state, &auth).await?;
    auth.require_admin()?;

    let report = state.triggers.reprocess(auth.organization_id(), id).await?;
    Ok(Json(report))
}

// ==================== Workflows ====================

async fn list_workflows(State(state): State<Arc<AppState>>, auth: AuthUser) -> ApiResult<Json<Vec<WorkflowRow>>> {
    require_automation(&state, &auth).await?;

    let workflows = state.stores.workflows.list_workflows(auth.organization_id()).await?;
    Ok(Json(workflows))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowRow>> {
    require_automation(&state, &auth).await?;

    let workflow = state
        .stores
        .workflows
        .get_workflow(auth.organization_id(), id)
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow"))?;

    Ok(Json(workflow))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(input): Json<WorkflowInput>,
) -> ApiResult<(StatusCode, Json<WorkflowRow>)> {
    let capabilities = require_automation(&state, &auth).await?;
    auth.require_admin()?;

    let workflow = validate_input(&state, &auth, &capabilities, input).await?;
    let row = state
        .stores
        .workflows
        .create_workflow(auth.organization_id(), Some(auth.user.id), &workflow)
        .await?;

    tracing::info!("Workflow '{}' ({}) created by {}", row.name, row.id, auth.user.email);
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(input): Json<WorkflowInput>,
) -> ApiResult<Json<WorkflowRow>> {
    let capabilities = require_automation(&state, &auth).await?;
    auth.require_admin()?;

    let workflow = validate_input(&state, &auth, &capabilities, input).await?;
    let row = state
        .stores
        .workflows
        .update_workflow(auth.organization_id(), id, &workflow)
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow"))?;

    Ok(Json(row))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_automation(&state, &auth).await?;
    auth.require_admin()?;

    if !state.stores.workflows.delete_workflow(auth.organization_id(), id).await? {
        return Err(ApiError::not_found("Workflow"));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn test_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TestWorkflowRequest>,
) -> ApiResult<Json<TestRunOutcome>> {
    require_automation(&state, &auth).await?;
    auth.require_admin()?;

    let outcome = state
        .triggers
        .run_test(auth.organization_id(), id, payload.user_id, auth.user.id)
        .await?;

    Ok(Json(outcome))
}

// ==================== Runs ====================

async fn list_runs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Json<PaginatedResponse<RunListEntry>>> {
    require_automation(&state, &auth).await?;

    let (runs, total) = state
        .stores
        .runs
        .list_runs(auth.organization_id(), params.limit(), params.offset())
        .await?;

    Ok(Json(PaginatedResponse::new(runs, &params, total)))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowRun>> {
    require_automation(&state, &auth).await?;

    let row = state
        .stores
        .runs
        .get_run(auth.organization_id(), id)
        .await?
        .ok_or_else(|| ApiError::not_found("Run"))?;
    let results = state.stores.runs.action_results(row.id).await?;

    Ok(Json(WorkflowRun::from_rows(row, results)?))
}
