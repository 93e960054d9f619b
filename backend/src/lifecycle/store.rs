// Store traits - the persistence seams the engine and handlers depend on

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sigflow_shared::{
    ActionResultRow, EmailTemplate, Organization, SyncConfig, User, WorkflowRow, WorkflowRunRow,
};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::actions::UserField;
use super::capabilities::FeatureGate;
use super::events::{LifecycleEvent, NewLifecycleEvent};
use super::recorder::RunStatus;
use super::workflow::ValidatedWorkflow;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            }
            _ => Self::Database(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Identity/org store owned by the hosted backend
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_organization(&self, id: Uuid) -> StoreResult<Option<Organization>>;
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Returns the updated user, `None` when it no longer exists
    async fn update_user_field(&self, user_id: Uuid, field: UserField, value: &str) -> StoreResult<Option<User>>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// All workflows of an organization, in evaluation order
    async fn list_workflows(&self, organization_id: Uuid) -> StoreResult<Vec<WorkflowRow>>;
    /// Active workflows of an organization for one event type, in evaluation order
    async fn candidate_workflows(&self, organization_id: Uuid, event_type: &str) -> StoreResult<Vec<WorkflowRow>>;
    async fn get_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<WorkflowRow>>;
    async fn create_workflow(
        &self,
        organization_id: Uuid,
        created_by: Option<Uuid>,
        workflow: &ValidatedWorkflow,
    ) -> StoreResult<WorkflowRow>;
    async fn update_workflow(
        &self,
        organization_id: Uuid,
        id: Uuid,
        workflow: &ValidatedWorkflow,
    ) -> StoreResult<Option<WorkflowRow>>;
    async fn delete_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<bool>;
    async fn get_email_template(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<EmailTemplate>>;
}

/// Event persistence. Every state change is guarded by the event's `version`.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &NewLifecycleEvent) -> StoreResult<LifecycleEvent>;
    async fn get_event(&self, id: Uuid) -> StoreResult<Option<LifecycleEvent>>;
    async fn list_events(
        &self,
        organization_id: Uuid,
        event_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<LifecycleEvent>, i64)>;
    /// Move to `processing` if `version` still matches and the event is not held by a
    /// claim newer than `stale_before`
    async fn claim_event(
        &self,
        id: Uuid,
        version: i32,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<LifecycleEvent>>;
    async fn complete_event(&self, id: Uuid, claimed_version: i32) -> StoreResult<bool>;
    /// Give a claim back without marking the event processed
    async fn release_event(&self, id: Uuid, claimed_version: i32, error: &str) -> StoreResult<bool>;
    /// Reprocess: back to `pending` unless currently claimed
    async fn reset_event(&self, id: Uuid, version: i32) -> StoreResult<Option<LifecycleEvent>>;
    async fn list_pending_events(&self, max_attempts: i32, limit: i64) -> StoreResult<Vec<LifecycleEvent>>;
}

/// Run history row joined with workflow and subject user for listings
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RunListEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub organization_id: Uuid,
    pub workflow_organization_id: Uuid,
    pub status: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub event_type: String,
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(&self, run: &WorkflowRunRow) -> StoreResult<()>;
    async fn append_action_result(&self, result: &ActionResultRow) -> StoreResult<()>;
    /// Terminal transition; must be durable when this returns. Fails if the run is not `running`.
    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn get_run(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<WorkflowRunRow>>;
    async fn action_results(&self, run_id: Uuid) -> StoreResult<Vec<ActionResultRow>>;
    async fn runs_for_event(&self, event_id: Uuid) -> StoreResult<Vec<WorkflowRunRow>>;
    async fn list_runs(&self, organization_id: Uuid, limit: i64, offset: i64) -> StoreResult<(Vec<RunListEntry>, i64)>;
}

#[async_trait]
pub trait SyncConfigStore: Send + Sync {
    async fn active_sync_configs(&self) -> StoreResult<Vec<SyncConfig>>;
    async fn mark_sync_run(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Every store the engine and HTTP layer need, as trait objects
#[derive(Clone)]
pub struct Stores {
    pub directory: Arc<dyn Directory>,
    pub features: Arc<dyn FeatureGate>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub events: Arc<dyn EventStore>,
    pub runs: Arc<dyn RunStore>,
    pub sync_configs: Arc<dyn SyncConfigStore>,
}

impl Stores {
    /// Use one value for every store
    pub fn from_single<S>(store: Arc<S>) -> Self
    where
        S: Directory + FeatureGate + WorkflowStore + EventStore + RunStore + SyncConfigStore + 'static,
    {
        Self {
            directory: store.clone(),
            features: store.clone(),
            workflows: store.clone(),
            events: store.clone(),
            runs: store.clone(),
            sync_configs: store,
        }
    }
}
