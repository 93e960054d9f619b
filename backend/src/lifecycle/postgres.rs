// PgStore - PostgreSQL implementation of every lifecycle store trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sigflow_shared::{
    ActionResultRow, EmailTemplate, LifecycleEventRow, Organization, SyncConfig, User, WorkflowRow, WorkflowRunRow,
};
use sqlx::PgPool;
use uuid::Uuid;

use super::actions::UserField;
use super::capabilities::{Feature, FeatureGate, PlanTier};
use super::events::{LifecycleEvent, NewLifecycleEvent};
use super::recorder::RunStatus;
use super::store::{
    Directory, EventStore, RunListEntry, RunStore, StoreError, StoreResult, SyncConfigStore, WorkflowStore,
};
use super::workflow::ValidatedWorkflow;

const WORKFLOW_ORDER: &str = "ORDER BY priority ASC, created_at ASC, id ASC";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_event(row: LifecycleEventRow) -> StoreResult<LifecycleEvent> {
    let id = row.id;
    LifecycleEvent::try_from(row).map_err(|e| StoreError::Corrupt(format!("event {}: {}", id, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[async_trait]
impl Directory for PgStore {
    async fn get_organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(
            "SELECT id, name, organization_type, parent_organization_id, plan, created_at
             FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn update_user_field(&self, user_id: Uuid, field: UserField, value: &str) -> StoreResult<Option<User>> {
        // Column names come from a closed enum, never from input
        let sql = format!(
            "UPDATE users SET {} = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
            field.column()
        );

        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }
}

#[async_trait]
impl FeatureGate for PgStore {
    async fn has_feature(&self, organization_id: Uuid, feature: Feature) -> StoreResult<bool> {
        let plan: Option<(String,)> = sqlx::query_as("SELECT plan FROM organizations WHERE id = $1")
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(plan
            .map(|(plan,)| PlanTier::parse(&plan).includes(feature))
            .unwrap_or(false))
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn list_workflows(&self, organization_id: Uuid) -> StoreResult<Vec<WorkflowRow>> {
        let sql = format!("SELECT * FROM lifecycle_workflows WHERE organization_id = $1 {}", WORKFLOW_ORDER);
        let rows = sqlx::query_as::<_, WorkflowRow>(&sql)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn candidate_workflows(&self, organization_id: Uuid, event_type: &str) -> StoreResult<Vec<WorkflowRow>> {
        let sql = format!(
            "SELECT * FROM lifecycle_workflows
             WHERE organization_id = $1 AND event_type = $2 AND is_active {}",
            WORKFLOW_ORDER
        );
        let rows = sqlx::query_as::<_, WorkflowRow>(&sql)
            .bind(organization_id)
            .bind(event_type)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn get_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<WorkflowRow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            "SELECT * FROM lifecycle_workflows WHERE organization_id = $1 AND id = $2",
        )
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn create_workflow(
        &self,
        organization_id: Uuid,
        created_by: Option<Uuid>,
        workflow: &ValidatedWorkflow,
    ) -> StoreResult<WorkflowRow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            "INSERT INTO lifecycle_workflows
                (id, organization_id, name, description, event_type, is_active, priority,
                 filters, actions, cascade_to_clients, created_by, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(organization_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.event_type.as_str())
        .bind(workflow.is_active)
        .bind(workflow.priority)
        .bind(to_json(&workflow.filters)?)
        .bind(to_json(&workflow.actions)?)
        .bind(workflow.cascade_to_clients)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update_workflow(
        &self,
        organization_id: Uuid,
        id: Uuid,
        workflow: &ValidatedWorkflow,
    ) -> StoreResult<Option<WorkflowRow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            "UPDATE lifecycle_workflows
             SET name = $3, description = $4, event_type = $5, is_active = $6, priority = $7,
                 filters = $8, actions = $9, cascade_to_clients = $10, updated_at = NOW()
             WHERE organization_id = $1 AND id = $2
             RETURNING *",
        )
        .bind(organization_id)
        .bind(id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.event_type.as_str())
        .bind(workflow.is_active)
        .bind(workflow.priority)
        .bind(to_json(&workflow.filters)?)
        .bind(to_json(&workflow.actions)?)
        .bind(workflow.cascade_to_clients)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn delete_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM lifecycle_workflows WHERE organization_id = $1 AND id = $2")
            .bind(organization_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_email_template(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<EmailTemplate>> {
        let template = sqlx::query_as::<_, EmailTemplate>(
            "SELECT * FROM email_templates WHERE organization_id = $1 AND id = $2",
        )
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn insert_event(&self, event: &NewLifecycleEvent) -> StoreResult<LifecycleEvent> {
        let row = sqlx::query_as::<_, LifecycleEventRow>(
            "INSERT INTO lifecycle_events
                (id, organization_id, user_id, event_type, event_source, event_data, state, processed, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', FALSE, NOW())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(event.organization_id)
        .bind(event.user_id)
        .bind(&event.event_type)
        .bind(event.source.as_str())
        .bind(&event.data)
        .fetch_one(&self.pool)
        .await?;

        decode_event(row)
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<LifecycleEvent>> {
        sqlx::query_as::<_, LifecycleEventRow>("SELECT * FROM lifecycle_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(decode_event)
            .transpose()
    }

    async fn list_events(
        &self,
        organization_id: Uuid,
        event_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<LifecycleEvent>, i64)> {
        let rows = sqlx::query_as::<_, LifecycleEventRow>(
            "SELECT * FROM lifecycle_events
             WHERE organization_id = $1 AND ($2::text IS NULL OR event_type = $2)
             ORDER BY created_at DESC, id DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(organization_id)
        .bind(event_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM lifecycle_events
             WHERE organization_id = $1 AND ($2::text IS NULL OR event_type = $2)",
        )
        .bind(organization_id)
        .bind(event_type)
        .fetch_one(&self.pool)
        .await?;

        let events = rows.into_iter().map(decode_event).collect::<StoreResult<Vec<_>>>()?;
        Ok((events, total))
    }

    async fn claim_event(
        &self,
        id: Uuid,
        version: i32,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<LifecycleEvent>> {
        sqlx::query_as::<_, LifecycleEventRow>(
            "UPDATE lifecycle_events
             SET state = 'processing', processing_started_at = NOW(),
                 version = version + 1, attempts = attempts + 1
             WHERE id = $1 AND version = $2
               AND (state <> 'processing' OR processing_started_at < $3)
             RETURNING *",
        )
        .bind(id)
        .bind(version)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?
        .map(decode_event)
        .transpose()
    }

    async fn complete_event(&self, id: Uuid, claimed_version: i32) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE lifecycle_events
             SET state = 'processed', processed = TRUE, processed_at = NOW(),
                 processing_started_at = NULL, last_error = NULL, version = version + 1
             WHERE id = $1 AND version = $2 AND state = 'processing'",
        )
        .bind(id)
        .bind(claimed_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_event(&self, id: Uuid, claimed_version: i32, error: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE lifecycle_events
             SET state = 'pending', processed = FALSE, processing_started_at = NULL,
                 last_error = $3, version = version + 1
             WHERE id = $1 AND version = $2 AND state = 'processing'",
        )
        .bind(id)
        .bind(claimed_version)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_event(&self, id: Uuid, version: i32) -> StoreResult<Option<LifecycleEvent>> {
        sqlx::query_as::<_, LifecycleEventRow>(
            "UPDATE lifecycle_events
             SET state = 'pending', processed = FALSE, processed_at = NULL,
                 attempts = 0, last_error = NULL, version = version + 1
             WHERE id = $1 AND version = $2 AND state <> 'processing'
             RETURNING *",
        )
        .bind(id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?
        .map(decode_event)
        .transpose()
    }

    async fn list_pending_events(&self, max_attempts: i32, limit: i64) -> StoreResult<Vec<LifecycleEvent>> {
        let rows = sqlx::query_as::<_, LifecycleEventRow>(
            "SELECT * FROM lifecycle_events
             WHERE state = 'pending' AND attempts < $1
             ORDER BY created_at ASC
             LIMIT $2",
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_event).collect()
    }
}

#[async_trait]
impl RunStore for PgStore {
    async fn insert_run(&self, run: &WorkflowRunRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO lifecycle_workflow_runs
                (id, event_id, workflow_id, workflow_name, organization_id, workflow_organization_id,
                 status, error, started_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(run.id)
        .bind(run.event_id)
        .bind(run.workflow_id)
        .bind(&run.workflow_name)
        .bind(run.organization_id)
        .bind(run.workflow_organization_id)
        .bind(&run.status)
        .bind(&run.error)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_action_result(&self, result: &ActionResultRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO lifecycle_run_actions (run_id, position, kind, status, error, duration_ms, executed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(result.run_id)
        .bind(result.position)
        .bind(&result.kind)
        .bind(&result.status)
        .bind(&result.error)
        .bind(result.duration_ms)
        .bind(result.executed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE lifecycle_workflow_runs
             SET status = $2, error = $3, finished_at = $4
             WHERE id = $1 AND status = 'running'",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(error)
        .bind(finished_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::Corrupt(format!("run {} is not running", run_id)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_run(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<WorkflowRunRow>> {
        let run = sqlx::query_as::<_, WorkflowRunRow>(
            "SELECT * FROM lifecycle_workflow_runs WHERE organization_id = $1 AND id = $2",
        )
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }

    async fn action_results(&self, run_id: Uuid) -> StoreResult<Vec<ActionResultRow>> {
        let rows = sqlx::query_as::<_, ActionResultRow>(
            "SELECT * FROM lifecycle_run_actions WHERE run_id = $1 ORDER BY position ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn runs_for_event(&self, event_id: Uuid) -> StoreResult<Vec<WorkflowRunRow>> {
        let rows = sqlx::query_as::<_, WorkflowRunRow>(
            "SELECT * FROM lifecycle_workflow_runs WHERE event_id = $1 ORDER BY started_at ASC, id ASC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_runs(&self, organization_id: Uuid, limit: i64, offset: i64) -> StoreResult<(Vec<RunListEntry>, i64)> {
        let rows = sqlx::query_as::<_, RunListEntry>(
            r#"
            SELECT
                r.id, r.event_id, r.workflow_id, r.workflow_name, r.organization_id,
                r.workflow_organization_id, r.status, r.error, r.started_at, r.finished_at,
                e.event_type,
                e.user_id,
                u.email AS user_email,
                NULLIF(TRIM(u.first_name || ' ' || u.last_name), '') AS user_name
            FROM lifecycle_workflow_runs r
            JOIN lifecycle_events e ON e.id = r.event_id
            LEFT JOIN users u ON u.id = e.user_id
            WHERE r.organization_id = $1
            ORDER BY r.started_at DESC, r.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(organization_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lifecycle_workflow_runs WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((rows, total))
    }
}

#[async_trait]
impl SyncConfigStore for PgStore {
    async fn active_sync_configs(&self) -> StoreResult<Vec<SyncConfig>> {
        let configs = sqlx::query_as::<_, SyncConfig>(
            "SELECT * FROM sync_configs WHERE is_active ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(configs)
    }

    async fn mark_sync_run(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE sync_configs SET last_run_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
