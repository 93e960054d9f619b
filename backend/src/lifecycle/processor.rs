// Event Processor - orchestrates matching, execution and recording for one event

use chrono::Utc;
use serde::Serialize;
use sigflow_shared::{Organization, User};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::capabilities::Capabilities;
use super::cascade::CascadeResolver;
use super::events::LifecycleEvent;
use super::executor::{ActionExecutor, ExecutionContext};
use super::filters::MatchSubject;
use super::matcher::{MatchedWorkflow, WorkflowMatcher};
use super::recorder::{RunRecorder, WorkflowRun};
use super::store::{StoreError, Stores};
use crate::error::AppError;

/// Processing-level failures. Action failures never show up here; they are recorded on runs.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Event {0} not found")]
    EventNotFound(Uuid),
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("User {0} not found")]
    UserNotFound(Uuid),
    #[error("Event {0} is already being processed")]
    Busy(Uuid),
    #[error("Organization {0} not found")]
    OrganizationNotFound(Uuid),
    #[error("Event {event_id} references user {user_id}, which no longer exists")]
    SubjectUserMissing { event_id: Uuid, user_id: Uuid },
    #[error("Event {event_id} references user {user_id}, who belongs to another organization")]
    SubjectUserForeign { event_id: Uuid, user_id: Uuid },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::EventNotFound(_) => AppError::NotFound("Event".to_string()),
            ProcessError::WorkflowNotFound(_) => AppError::NotFound("Workflow".to_string()),
            ProcessError::UserNotFound(_)
            | ProcessError::SubjectUserMissing { .. }
            | ProcessError::SubjectUserForeign { .. } => {
                AppError::NotFound("User".to_string())
            }
            ProcessError::Busy(_) => AppError::Conflict(err.to_string()),
            ProcessError::OrganizationNotFound(_) => AppError::InternalError(err.to_string()),
            ProcessError::Store(e) => e.into(),
        }
    }
}

/// Outcome of one processing pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingReport {
    pub event_id: Uuid,
    pub already_processed: bool,
    pub actions_executed: usize,
    pub runs: Vec<WorkflowRun>,
}

impl ProcessingReport {
    fn skipped(event_id: Uuid) -> Self {
        Self {
            event_id,
            already_processed: true,
            actions_executed: 0,
            runs: Vec::new(),
        }
    }
}

pub struct EventProcessor {
    stores: Stores,
    matcher: Arc<WorkflowMatcher>,
    cascade: CascadeResolver,
    recorder: RunRecorder,
    executor: ActionExecutor,
    stale_claim: chrono::Duration,
}

impl EventProcessor {
    pub fn new(stores: Stores, executor: ActionExecutor, stale_claim: chrono::Duration) -> Self {
        let matcher = Arc::new(WorkflowMatcher::new(stores.workflows.clone()));
        Self {
            cascade: CascadeResolver::new(matcher.clone()),
            recorder: RunRecorder::new(stores.runs.clone()),
            matcher,
            stores,
            executor,
            stale_claim,
        }
    }

    /// Process one event under a version-guarded claim. Already processed events are left
    /// alone; reprocessing goes through a reset first.
    pub async fn process_event(&self, event_id: Uuid) -> Result<ProcessingReport, ProcessError> {
        let event = self
            .stores
            .events
            .get_event(event_id)
            .await?
            .ok_or(ProcessError::EventNotFound(event_id))?;

        if event.is_processed() {
            info!("Event {} already processed, skipping", event_id);
            return Ok(ProcessingReport::skipped(event_id));
        }

        let stale_before = Utc::now() - self.stale_claim;
        let claimed = self
            .stores
            .events
            .claim_event(event_id, event.version, stale_before)
            .await?
            .ok_or(ProcessError::Busy(event_id))?;

        match self.run_claimed(&claimed).await {
            Ok(runs) => {
                if !self.stores.events.complete_event(event_id, claimed.version).await? {
                    warn!("Claim on event {} was taken over before completion", event_id);
                }

                let actions_executed = runs.iter().map(|r| r.action_results.len()).sum();
                info!(
                    "Processed {}event {} ({}): {} run(s), {} action(s)",
                    if claimed.is_test() { "test " } else { "" },
                    event_id,
                    claimed.event_type,
                    runs.len(),
                    actions_executed
                );

                Ok(ProcessingReport {
                    event_id,
                    already_processed: false,
                    actions_executed,
                    runs,
                })
            }
            Err(e) => {
                error!("Processing event {} failed: {}", event_id, e);
                if let Err(release_err) = self
                    .stores
                    .events
                    .release_event(event_id, claimed.version, &e.to_string())
                    .await
                {
                    error!("Failed to release event {}: {}", event_id, release_err);
                }
                Err(e)
            }
        }
    }

    async fn run_claimed(&self, event: &LifecycleEvent) -> Result<Vec<WorkflowRun>, ProcessError> {
        let (organization, user) = self.load_context(event).await?;
        let subject = match_subject(event, user.as_ref());

        let mut workflows = self.matcher.match_event(event, &subject).await?;
        workflows.extend(
            self.cascade
                .resolve_cascaded_workflows(event, &organization, &subject)
                .await?,
        );

        let mut ctx = ExecutionContext::new(event.clone(), organization, user);
        let mut capabilities: HashMap<Uuid, Capabilities> = HashMap::new();
        let mut runs = Vec::with_capacity(workflows.len());

        for workflow in &workflows {
            let owner = workflow.owner_organization_id;
            let caps = match capabilities.get(&owner) {
                Some(caps) => *caps,
                None => {
                    let caps = Capabilities::load(self.stores.features.as_ref(), owner).await?;
                    capabilities.insert(owner, caps);
                    caps
                }
            };
            ctx.enter_workflow(owner, caps);

            runs.push(self.run_workflow(event, workflow, &mut ctx).await?);
        }

        Ok(runs)
    }

    async fn run_workflow(
        &self,
        event: &LifecycleEvent,
        workflow: &MatchedWorkflow,
        ctx: &mut ExecutionContext,
    ) -> Result<WorkflowRun, ProcessError> {
        let mut handle = self.recorder.begin_run(event, workflow).await?;

        let definition = match &workflow.definition {
            Ok(definition) => definition,
            Err(decode_error) => return Ok(self.recorder.fail(handle, decode_error).await?),
        };

        for action in &definition.actions {
            let result = self.executor.execute(action, ctx).await;
            self.recorder.record_action_result(&mut handle, result).await?;
        }

        Ok(self.recorder.finalize(handle).await?)
    }

    async fn load_context(&self, event: &LifecycleEvent) -> Result<(Organization, Option<User>), ProcessError> {
        let organization = self
            .stores
            .directory
            .get_organization(event.organization_id)
            .await?
            .ok_or(ProcessError::OrganizationNotFound(event.organization_id))?;

        let user = match event.user_id {
            Some(user_id) => {
                let user = self
                    .stores
                    .directory
                    .get_user(user_id)
                    .await?
                    .ok_or(ProcessError::SubjectUserMissing {
                        event_id: event.id,
                        user_id,
                    })?;
                if user.organization_id != event.organization_id {
                    return Err(ProcessError::SubjectUserForeign {
                        event_id: event.id,
                        user_id,
                    });
                }
                Some(user)
            }
            None => None,
        };

        Ok((organization, user))
    }
}

/// Attributes used by filters. The payload's department wins over the stored user record,
/// since a `department_changed` event carries the new value.
pub fn match_subject(event: &LifecycleEvent, user: Option<&User>) -> MatchSubject {
    let department = event
        .attribute("department")
        .map(str::to_string)
        .or_else(|| user.and_then(|u| u.department.clone()));

    MatchSubject {
        department,
        source: event.source,
    }
}
