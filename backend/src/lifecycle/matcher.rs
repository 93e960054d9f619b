// Workflow Matcher - selects the workflows an event triggers, in execution order

use serde::Serialize;
use sigflow_shared::WorkflowRow;
use std::sync::Arc;
use uuid::Uuid;

use super::events::{EventType, LifecycleEvent};
use super::filters::{all_match, MatchSubject};
use super::store::{StoreResult, WorkflowStore};
use super::workflow::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrigin {
    /// Owned by the event's organization
    Local,
    /// Inherited from the parent (MSP) organization
    Cascaded,
}

/// A selected workflow. `definition` is `Err` when the stored row could not be decoded;
/// such a workflow still gets a (failed) run so the problem shows up in the audit trail.
#[derive(Debug, Clone)]
pub struct MatchedWorkflow {
    pub workflow_id: Uuid,
    pub owner_organization_id: Uuid,
    pub name: String,
    pub origin: MatchOrigin,
    pub definition: Result<Workflow, String>,
}

pub struct WorkflowMatcher {
    workflows: Arc<dyn WorkflowStore>,
}

impl WorkflowMatcher {
    pub fn new(workflows: Arc<dyn WorkflowStore>) -> Self {
        Self { workflows }
    }

    /// Local workflows for the event. Unrecognized event types match nothing.
    pub async fn match_event(&self, event: &LifecycleEvent, subject: &MatchSubject) -> StoreResult<Vec<MatchedWorkflow>> {
        self.match_owned_by(event.organization_id, event, subject, MatchOrigin::Local).await
    }

    pub(crate) async fn match_owned_by(
        &self,
        owner: Uuid,
        event: &LifecycleEvent,
        subject: &MatchSubject,
        origin: MatchOrigin,
    ) -> StoreResult<Vec<MatchedWorkflow>> {
        let Some(event_type) = event.kind() else {
            return Ok(Vec::new());
        };

        let rows = self.workflows.candidate_workflows(owner, event_type.as_str()).await?;
        Ok(select(rows, owner, event_type, subject, origin))
    }
}

/// Pure selection: predicate, then ascending priority with creation time breaking ties
pub fn select(
    mut rows: Vec<WorkflowRow>,
    owner: Uuid,
    event_type: EventType,
    subject: &MatchSubject,
    origin: MatchOrigin,
) -> Vec<MatchedWorkflow> {
    rows.retain(|row| {
        row.organization_id == owner
            && row.is_active
            && row.event_type == event_type.as_str()
            && (origin == MatchOrigin::Local || row.cascade_to_clients)
    });
    rows.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    rows.into_iter()
        .filter_map(|row| match Workflow::try_from(&row) {
            Ok(workflow) => all_match(&workflow.filters, subject).then(|| MatchedWorkflow {
                workflow_id: row.id,
                owner_organization_id: row.organization_id,
                name: row.name.clone(),
                origin,
                definition: Ok(workflow),
            }),
            Err(error) => Some(MatchedWorkflow {
                workflow_id: row.id,
                owner_organization_id: row.organization_id,
                name: row.name.clone(),
                origin,
                definition: Err(error),
            }),
        })
        .collect()
}
