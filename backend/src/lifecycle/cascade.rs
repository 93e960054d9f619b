// Cascade Resolver - MSP parent workflows inherited by managed client organizations

use sigflow_shared::Organization;
use std::sync::Arc;
use tracing::debug;

use super::events::LifecycleEvent;
use super::filters::MatchSubject;
use super::matcher::{MatchOrigin, MatchedWorkflow, WorkflowMatcher};
use super::store::StoreResult;

/// Resolves exactly one parent hop. The parent's own parent is never consulted,
/// so no cycle detection is needed.
pub struct CascadeResolver {
    matcher: Arc<WorkflowMatcher>,
}

impl CascadeResolver {
    pub fn new(matcher: Arc<WorkflowMatcher>) -> Self {
        Self { matcher }
    }

    /// Parent workflows flagged `cascade_to_clients` that match the event
    pub async fn resolve_cascaded_workflows(
        &self,
        event: &LifecycleEvent,
        organization: &Organization,
        subject: &MatchSubject,
    ) -> StoreResult<Vec<MatchedWorkflow>> {
        let parent_id = match organization.parent_organization_id {
            Some(parent) if parent != organization.id => parent,
            _ => return Ok(Vec::new()),
        };

        let cascaded = self
            .matcher
            .match_owned_by(parent_id, event, subject, MatchOrigin::Cascaded)
            .await?;

        debug!(
            "Event {} inherits {} workflow(s) from parent organization {}",
            event.id,
            cascaded.len(),
            parent_id
        );

        Ok(cascaded)
    }
}
