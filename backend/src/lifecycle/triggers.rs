// Trigger Surface - event-driven, manual and test entry points into the processor

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::events::{EventState, LifecycleEvent, NewLifecycleEvent};
use super::processor::{EventProcessor, ProcessError, ProcessingReport};
use super::store::{StoreResult, Stores};

/// A recorded event and what processing it did. A processing failure leaves the event
/// pending for the pending-event sweep; it does not undo the recording.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingested {
    pub event: LifecycleEvent,
    pub report: Option<ProcessingReport>,
    pub error: Option<String>,
}

impl Ingested {
    pub fn runs_created(&self) -> usize {
        self.report.as_ref().map(|r| r.runs.len()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunOutcome {
    pub event_id: Uuid,
    pub actions_executed: usize,
    pub report: ProcessingReport,
}

#[derive(Clone)]
pub struct LifecycleTriggers {
    stores: Stores,
    processor: Arc<EventProcessor>,
}

impl LifecycleTriggers {
    pub fn new(stores: Stores, processor: Arc<EventProcessor>) -> Self {
        Self { stores, processor }
    }

    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }

    /// Record a new event and process it right away
    pub async fn ingest(&self, new_event: NewLifecycleEvent) -> StoreResult<Ingested> {
        let event = self.stores.events.insert_event(&new_event).await?;
        info!(
            "Recorded {} event {} for organization {} (source: {})",
            event.event_type, event.id, event.organization_id, event.source
        );

        // Once recorded, every failure is reported on the result; the pending sweep retries it
        let (report, error) = match self.processor.process_event(event.id).await {
            Ok(report) => (Some(report), None),
            Err(e) => {
                warn!("Event {} recorded but not processed: {}", event.id, e);
                (None, Some(e.to_string()))
            }
        };

        let event = match self.stores.events.get_event(event.id).await {
            Ok(Some(current)) => current,
            Ok(None) => event,
            Err(e) => {
                warn!("Could not reload event {}: {}", event.id, e);
                event
            }
        };
        Ok(Ingested { event, report, error })
    }

    /// Synthesize a manual test event for one workflow against a same-organization user
    pub async fn run_test(
        &self,
        organization_id: Uuid,
        workflow_id: Uuid,
        user_id: Uuid,
        triggered_by: Uuid,
    ) -> Result<TestRunOutcome, ProcessError> {
        let workflow = self
            .stores
            .workflows
            .get_workflow(organization_id, workflow_id)
            .await?
            .ok_or(ProcessError::WorkflowNotFound(workflow_id))?;

        let user = self
            .stores
            .directory
            .get_user(user_id)
            .await?
            .filter(|u| u.organization_id == organization_id)
            .ok_or(ProcessError::UserNotFound(user_id))?;

        let new_event =
            NewLifecycleEvent::test_event(organization_id, user.id, workflow.event_type, workflow.id, triggered_by);
        let event = self.stores.events.insert_event(&new_event).await?;

        info!("Testing workflow '{}' with event {} for user {}", workflow.name, event.id, user.email);

        let report = self.processor.process_event(event.id).await?;
        Ok(TestRunOutcome {
            event_id: event.id,
            actions_executed: report.actions_executed,
            report,
        })
    }

    /// Reset a historical event and process it again. Earlier runs are kept; new ones are appended.
    pub async fn reprocess(&self, organization_id: Uuid, event_id: Uuid) -> Result<ProcessingReport, ProcessError> {
        let event = self
            .stores
            .events
            .get_event(event_id)
            .await?
            .filter(|e| e.organization_id == organization_id)
            .ok_or(ProcessError::EventNotFound(event_id))?;

        if event.state == EventState::Processing {
            return Err(ProcessError::Busy(event_id));
        }

        self.stores
            .events
            .reset_event(event_id, event.version)
            .await?
            .ok_or(ProcessError::Busy(event_id))?;

        info!("Reprocessing event {}", event_id);
        self.processor.process_event(event_id).await
    }
}
