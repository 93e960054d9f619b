// Unit tests for the pending-event sweep and the execution log

use crate::config::LifecycleConfig;
use crate::jobs::scheduler::{JobStatus, DIRECTORY_SYNC, PENDING_EVENTS};
use crate::lifecycle::events::{EventSource, EventState, NewLifecycleEvent};
use crate::tests::fixtures::{self, WorkflowFixture};
use crate::tests::helpers::TestEngine;
use std::sync::atomic::Ordering;

#[cfg(test)]
mod pending_sweep_tests {
    use super::*;

    #[tokio::test]
    async fn test_released_event_is_retried_to_completion() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").set_field("location", "Madrid").build());

        engine.store.fail_finalize.store(true, Ordering::SeqCst);
        let ingested = engine
            .state
            .triggers
            .ingest(NewLifecycleEvent::new(org.id, Some(user.id), "user_created", EventSource::Api))
            .await
            .unwrap();
        assert_eq!(ingested.event.state, EventState::Pending);
        engine.store.fail_finalize.store(false, Ordering::SeqCst);

        let report = engine.state.sweeps.run_pending_events().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.runs_created, 1);
        assert!(report.errors.is_empty());

        let event = engine.store.event(ingested.event.id).unwrap();
        assert_eq!(event.state, EventState::Processed);
        assert_eq!(event.attempts, 2);
        // The interrupted run stays behind as an orphan next to the retried one
        assert_eq!(engine.store.runs_of(event.id).len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_events_are_left_alone() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        engine.store.add_organization(&org);

        let max_attempts = LifecycleConfig::default().max_event_attempts;
        let exhausted = engine
            .record(NewLifecycleEvent::new(org.id, None, "user_updated", EventSource::Api))
            .await;
        engine.store.force_state(exhausted.id, EventState::Pending, max_attempts);
        let fresh = engine
            .record(NewLifecycleEvent::new(org.id, None, "user_updated", EventSource::Api))
            .await;

        let report = engine.state.sweeps.run_pending_events().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(engine.store.event(fresh.id).unwrap().state, EventState::Processed);
        assert_eq!(engine.store.event(exhausted.id).unwrap().state, EventState::Pending);
    }

    #[tokio::test]
    async fn test_still_failing_events_are_reported() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);

        let event = engine
            .record(NewLifecycleEvent::new(org.id, Some(user.id), "user_created", EventSource::Api))
            .await;
        engine.store.remove_user(user.id);

        let report = engine.state.sweeps.run_pending_events().await.unwrap();

        assert_eq!(report.processed, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("no longer exists"));

        let stored = engine.store.event(event.id).unwrap();
        assert_eq!(stored.state, EventState::Pending);
        assert_eq!(stored.attempts, 1);
    }
}

#[cfg(test)]
mod execution_log_tests {
    use super::*;

    #[tokio::test]
    async fn test_sweeps_are_logged() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .record(NewLifecycleEvent::new(org.id, Some(user.id), "user_created", EventSource::Api))
            .await;
        engine
            .record(NewLifecycleEvent::new(org.id, Some(uuid::Uuid::new_v4()), "user_created", EventSource::Api))
            .await;

        engine.state.sweeps.run_directory_sync().await.unwrap();
        engine.state.sweeps.run_pending_events().await.unwrap();

        let logs = engine.state.sweeps.execution_logs().await;
        assert_eq!(logs.len(), 2);

        assert_eq!(logs[0].job_name, DIRECTORY_SYNC);
        assert_eq!(logs[0].status, JobStatus::Completed);
        assert_eq!(logs[0].items_processed, 0);

        assert_eq!(logs[1].job_name, PENDING_EVENTS);
        assert_eq!(logs[1].status, JobStatus::PartialFailure);
        assert_eq!(logs[1].items_processed, 2);
        assert_eq!(logs[1].errors.len(), 1);
        assert!(logs[1].completed_at.is_some());
    }
}
