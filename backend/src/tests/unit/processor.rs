// Unit tests for event processing: matching, execution and run recording

use crate::lifecycle::actions::ActionResult;
use crate::lifecycle::events::{EventSource, EventState, NewLifecycleEvent};
use crate::lifecycle::recorder::RunStatus;
use crate::lifecycle::ProcessError;
use crate::tests::fixtures::{self, WorkflowFixture};
use crate::tests::helpers::TestEngine;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn user_created(organization_id: Uuid, user_id: Uuid) -> NewLifecycleEvent {
    NewLifecycleEvent::new(organization_id, Some(user_id), "user_created", EventSource::HrSync)
}

// ============================================
// Webhook Delivery Tests
// ============================================

#[cfg(test)]
mod webhook_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_webhook_workflow_completes() {
        let engine = TestEngine::new();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/onboarding"))
            .and(header("X-Sigflow-Event", "user_created"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let org = fixtures::organization("standard", "business");
        let user = fixtures::user(org.id, "member", Some("Engineering"));
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .webhook(&format!("{}/hooks/onboarding", server.uri()))
                .build(),
        );

        let ingested = engine
            .state
            .triggers
            .ingest(user_created(org.id, user.id).with_data(json!({"employeeId": "E-1001"})))
            .await
            .unwrap();

        assert!(ingested.error.is_none());
        assert_eq!(ingested.runs_created(), 1);
        assert_eq!(ingested.event.state, EventState::Processed);

        let report = ingested.report.unwrap();
        assert_eq!(report.actions_executed, 1);
        assert_eq!(report.runs[0].status, RunStatus::Completed);
        assert!(report.runs[0].error.is_none());

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["eventType"], "user_created");
        assert_eq!(body["userId"], json!(user.id));
        assert_eq!(body["eventData"]["employeeId"], "E-1001");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_error_status_fails_the_run() {
        let engine = TestEngine::new();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let org = fixtures::organization("standard", "business");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").webhook(&server.uri()).build());

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        let run = &ingested.report.unwrap().runs[0];

        assert_eq!(run.status, RunStatus::Failed);
        let error = run.action_results[0].error.as_deref().unwrap();
        assert!(error.starts_with("HTTP 500"));
        assert!(error.contains("upstream exploded"));
        // Action failures do not fail the event
        assert_eq!(ingested.event.state, EventState::Processed);
    }

    #[tokio::test]
    async fn test_webhook_timeout_is_recorded() {
        let engine = TestEngine::new();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let org = fixtures::organization("standard", "business");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").webhook(&server.uri()).build());

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        let run = &ingested.report.unwrap().runs[0];

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.action_results[0].error.as_deref(),
            Some("webhook timed out after 1s")
        );
    }

    #[tokio::test]
    async fn test_webhook_needs_advanced_plan_at_execution_time() {
        let engine = TestEngine::new();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        // Stored while on a higher plan, then downgraded
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").webhook(&server.uri()).build());

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        let run = &ingested.report.unwrap().runs[0];

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.action_results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("advanced_workflows"));
    }
}

// ============================================
// Action Sequencing Tests
// ============================================

#[cfg(test)]
mod action_tests {
    use super::*;

    #[tokio::test]
    async fn test_partial_run_keeps_earlier_side_effects() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", Some("Engineering"));
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .set_field("department", "Sales")
                .email_subject_user(Uuid::new_v4())
                .build(),
        );

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        let run = &ingested.report.unwrap().runs[0];

        assert_eq!(run.status, RunStatus::Partial);
        assert!(run.action_results[0].is_completed());
        assert!(!run.action_results[1].is_completed());
        assert!(run.error.as_deref().unwrap().starts_with("action 2 (email): email template"));

        let stored = engine.store.user(user.id).unwrap();
        assert_eq!(stored.department.as_deref(), Some("Sales"));
        assert!(stored.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_email_sees_fields_updated_earlier_in_the_run() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", Some("Engineering"));
        let template = fixtures::email_template(org.id);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine.store.add_template(&template);
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .set_field("department", "Sales")
                .email_subject_user(template.id)
                .build(),
        );

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        assert_eq!(ingested.report.unwrap().runs[0].status, RunStatus::Completed);

        let sent = engine.email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, user.email);
        assert_eq!(sent[0].subject, format!("Welcome to {}, {}", org.name, user.first_name));
        assert!(sent[0].html_body.contains("for Sales is ready"));
        assert!(sent[0].text_body.as_deref().unwrap().contains("Sales"));
    }

    #[tokio::test]
    async fn test_email_transport_failure_is_an_action_failure() {
        let engine = TestEngine::new();
        engine.email.fail.store(true, Ordering::SeqCst);

        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        let template = fixtures::email_template(org.id);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine.store.add_template(&template);
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .email_subject_user(template.id)
                .build(),
        );

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        let run = &ingested.report.unwrap().runs[0];

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.action_results[0].error.as_deref().unwrap().contains("421"));
        assert_eq!(ingested.event.state, EventState::Processed);
    }

    #[tokio::test]
    async fn test_stored_status_matches_stored_results() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .set_field("job_title", "Staff Engineer")
                .email_subject_user(Uuid::new_v4())
                .set_field("location", "Lisbon")
                .build(),
        );
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").build());

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();

        for run in engine.store.runs_of(ingested.event.id) {
            let results: Vec<ActionResult> = engine
                .store
                .results_of(run.id)
                .into_iter()
                .map(|row| ActionResult::try_from(row).unwrap())
                .collect();

            assert_eq!(RunStatus::parse(&run.status), Some(RunStatus::aggregate(&results)));
            assert!(run.finished_at.is_some());
        }

        let stored = engine.store.user(user.id).unwrap();
        assert_eq!(stored.job_title.as_deref(), Some("Staff Engineer"));
        assert_eq!(stored.location.as_deref(), Some("Lisbon"));
    }

    #[tokio::test]
    async fn test_workflow_without_actions_completes() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").build());

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        let run = &ingested.report.unwrap().runs[0];

        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.action_results.is_empty());
    }
}

// ============================================
// Matching Tests
// ============================================

#[cfg(test)]
mod matching_tests {
    use super::*;

    #[tokio::test]
    async fn test_inactive_and_filtered_workflows_do_not_run() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", Some("Engineering"));
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").inactive().build());
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .departments(&["Sales", "Marketing"])
                .build(),
        );
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_deactivated").build());

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();

        assert_eq!(ingested.runs_created(), 0);
        assert_eq!(ingested.event.state, EventState::Processed);
    }

    #[tokio::test]
    async fn test_payload_department_wins_over_user_record() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", Some("Engineering"));
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "department_changed")
                .departments(&["sales"])
                .build(),
        );

        let event = NewLifecycleEvent::new(org.id, Some(user.id), "department_changed", EventSource::Api)
            .with_data(json!({"department": "Sales", "previousDepartment": "Engineering"}));
        let ingested = engine.state.triggers.ingest(event).await.unwrap();

        assert_eq!(ingested.runs_created(), 1);
    }

    #[tokio::test]
    async fn test_source_filter() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .sources(&["directory_sync"])
                .build(),
        );

        let from_hr = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        assert_eq!(from_hr.runs_created(), 0);

        let from_directory = engine
            .state
            .triggers
            .ingest(NewLifecycleEvent::new(org.id, Some(user.id), "user_created", EventSource::DirectorySync))
            .await
            .unwrap();
        assert_eq!(from_directory.runs_created(), 1);
    }

    #[tokio::test]
    async fn test_runs_follow_priority_then_creation_time() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .named("late")
                .priority(5)
                .created_minutes_ago(30)
                .build(),
        );
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .named("early-newer")
                .priority(1)
                .created_minutes_ago(5)
                .build(),
        );
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .named("early-older")
                .priority(1)
                .created_minutes_ago(10)
                .build(),
        );

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        let names: Vec<_> = ingested
            .report
            .unwrap()
            .runs
            .iter()
            .map(|r| r.workflow_name.clone())
            .collect();

        assert_eq!(names, vec!["early-older", "early-newer", "late"]);
    }

    #[tokio::test]
    async fn test_unrecognized_event_type_is_stored_but_matches_nothing() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        engine.store.add_organization(&org);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").build());

        let event = NewLifecycleEvent::new(org.id, None, "badge_printed", EventSource::Api);
        let ingested = engine.state.triggers.ingest(event).await.unwrap();

        assert_eq!(ingested.runs_created(), 0);
        assert_eq!(ingested.event.state, EventState::Processed);
        assert_eq!(ingested.event.event_type, "badge_printed");
    }

    #[tokio::test]
    async fn test_malformed_workflow_gets_a_failed_run() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .named("broken")
                .priority(0)
                .raw_actions(json!([{"kind": "teleport", "destination": "mars"}]))
                .build(),
        );
        engine.store.add_workflow(
            &WorkflowFixture::new(org.id, "user_created")
                .named("healthy")
                .priority(1)
                .set_field("phone", "+49 30 1234567")
                .build(),
        );

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        let runs = ingested.report.unwrap().runs;

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].workflow_name, "broken");
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error.is_some());
        assert!(runs[0].action_results.is_empty());
        assert_eq!(runs[1].status, RunStatus::Completed);
        assert_eq!(
            engine.store.user(user.id).unwrap().phone.as_deref(),
            Some("+49 30 1234567")
        );
    }
}

// ============================================
// Cascade Tests
// ============================================

#[cfg(test)]
mod cascade_tests {
    use super::*;

    #[tokio::test]
    async fn test_cascade_reaches_exactly_one_level() {
        let engine = TestEngine::new();
        let grandparent = fixtures::organization("msp", "msp");
        let parent = fixtures::client_of(&grandparent, "msp");
        let parent = sigflow_shared::Organization {
            organization_type: "msp".to_string(),
            ..parent
        };
        let client = fixtures::client_of(&parent, "starter");
        let user = fixtures::user(client.id, "member", None);
        for org in [&grandparent, &parent, &client] {
            engine.store.add_organization(org);
        }
        engine.store.add_user(&user);

        engine.store.add_workflow(
            &WorkflowFixture::new(grandparent.id, "user_created")
                .named("grandparent-cascading")
                .cascading()
                .build(),
        );
        engine.store.add_workflow(
            &WorkflowFixture::new(parent.id, "user_created")
                .named("parent-cascading")
                .cascading()
                .build(),
        );
        engine.store.add_workflow(
            &WorkflowFixture::new(parent.id, "user_created")
                .named("parent-internal")
                .build(),
        );
        engine.store.add_workflow(
            &WorkflowFixture::new(client.id, "user_created")
                .named("client-local")
                .build(),
        );

        let ingested = engine.state.triggers.ingest(user_created(client.id, user.id)).await.unwrap();
        let runs = ingested.report.unwrap().runs;
        let names: Vec<_> = runs.iter().map(|r| r.workflow_name.as_str()).collect();

        assert_eq!(names, vec!["client-local", "parent-cascading"]);
        assert_eq!(runs[0].workflow_organization_id, client.id);
        assert_eq!(runs[1].workflow_organization_id, parent.id);
        assert!(runs.iter().all(|r| r.organization_id == client.id));
    }

    #[tokio::test]
    async fn test_cascaded_actions_use_the_owner_plan() {
        let engine = TestEngine::new();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let msp = fixtures::organization("msp", "msp");
        let client = fixtures::client_of(&msp, "starter");
        let user = fixtures::user(client.id, "member", None);
        engine.store.add_organization(&msp);
        engine.store.add_organization(&client);
        engine.store.add_user(&user);
        engine.store.add_workflow(
            &WorkflowFixture::new(msp.id, "user_created")
                .cascading()
                .webhook(&server.uri())
                .build(),
        );

        let ingested = engine.state.triggers.ingest(user_created(client.id, user.id)).await.unwrap();
        let runs = ingested.report.unwrap().runs;

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
    }
}

// ============================================
// Event State Tests
// ============================================

#[cfg(test)]
mod event_state_tests {
    use super::*;

    #[tokio::test]
    async fn test_processed_event_is_not_run_twice() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").build());

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        let again = engine
            .state
            .triggers
            .processor()
            .process_event(ingested.event.id)
            .await
            .unwrap();

        assert!(again.already_processed);
        assert!(again.runs.is_empty());
        assert_eq!(engine.store.runs_of(ingested.event.id).len(), 1);
    }

    #[tokio::test]
    async fn test_reprocess_appends_runs_with_current_workflows() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").named("original").build());

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();
        assert_eq!(ingested.runs_created(), 1);

        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").named("added-later").build());

        let report = engine
            .state
            .triggers
            .reprocess(org.id, ingested.event.id)
            .await
            .unwrap();

        assert!(!report.already_processed);
        assert_eq!(report.runs.len(), 2);
        assert_eq!(engine.store.runs_of(ingested.event.id).len(), 3);

        let event = engine.store.event(ingested.event.id).unwrap();
        assert_eq!(event.state, EventState::Processed);
        assert_eq!(event.attempts, 1);
    }

    #[tokio::test]
    async fn test_reprocess_is_scoped_to_the_organization() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let other = fixtures::organization("standard", "starter");
        engine.store.add_organization(&org);
        engine.store.add_organization(&other);

        let event = engine
            .record(NewLifecycleEvent::new(org.id, None, "user_updated", EventSource::Api))
            .await;

        let result = engine.state.triggers.reprocess(other.id, event.id).await;
        assert!(matches!(result, Err(ProcessError::EventNotFound(id)) if id == event.id));
    }

    #[tokio::test]
    async fn test_claimed_event_is_busy() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        engine.store.add_organization(&org);

        let event = engine
            .record(NewLifecycleEvent::new(org.id, None, "user_updated", EventSource::Api))
            .await;
        engine.store.force_state(event.id, EventState::Processing, 1);

        let processor = engine.state.triggers.processor();
        assert!(matches!(
            processor.process_event(event.id).await,
            Err(ProcessError::Busy(_))
        ));
        assert!(matches!(
            engine.state.triggers.reprocess(org.id, event.id).await,
            Err(ProcessError::Busy(_))
        ));
        assert!(engine.store.runs_of(event.id).is_empty());
    }

    #[tokio::test]
    async fn test_lost_commit_leaves_event_pending() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&user);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").build());
        engine.store.fail_finalize.store(true, Ordering::SeqCst);

        let ingested = engine.state.triggers.ingest(user_created(org.id, user.id)).await.unwrap();

        assert!(ingested.report.is_none());
        assert!(ingested.error.as_deref().unwrap().contains("commit lost"));
        assert_eq!(ingested.event.state, EventState::Pending);
        assert_eq!(ingested.event.attempts, 1);
        assert!(ingested.event.last_error.as_deref().unwrap().contains("commit lost"));
    }

    #[tokio::test]
    async fn test_missing_subject_user_releases_the_event() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        engine.store.add_organization(&org);
        let ghost = Uuid::new_v4();

        let event = engine.record(user_created(org.id, ghost)).await;
        let result = engine.state.triggers.processor().process_event(event.id).await;

        assert!(matches!(
            result,
            Err(ProcessError::SubjectUserMissing { user_id, .. }) if user_id == ghost
        ));
        let stored = engine.store.event(event.id).unwrap();
        assert_eq!(stored.state, EventState::Pending);
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    async fn test_subject_user_from_another_organization_is_refused() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let other_org = fixtures::organization("standard", "starter");
        let outsider = fixtures::user(other_org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_organization(&other_org);
        engine.store.add_user(&outsider);
        engine
            .store
            .add_workflow(&WorkflowFixture::new(org.id, "user_created").set_field("job_title", "Intern").build());

        let event = engine.record(user_created(org.id, outsider.id)).await;
        let result = engine.state.triggers.processor().process_event(event.id).await;

        assert!(matches!(
            result,
            Err(ProcessError::SubjectUserForeign { user_id, .. }) if user_id == outsider.id
        ));
        assert!(engine.store.runs_of(event.id).is_empty());
        assert_eq!(engine.store.user(outsider.id).unwrap().job_title, outsider.job_title);
        assert_eq!(engine.store.event(event.id).unwrap().state, EventState::Pending);
    }

    #[tokio::test]
    async fn test_unknown_event_id() {
        let engine = TestEngine::new();
        let missing = Uuid::new_v4();

        let result = engine.state.triggers.processor().process_event(missing).await;
        assert!(matches!(result, Err(ProcessError::EventNotFound(id)) if id == missing));
    }
}

// ============================================
// Test Trigger Tests
// ============================================

#[cfg(test)]
mod test_trigger_tests {
    use super::*;

    #[tokio::test]
    async fn test_run_test_marks_event_and_counts_actions() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let admin = fixtures::user(org.id, "admin", None);
        let user = fixtures::user(org.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_user(&admin);
        engine.store.add_user(&user);
        let workflow = WorkflowFixture::new(org.id, "user_updated")
            .set_field("job_title", "Director")
            .set_field("location", "Remote")
            .build();
        engine.store.add_workflow(&workflow);

        let outcome = engine
            .state
            .triggers
            .run_test(org.id, workflow.id, user.id, admin.id)
            .await
            .unwrap();

        assert_eq!(outcome.actions_executed, 2);
        let event = engine.store.event(outcome.event_id).unwrap();
        assert!(event.is_test());
        assert_eq!(event.source, EventSource::Manual);
        assert_eq!(event.data["workflowId"], json!(workflow.id));
        assert_eq!(event.data["triggeredBy"], json!(admin.id));
    }

    #[tokio::test]
    async fn test_run_test_rejects_users_of_other_organizations() {
        let engine = TestEngine::new();
        let org = fixtures::organization("standard", "starter");
        let other = fixtures::organization("standard", "starter");
        let outsider = fixtures::user(other.id, "member", None);
        engine.store.add_organization(&org);
        engine.store.add_organization(&other);
        engine.store.add_user(&outsider);
        let workflow = WorkflowFixture::new(org.id, "user_created").build();
        engine.store.add_workflow(&workflow);

        let result = engine
            .state
            .triggers
            .run_test(org.id, workflow.id, outsider.id, outsider.id)
            .await;

        assert!(matches!(result, Err(ProcessError::UserNotFound(_))));
        assert!(engine.store.events().is_empty());
    }
}
