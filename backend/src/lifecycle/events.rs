// Lifecycle Events - facts about organizational changes that may trigger workflows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigflow_shared::LifecycleEventRow;
use std::fmt;
use uuid::Uuid;

/// Recognized event types. Events with any other type are stored but match nothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserCreated,
    UserUpdated,
    DepartmentChanged,
    UserDeactivated,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::UserCreated,
        EventType::UserUpdated,
        EventType::DepartmentChanged,
        EventType::UserDeactivated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreated => "user_created",
            Self::UserUpdated => "user_updated",
            Self::DepartmentChanged => "department_changed",
            Self::UserDeactivated => "user_deactivated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producer of an event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    HrSync,
    Manual,
    Api,
    DirectorySync,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HrSync => "hr_sync",
            Self::Manual => "manual",
            Self::Api => "api",
            Self::DirectorySync => "directory_sync",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hr_sync" => Some(Self::HrSync),
            "manual" => Some(Self::Manual),
            "api" => Some(Self::Api),
            "directory_sync" => Some(Self::DirectorySync),
            _ => None,
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state. `Processing` is only ever held under a version-guarded claim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Pending,
    Processing,
    Processed,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "processed" => Some(Self::Processed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    /// Raw type as produced; see [`LifecycleEvent::kind`]
    pub event_type: String,
    pub source: EventSource,
    pub data: serde_json::Value,
    pub state: EventState,
    pub version: i32,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl LifecycleEvent {
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    pub fn is_processed(&self) -> bool {
        self.state == EventState::Processed
    }

    /// String attribute from the payload, ignoring blanks
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_test(&self) -> bool {
        self.data.get("test").and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

impl TryFrom<LifecycleEventRow> for LifecycleEvent {
    type Error = String;

    fn try_from(row: LifecycleEventRow) -> Result<Self, Self::Error> {
        let source = EventSource::parse(&row.event_source)
            .ok_or_else(|| format!("unknown event source '{}'", row.event_source))?;
        let state = EventState::parse(&row.state)
            .ok_or_else(|| format!("unknown event state '{}'", row.state))?;

        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            user_id: row.user_id,
            event_type: row.event_type,
            source,
            data: row.event_data,
            state,
            version: row.version,
            attempts: row.attempts,
            last_error: row.last_error,
            processing_started_at: row.processing_started_at,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

/// An event about to be recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLifecycleEvent {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub source: EventSource,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl NewLifecycleEvent {
    pub fn new(organization_id: Uuid, user_id: Option<Uuid>, event_type: impl Into<String>, source: EventSource) -> Self {
        Self {
            organization_id,
            user_id,
            event_type: event_type.into(),
            source,
            data: empty_object(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Synthetic manual event used by the workflow test endpoint
    pub fn test_event(
        organization_id: Uuid,
        user_id: Uuid,
        event_type: impl Into<String>,
        workflow_id: Uuid,
        triggered_by: Uuid,
    ) -> Self {
        Self::new(organization_id, Some(user_id), event_type, EventSource::Manual).with_data(
            serde_json::json!({
                "test": true,
                "workflowId": workflow_id,
                "triggeredBy": triggered_by,
            }),
        )
    }
}
