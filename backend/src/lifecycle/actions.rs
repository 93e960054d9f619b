// Workflow Actions - what a workflow does once it matches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigflow_shared::ActionResultRow;
use std::fmt;
use uuid::Uuid;

/// Discriminant of [`ActionSpec`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Webhook,
    Email,
    UpdateUserField,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Email => "email",
            Self::UpdateUserField => "update_user_field",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "webhook" => Some(Self::Webhook),
            "email" => Some(Self::Email),
            "update_user_field" => Some(Self::UpdateUserField),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User record fields a workflow may overwrite
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserField {
    Department,
    JobTitle,
    Phone,
    Location,
}

impl UserField {
    /// Column name in `users`
    pub fn column(&self) -> &'static str {
        match self {
            Self::Department => "department",
            Self::JobTitle => "job_title",
            Self::Phone => "phone",
            Self::Location => "location",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmailRecipient {
    SubjectUser,
    Address { email: String },
}

/// One step of a workflow. Each variant carries only what its kind needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    Webhook {
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    Email {
        template_id: Uuid,
        recipient: EmailRecipient,
    },
    UpdateUserField {
        field: UserField,
        value: String,
    },
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Webhook { .. } => ActionKind::Webhook,
            Self::Email { .. } => ActionKind::Email,
            Self::UpdateUserField { .. } => ActionKind::UpdateUserField,
        }
    }

    pub fn webhook(url: &str) -> Self {
        Self::Webhook { url: url.to_string() }
    }

    pub fn email_subject(template_id: Uuid) -> Self {
        Self::Email {
            template_id,
            recipient: EmailRecipient::SubjectUser,
        }
    }

    pub fn set_user_field(field: UserField, value: &str) -> Self {
        Self::UpdateUserField {
            field,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of executing one action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub kind: ActionKind,
    pub status: ActionStatus,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub executed_at: DateTime<Utc>,
}

impl ActionResult {
    pub fn completed(kind: ActionKind) -> Self {
        Self {
            kind,
            status: ActionStatus::Completed,
            error: None,
            duration_ms: 0,
            executed_at: Utc::now(),
        }
    }

    pub fn failed(kind: ActionKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            status: ActionStatus::Failed,
            error: Some(error.into()),
            duration_ms: 0,
            executed_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == ActionStatus::Completed
    }
}

impl TryFrom<ActionResultRow> for ActionResult {
    type Error = String;

    fn try_from(row: ActionResultRow) -> Result<Self, Self::Error> {
        let kind = ActionKind::parse(&row.kind).ok_or_else(|| format!("unknown action kind '{}'", row.kind))?;
        let status = match row.status.as_str() {
            "completed" => ActionStatus::Completed,
            "failed" => ActionStatus::Failed,
            other => return Err(format!("unknown action status '{}'", other)),
        };

        Ok(Self {
            kind,
            status,
            error: row.error,
            duration_ms: row.duration_ms,
            executed_at: row.executed_at,
        })
    }
}
