// Workflow definitions - administrator rules, validated when written

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigflow_shared::{Organization, WorkflowRow};
use std::collections::HashSet;
use uuid::Uuid;

use super::actions::ActionSpec;
use super::capabilities::{Capabilities, Feature};
use super::events::EventType;
use super::filters::WorkflowFilter;
use crate::error::{ApiError, AppError, ValidationBuilder};

pub const MAX_NAME_LENGTH: usize = 200;
pub const MAX_ACTIONS: usize = 20;
pub const MAX_FIELD_VALUE_LENGTH: usize = 255;

/// A decoded, executable workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub event_type: EventType,
    pub is_active: bool,
    pub priority: i32,
    pub filters: Vec<WorkflowFilter>,
    pub actions: Vec<ActionSpec>,
    pub cascade_to_clients: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&WorkflowRow> for Workflow {
    type Error = String;

    fn try_from(row: &WorkflowRow) -> Result<Self, Self::Error> {
        let event_type = EventType::parse(&row.event_type)
            .ok_or_else(|| format!("unrecognized event type '{}'", row.event_type))?;
        let filters: Vec<WorkflowFilter> = if row.filters.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(row.filters.clone()).map_err(|e| format!("malformed filters: {}", e))?
        };
        let actions: Vec<ActionSpec> =
            serde_json::from_value(row.actions.clone()).map_err(|e| format!("malformed actions: {}", e))?;

        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name.clone(),
            description: row.description.clone(),
            event_type,
            is_active: row.is_active,
            priority: row.priority,
            filters,
            actions,
            cascade_to_clients: row.cascade_to_clients,
            created_at: row.created_at,
        })
    }
}

/// Create/update request body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInput {
    pub name: String,
    pub description: Option<String>,
    pub event_type: String,
    pub is_active: Option<bool>,
    pub priority: Option<i32>,
    #[serde(default)]
    pub filters: Vec<WorkflowFilter>,
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub cascade_to_clients: bool,
}

/// Input that passed validation and plan gates, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub event_type: EventType,
    pub is_active: bool,
    pub priority: i32,
    pub filters: Vec<WorkflowFilter>,
    pub actions: Vec<ActionSpec>,
    pub cascade_to_clients: bool,
}

impl ValidatedWorkflow {
    pub fn email_template_ids(&self) -> Vec<Uuid> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                ActionSpec::Email { template_id, .. } => Some(*template_id),
                _ => None,
            })
            .collect()
    }
}

pub fn is_msp(organization: &Organization) -> bool {
    organization.organization_type.eq_ignore_ascii_case("msp")
}

impl WorkflowInput {
    /// Structural validation followed by plan gates for elevated features
    pub fn validate(self, capabilities: &Capabilities, organization: &Organization) -> Result<ValidatedWorkflow, AppError> {
        let mut errors = ValidationBuilder::new();

        let name = self.name.trim().to_string();
        if name.is_empty() {
            errors.push("name", "Name is required");
        } else if name.chars().count() > MAX_NAME_LENGTH {
            errors.push("name", &format!("Name must be {} characters or less", MAX_NAME_LENGTH));
        }

        let event_type = EventType::parse(self.event_type.trim());
        if event_type.is_none() {
            errors.push("eventType", &format!("Unrecognized event type '{}'", self.event_type));
        }

        let mut seen = HashSet::new();
        for filter in &self.filters {
            if filter.is_empty() {
                errors.push("filters", &format!("The {} filter needs at least one value", filter.kind()));
            }
            if !seen.insert(filter.kind()) {
                errors.push("filters", &format!("Only one {} filter is allowed", filter.kind()));
            }
        }

        if self.actions.is_empty() {
            errors.push("actions", "At least one action is required");
        } else if self.actions.len() > MAX_ACTIONS {
            errors.push("actions", &format!("A workflow may have at most {} actions", MAX_ACTIONS));
        }

        for (index, action) in self.actions.iter().enumerate() {
            let field = format!("actions[{}]", index);
            match action {
                ActionSpec::Webhook { url } => {
                    if let Err(message) = validate_webhook_url(url) {
                        errors.push(&field, &message);
                    }
                }
                ActionSpec::Email { recipient, .. } => {
                    if let super::actions::EmailRecipient::Address { email } = recipient {
                        if !email.contains('@') || email.trim().len() < 3 {
                            errors.push(&field, "Recipient email address is invalid");
                        }
                    }
                }
                ActionSpec::UpdateUserField { value, .. } => {
                    if value.chars().count() > MAX_FIELD_VALUE_LENGTH {
                        errors.push(
                            &field,
                            &format!("Field value must be {} characters or less", MAX_FIELD_VALUE_LENGTH),
                        );
                    }
                }
            }
        }

        if self.cascade_to_clients && !is_msp(organization) {
            errors.push("cascadeToClients", "Only MSP organizations can cascade workflows to clients");
        }

        if let Some(err) = errors.build() {
            return Err(err);
        }
        let event_type = event_type
            .ok_or_else(|| ApiError::validation_single("eventType", "Event type is required"))?;

        let uses_webhooks = self.actions.iter().any(|a| matches!(a, ActionSpec::Webhook { .. }));
        if (uses_webhooks || self.cascade_to_clients) && !capabilities.allows(Feature::AdvancedWorkflows) {
            return Err(AppError::FeatureNotAvailable {
                feature: Feature::AdvancedWorkflows.to_string(),
            });
        }

        Ok(ValidatedWorkflow {
            name,
            description: self.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            event_type,
            is_active: self.is_active.unwrap_or(true),
            priority: self.priority.unwrap_or(0),
            filters: self.filters,
            actions: self.actions,
            cascade_to_clients: self.cascade_to_clients,
        })
    }
}

fn validate_webhook_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| format!("Webhook URL is invalid: {}", e))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        "http" | "https" => Err("Webhook URL must include a host".to_string()),
        other => Err(format!("Webhook URL scheme '{}' is not allowed", other)),
    }
}
