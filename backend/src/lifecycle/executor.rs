// Action Executor - runs one action and captures its outcome

use chrono::Utc;
use sigflow_shared::{Organization, User};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::{ActionKind, ActionResult, ActionSpec, EmailRecipient, UserField};
use super::capabilities::{Capabilities, Feature};
use super::events::LifecycleEvent;
use super::store::{Directory, WorkflowStore};
use crate::services::email::{render_template, EmailSender, OutgoingEmail};
use crate::services::webhook::{WebhookClient, WebhookEnvelope};

/// Everything an action may read. `owner_organization_id` and `capabilities` belong to the
/// workflow being executed, which differs from the event's organization for cascaded workflows.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub event: LifecycleEvent,
    pub organization: Organization,
    pub user: Option<User>,
    pub owner_organization_id: Uuid,
    pub capabilities: Capabilities,
}

impl ExecutionContext {
    pub fn new(event: LifecycleEvent, organization: Organization, user: Option<User>) -> Self {
        let owner_organization_id = organization.id;
        Self {
            event,
            capabilities: Capabilities {
                organization_id: owner_organization_id,
                ..Capabilities::default()
            },
            organization,
            user,
            owner_organization_id,
        }
    }

    /// Switch to the workflow about to run
    pub fn enter_workflow(&mut self, owner_organization_id: Uuid, capabilities: Capabilities) {
        self.owner_organization_id = owner_organization_id;
        self.capabilities = capabilities;
    }

    /// Template variables: event payload strings first, then fixed names which win on conflict
    pub fn template_variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();

        if let Some(data) = self.event.data.as_object() {
            for (key, value) in data {
                if let Some(s) = value.as_str() {
                    vars.insert(key.clone(), s.to_string());
                }
            }
        }

        vars.insert("event_type".into(), self.event.event_type.clone());
        vars.insert("organization_name".into(), self.organization.name.clone());

        if let Some(user) = &self.user {
            vars.insert("email".into(), user.email.clone());
            vars.insert("full_name".into(), user.full_name());
            vars.insert("first_name".into(), user.first_name.clone());
            vars.insert("last_name".into(), user.last_name.clone());
            let optional = [
                ("department", &user.department),
                ("job_title", &user.job_title),
                ("phone", &user.phone),
                ("location", &user.location),
            ];
            for (key, value) in optional {
                vars.insert(key.into(), value.clone().unwrap_or_default());
            }
        }

        vars
    }
}

/// Executes actions one at a time. Never returns an error: every failure becomes a
/// failed [`ActionResult`].
pub struct ActionExecutor {
    directory: Arc<dyn Directory>,
    workflows: Arc<dyn WorkflowStore>,
    email: Arc<dyn EmailSender>,
    webhooks: WebhookClient,
}

impl ActionExecutor {
    pub fn new(
        directory: Arc<dyn Directory>,
        workflows: Arc<dyn WorkflowStore>,
        email: Arc<dyn EmailSender>,
        webhooks: WebhookClient,
    ) -> Self {
        Self {
            directory,
            workflows,
            email,
            webhooks,
        }
    }

    pub async fn execute(&self, action: &ActionSpec, ctx: &mut ExecutionContext) -> ActionResult {
        let kind = action.kind();
        let started = Instant::now();
        let executed_at = Utc::now();

        let outcome = match action {
            ActionSpec::Webhook { url } => self.webhook(url, ctx).await,
            ActionSpec::Email { template_id, recipient } => self.email(*template_id, recipient, ctx).await,
            ActionSpec::UpdateUserField { field, value } => self.update_user_field(*field, value, ctx).await,
        };

        let mut result = match outcome {
            Ok(()) => ActionResult::completed(kind),
            Err(error) => {
                warn!("{} action for event {} failed: {}", kind, ctx.event.id, error);
                ActionResult::failed(kind, error)
            }
        };
        result.executed_at = executed_at;
        result.with_duration(started.elapsed().as_millis() as i64)
    }

    async fn webhook(&self, url: &str, ctx: &ExecutionContext) -> Result<(), String> {
        require(ctx, Feature::AdvancedWorkflows, ActionKind::Webhook)?;

        let envelope = WebhookEnvelope {
            event_type: ctx.event.event_type.clone(),
            user_id: ctx.event.user_id,
            event_data: ctx.event.data.clone(),
            timestamp: Utc::now(),
        };

        self.webhooks.deliver(url, &envelope).await
    }

    async fn email(&self, template_id: Uuid, recipient: &EmailRecipient, ctx: &ExecutionContext) -> Result<(), String> {
        let template = self
            .workflows
            .get_email_template(ctx.owner_organization_id, template_id)
            .await
            .map_err(|e| format!("failed to load email template: {}", e))?
            .ok_or_else(|| format!("email template {} not found", template_id))?;

        let (to_email, to_name) = match recipient {
            EmailRecipient::SubjectUser => {
                let user = ctx.user.as_ref().ok_or("event has no subject user to email")?;
                (user.email.clone(), Some(user.full_name()).filter(|n| !n.is_empty()))
            }
            EmailRecipient::Address { email } => (email.clone(), None),
        };

        let vars = ctx.template_variables();
        let email = OutgoingEmail {
            to_email,
            to_name,
            subject: render_template(&template.subject, &vars),
            html_body: render_template(&template.html_body, &vars),
            text_body: template.text_body.as_deref().map(|t| render_template(t, &vars)),
        };

        self.email.send(&email).await.map_err(|e| e.to_string())?;
        info!("Sent '{}' to {} for event {}", template.name, email.to_email, ctx.event.id);
        Ok(())
    }

    async fn update_user_field(&self, field: UserField, value: &str, ctx: &mut ExecutionContext) -> Result<(), String> {
        let user_id = ctx
            .user
            .as_ref()
            .map(|u| u.id)
            .ok_or("event has no subject user to update")?;

        let updated = self
            .directory
            .update_user_field(user_id, field, value)
            .await
            .map_err(|e| format!("failed to update {}: {}", field.column(), e))?
            .ok_or_else(|| format!("user {} no longer exists", user_id))?;

        ctx.user = Some(updated);
        Ok(())
    }
}

fn require(ctx: &ExecutionContext, feature: Feature, kind: ActionKind) -> Result<(), String> {
    if ctx.capabilities.allows(feature) {
        Ok(())
    } else {
        Err(format!("{} actions require the {} feature on the organization's plan", kind, feature))
    }
}
