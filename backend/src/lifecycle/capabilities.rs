// Capabilities - plan/feature gating resolved once and passed down

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use super::store::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    WorkflowAutomation,
    /// Elevated tier: webhook actions and cascading to client organizations
    AdvancedWorkflows,
    DirectorySync,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowAutomation => "workflow_automation",
            Self::AdvancedWorkflows => "advanced_workflows",
            Self::DirectorySync => "directory_sync",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean plan gate owned by the billing side
#[async_trait]
pub trait FeatureGate: Send + Sync {
    async fn has_feature(&self, organization_id: Uuid, feature: Feature) -> StoreResult<bool>;
}

/// Plan tiers, cumulative in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlanTier {
    Free,
    Starter,
    Business,
    Msp,
}

impl PlanTier {
    /// Unknown plans fall back to `Free`
    pub fn parse(plan: &str) -> Self {
        match plan.trim().to_ascii_lowercase().as_str() {
            "starter" => Self::Starter,
            "business" => Self::Business,
            "msp" => Self::Msp,
            _ => Self::Free,
        }
    }

    pub fn includes(&self, feature: Feature) -> bool {
        match feature {
            Feature::WorkflowAutomation => *self >= Self::Starter,
            Feature::DirectorySync => *self >= Self::Business,
            Feature::AdvancedWorkflows => *self >= Self::Business,
        }
    }
}

/// Feature switches for one organization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub organization_id: Uuid,
    pub workflow_automation: bool,
    pub advanced_workflows: bool,
    pub directory_sync: bool,
}

impl Capabilities {
    pub async fn load(gate: &dyn FeatureGate, organization_id: Uuid) -> StoreResult<Self> {
        Ok(Self {
            organization_id,
            workflow_automation: gate.has_feature(organization_id, Feature::WorkflowAutomation).await?,
            advanced_workflows: gate.has_feature(organization_id, Feature::AdvancedWorkflows).await?,
            directory_sync: gate.has_feature(organization_id, Feature::DirectorySync).await?,
        })
    }

    #[cfg(test)]
    pub fn all(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            workflow_automation: true,
            advanced_workflows: true,
            directory_sync: true,
        }
    }

    pub fn allows(&self, feature: Feature) -> bool {
        match feature {
            Feature::WorkflowAutomation => self.workflow_automation,
            Feature::AdvancedWorkflows => self.advanced_workflows,
            Feature::DirectorySync => self.directory_sync,
        }
    }
}
