// Directory Sync Job - pulls directory changes for due sync configurations and feeds them
// into the lifecycle engine

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sigflow_shared::SyncConfig;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::lifecycle::capabilities::Feature;
use crate::lifecycle::events::{EventSource, NewLifecycleEvent};
use crate::lifecycle::store::{StoreResult, Stores};
use crate::lifecycle::triggers::LifecycleTriggers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFrequency {
    Daily,
    Weekly,
}

impl SyncFrequency {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::days(7),
        }
    }

    /// Never-run configurations are always due
    pub fn is_due(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run_at {
            None => true,
            Some(last) => last + self.interval() <= now,
        }
    }
}

/// One normalized change reported by a directory feed
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryChange {
    pub user_id: Option<Uuid>,
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    changes: Vec<DirectoryChange>,
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("sync configuration has no endpoint URL")]
    MissingEndpoint,
    #[error("feed request failed: {0}")]
    Request(String),
    #[error("feed answered HTTP {0}")]
    Status(u16),
    #[error("feed returned an unreadable body: {0}")]
    Decode(String),
}

/// Source of normalized directory changes. Provider wire formats stay behind this trait.
#[async_trait]
pub trait DirectoryFeed: Send + Sync {
    async fn fetch_changes(
        &self,
        config: &SyncConfig,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DirectoryChange>, FeedError>;
}

pub struct HttpDirectoryFeed {
    http: reqwest::Client,
}

impl HttpDirectoryFeed {
    pub fn new(timeout: std::time::Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl DirectoryFeed for HttpDirectoryFeed {
    async fn fetch_changes(
        &self,
        config: &SyncConfig,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DirectoryChange>, FeedError> {
        let endpoint = config.endpoint_url.as_deref().ok_or(FeedError::MissingEndpoint)?;

        let mut request = self.http.get(endpoint);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = request.send().await.map_err(|e| FeedError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        let page: FeedPage = response.json().await.map_err(|e| FeedError::Decode(e.to_string()))?;
        Ok(page.changes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfigResult {
    pub config_id: Uuid,
    pub organization_id: Uuid,
    pub status: SyncStatus,
    pub events_created: usize,
    pub runs_created: usize,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SyncConfigResult {
    fn new(config: &SyncConfig, status: SyncStatus) -> Self {
        Self {
            config_id: config.id,
            organization_id: config.organization_id,
            status,
            events_created: 0,
            runs_created: 0,
            errors: Vec::new(),
            reason: None,
        }
    }

    fn skipped(config: &SyncConfig, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(config, SyncStatus::Skipped)
        }
    }

    fn failed(config: &SyncConfig, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            errors: vec![reason.clone()],
            reason: Some(reason),
            ..Self::new(config, SyncStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSweepReport {
    pub synced: usize,
    pub results: Vec<SyncConfigResult>,
    pub cancelled: bool,
}

pub struct DirectorySyncJob {
    stores: Stores,
    triggers: LifecycleTriggers,
    feed: Arc<dyn DirectoryFeed>,
    concurrency: usize,
}

impl DirectorySyncJob {
    pub fn new(stores: Stores, triggers: LifecycleTriggers, feed: Arc<dyn DirectoryFeed>, concurrency: usize) -> Self {
        Self {
            stores,
            triggers,
            feed,
            concurrency: concurrency.max(1),
        }
    }

    /// Sweep all due configurations. Cancellation is honoured between configurations only.
    pub async fn run(&self, cancel: &CancellationToken) -> StoreResult<SyncSweepReport> {
        let now = Utc::now();
        let configs = self.stores.sync_configs.active_sync_configs().await?;

        let mut results = Vec::new();
        let mut due = Vec::new();
        for config in configs {
            match SyncFrequency::parse(&config.frequency) {
                Some(frequency) if frequency.is_due(config.last_run_at, now) => due.push(config),
                Some(_) => {}
                None => results.push(SyncConfigResult::failed(
                    &config,
                    format!("unknown sync frequency '{}'", config.frequency),
                )),
            }
        }

        info!("Directory sync sweep: {} configuration(s) due", due.len());

        let synced_results: Vec<SyncConfigResult> = stream::iter(due)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|config| async move { self.sync_config(config).await })
            .buffered(self.concurrency)
            .collect()
            .await;
        results.extend(synced_results);

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!("Directory sync sweep cancelled before all configurations ran");
        }

        let synced = results.iter().filter(|r| r.status == SyncStatus::Synced).count();
        info!("Directory sync sweep finished: {} of {} synced", synced, results.len());

        Ok(SyncSweepReport {
            synced,
            results,
            cancelled,
        })
    }

    async fn sync_config(&self, config: SyncConfig) -> SyncConfigResult {
        match self.stores.features.has_feature(config.organization_id, Feature::DirectorySync).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Skipping sync config {}: plan lacks {}", config.id, Feature::DirectorySync);
                return SyncConfigResult::skipped(&config, format!("{} feature not on plan", Feature::DirectorySync));
            }
            Err(e) => return SyncConfigResult::failed(&config, format!("feature check failed: {}", e)),
        }

        let source = match EventSource::parse(&config.source) {
            Some(source @ (EventSource::HrSync | EventSource::DirectorySync)) => source,
            _ => return SyncConfigResult::failed(&config, format!("unsupported sync source '{}'", config.source)),
        };

        let started_at = Utc::now();
        let changes = match self.feed.fetch_changes(&config, config.last_run_at).await {
            Ok(changes) => changes,
            Err(e) => {
                warn!("Sync config {} feed error: {}", config.id, e);
                return SyncConfigResult::failed(&config, e.to_string());
            }
        };

        let mut result = SyncConfigResult::new(&config, SyncStatus::Synced);
        let mut unrecorded = 0;
        for change in changes {
            let data = if change.data.is_null() { serde_json::json!({}) } else { change.data };
            let new_event = NewLifecycleEvent::new(config.organization_id, change.user_id, change.event_type, source)
                .with_data(data);

            match self.triggers.ingest(new_event).await {
                Ok(ingested) => {
                    result.events_created += 1;
                    result.runs_created += ingested.runs_created();
                    if let Some(err) = ingested.error {
                        result.errors.push(format!("event {}: {}", ingested.event.id, err));
                    }
                }
                Err(e) => {
                    error!("Sync config {} failed to record change: {}", config.id, e);
                    unrecorded += 1;
                    result.errors.push(e.to_string());
                }
            }
        }

        // The feed only returns changes after lastRunAt, so it must not move past a lost change
        if unrecorded > 0 {
            warn!(
                "Sync config {}: {} change(s) not recorded, keeping last run time",
                config.id, unrecorded
            );
            result.status = SyncStatus::Failed;
            result.reason = Some(format!("{} change(s) could not be recorded", unrecorded));
        } else if let Err(e) = self.stores.sync_configs.mark_sync_run(config.id, started_at).await {
            result.errors.push(format!("failed to update last run time: {}", e));
        }

        info!(
            "Synced config {}: {} event(s), {} run(s), {} error(s)",
            config.id,
            result.events_created,
            result.runs_created,
            result.errors.len()
        );
        result
    }
}
