use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod lifecycle;
mod pagination;
mod services;

pub use error::{ApiError, ApiResult, AppError};
pub use pagination::{PaginatedResponse, PaginationParams};

use config::LifecycleConfig;
use jobs::{DirectoryFeed, DirectorySyncJob, HttpDirectoryFeed, JobScheduler, PendingEventsJob, SweepRunner};
use lifecycle::executor::ActionExecutor;
use lifecycle::postgres::PgStore;
use lifecycle::{EventProcessor, LifecycleTriggers, Stores};
use services::{DisabledEmailSender, EmailSender, EmailService, WebhookClient};


const FEED_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AppState {
    /// `None` when running on in-memory stores
    pub db_pool: Option<PgPool>,
    pub jwt_secret: String,
    pub cron_secret: Option<String>,
    pub stores: Stores,
    pub triggers: LifecycleTriggers,
    pub sweeps: SweepRunner,
}

impl AppState {
    /// Wire the engine, triggers and sweeps on top of a set of stores
    pub fn build(
        stores: Stores,
        email: Arc<dyn EmailSender>,
        feed: Arc<dyn DirectoryFeed>,
        settings: &LifecycleConfig,
        jwt_secret: String,
        cron_secret: Option<String>,
        db_pool: Option<PgPool>,
    ) -> anyhow::Result<Self> {
        let webhooks = WebhookClient::new(Duration::from_secs(settings.webhook_timeout_secs))?;
        let executor = ActionExecutor::new(stores.directory.clone(), stores.workflows.clone(), email, webhooks);
        let processor = Arc::new(EventProcessor::new(
            stores.clone(),
            executor,
            chrono::Duration::minutes(settings.stale_claim_minutes),
        ));
        let triggers = LifecycleTriggers::new(stores.clone(), processor.clone());

        let sync_job = Arc::new(DirectorySyncJob::new(
            stores.clone(),
            triggers.clone(),
            feed,
            settings.sweep_concurrency,
        ));
        let pending_job = Arc::new(PendingEventsJob::new(
            stores.clone(),
            processor,
            settings.max_event_attempts,
            settings.sweep_concurrency,
        ));
        let sweeps = SweepRunner::new(sync_job, pending_job, CancellationToken::new());

        Ok(Self {
            db_pool,
            jwt_secret,
            cron_secret,
            stores,
            triggers,
            sweeps,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::connect(&config.database_url, database::PoolConfig::from_env()).await?;
    let stores = Stores::from_single(Arc::new(PgStore::new(db_pool.clone())));

    let email: Arc<dyn EmailSender> = if config.smtp.is_configured() {
        Arc::new(EmailService::new(&config.smtp)?)
    } else {
        tracing::warn!("SMTP not configured, email actions will fail");
        Arc::new(DisabledEmailSender)
    };
    let feed = Arc::new(HttpDirectoryFeed::new(FEED_TIMEOUT)?);

    let app_state = Arc::new(AppState::build(
        stores,
        email,
        feed,
        &config.lifecycle,
        config.jwt_secret.clone(),
        config.cron_secret.clone(),
        Some(db_pool),
    )?);

    let scheduler = JobScheduler::new(app_state.sweeps.clone(), config.lifecycle.clone()).await?;
    scheduler.start().await?;

    let app = handlers::app_router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
