use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::AppState;

pub mod cron;
pub mod lifecycle;

pub use cron::cron_routes;
pub use lifecycle::lifecycle_routes;

/// Full HTTP surface
pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Sigflow Lifecycle API v0.1.0" }))
        .route("/health", get(health_check))
        .nest("/lifecycle", lifecycle_routes())
        .nest("/cron", cron_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match &state.db_pool {
        Some(pool) => crate::database::health_check(pool).await,
        None => true,
    };

    if database {
        (StatusCode::OK, Json(json!({"status": "healthy", "service": "sigflow-lifecycle"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded", "service": "sigflow-lifecycle", "database": "unreachable"})),
        )
    }
}
