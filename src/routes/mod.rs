use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::AppError, services::table::Table, AppState};

pub mod dataset;
pub mod query;
pub mod stats;
pub mod upload;

/// Assembles the full HTTP surface.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/api/upload", upload::routes())
        .nest("/api/dataset", dataset::routes())
        .nest("/api/stats", stats::routes())
        .nest("/api/query", query::routes())
        .layer(DefaultBodyLimit::max(state.config.max_file_size))
        .layer(cors_layer(state.config.cors_allow_origin.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(origin) => AllowOrigin::exact(origin),
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "AI Dashboard API is running" }))
}

async fn health_check() -> &'static str {
    "OK"
}

/// Runs filesystem/CPU-bound work off the async executor.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("Background task failed: {}", e)))?
}

/// Loads a table or fails with the not-found error every endpoint reports.
pub(crate) async fn load_table(state: &Arc<AppState>, dataset_id: &str) -> Result<Arc<Table>, AppError> {
    let store = state.store.clone();
    let id = dataset_id.to_string();
    run_blocking(move || store.load(&id))
        .await?
        .ok_or_else(AppError::dataset_not_found)
}
