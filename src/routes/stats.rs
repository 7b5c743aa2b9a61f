use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::{
    error::AppError,
    models::StatsResult,
    routes::{load_table, run_blocking},
    services::stats,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/stats/:dataset_id", get(get_stats))
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<String>,
) -> Result<Json<StatsResult>, AppError> {
    let start = std::time::Instant::now();
    let table = load_table(&state, &dataset_id).await?;

    let result = run_blocking(move || Ok(stats::statistics(&table))).await?;
    tracing::info!(
        "Stats for {}: {} columns, {} charts in {:?}",
        dataset_id,
        result.stats.len(),
        result.charts.len(),
        start.elapsed()
    );

    Ok(Json(result))
}
