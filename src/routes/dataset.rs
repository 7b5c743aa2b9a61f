use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::{
    error::AppError,
    models::DatasetInfoResponse,
    routes::load_table,
    services::stats,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/:dataset_id", get(get_dataset))
}

async fn get_dataset(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<String>,
) -> Result<Json<DatasetInfoResponse>, AppError> {
    let table = load_table(&state, &dataset_id).await?;

    Ok(Json(DatasetInfoResponse {
        dataset_id,
        info: stats::describe(&table),
    }))
}
