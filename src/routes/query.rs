use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use std::sync::Arc;

use crate::{
    error::AppError,
    models::{QueryRequest, QueryResponse},
    routes::load_table,
    services::context,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/query", post(query_data))
}

async fn query_data(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(request) = payload?;
    tracing::info!(
        "Query received for dataset {} with {} prior turns",
        request.dataset_id,
        request.history.len()
    );

    if request.question.trim().is_empty() {
        return Err(AppError::InvalidInput("Question must not be empty".to_string()));
    }

    let table = load_table(&state, &request.dataset_id).await?;

    let agent = state
        .llm
        .as_ref()
        .ok_or_else(|| AppError::Unconfigured("GROQ_API_KEY not set.".to_string()))?;

    let prompt = context::build_context(&table, &request.question, &request.history)?;
    let answer = agent.answer(&prompt).await?;

    Ok(Json(QueryResponse { answer }))
}
