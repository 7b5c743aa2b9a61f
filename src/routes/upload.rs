use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use std::sync::Arc;

use crate::{
    error::AppError,
    models::UploadResponse,
    routes::run_blocking,
    services::file_processor,
    AppState,
};

/// Set by the authentication layer in front of this service.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const ANONYMOUS_USER: &str = "anonymous";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/upload", post(upload_csv))
}

async fn upload_csv(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string();

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::InvalidInput("Uploaded file has no filename".to_string()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidInput(format!("Failed to read upload: {}", e)))?;
        upload = Some((filename, data));
        break;
    }

    let (filename, data) =
        upload.ok_or_else(|| AppError::InvalidInput("No file provided".to_string()))?;

    let response = run_blocking(move || {
        file_processor::process_upload(&state.store, &state.registry, &user_id, &filename, data)
    })
    .await?;

    Ok(Json(response))
}
