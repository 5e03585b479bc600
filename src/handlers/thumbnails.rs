use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::error_response;
use crate::state::AppState;
use crate::thumbs::{self, ThumbSummary};

#[derive(Debug, Deserialize)]
pub struct ThumbRequest {
    pub playlist: String,
}

/// Runs thumbnail generation for one saved playlist and reports the counts.
/// Long-running by design; the client keeps the request open.
pub async fn regenerate_thumbnails(
    State(state): State<AppState>,
    Query(req): Query<ThumbRequest>,
) -> Result<Json<ThumbSummary>, (StatusCode, String)> {
    let summary = thumbs::process_playlist(&state, &req.playlist)
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}
