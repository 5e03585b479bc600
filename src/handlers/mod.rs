pub mod core;
pub mod streaming;
pub mod thumbnails;

use axum::http::StatusCode;
use tracing::error;

use crate::error::VindexError;

/// Maps domain errors onto the wire. Anything that is not a clean miss is an
/// internal error and gets logged here, once.
pub(crate) fn error_response(e: VindexError) -> (StatusCode, String) {
    if e.is_not_found() {
        (StatusCode::NOT_FOUND, e.to_string())
    } else {
        error!("request failed: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

pub(crate) fn db_error_response(e: sqlx::Error) -> (StatusCode, String) {
    error_response(VindexError::Db(e))
}
