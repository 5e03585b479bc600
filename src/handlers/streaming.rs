use std::io::SeekFrom;
use std::path::Path;

use axum::body::StreamBody;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::db;
use crate::hasher;
use crate::models::NewMediaFile;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub path: String,
}

/// Serves a video file with byte-range support. Responds 206 exactly when
/// the request carried a Range header; Content-Range and Accept-Ranges are
/// always present for non-empty files. Each request that serves bytes also
/// lazily indexes the file if it is unknown and counts one view; neither may
/// fail the stream, and a rejected range counts nothing.
pub async fn stream_handler(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    if q.path.contains("..") {
        return Err((StatusCode::BAD_REQUEST, "path traversal rejected".to_string()));
    }

    let fs_meta = tokio::fs::metadata(&q.path)
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, format!("no such file: {}", q.path)))?;
    if !fs_meta.is_file() {
        return Err((StatusCode::NOT_FOUND, format!("not a file: {}", q.path)));
    }
    let size = fs_meta.len();

    let mime = mime_guess::from_path(&q.path).first_or_octet_stream();
    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    if size == 0 {
        account_view(&state, &q.path, &fs_meta).await;
        let mut response_headers = HeaderMap::new();
        insert_header(&mut response_headers, header::CONTENT_TYPE, mime.as_ref());
        insert_header(&mut response_headers, header::ACCEPT_RANGES, "bytes");
        insert_header(&mut response_headers, header::CONTENT_LENGTH, "0");
        return Ok((StatusCode::OK, response_headers).into_response());
    }

    let Some((start, end, partial)) = parse_range(range_header, size) else {
        return Err((
            StatusCode::RANGE_NOT_SATISFIABLE,
            format!("unsatisfiable range for {size} bytes"),
        ));
    };
    let length = end - start + 1;

    // only requests that will actually serve bytes count as views
    account_view(&state, &q.path, &fs_meta).await;

    let mut file = tokio::fs::File::open(&q.path)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    file.seek(SeekFrom::Start(start))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let body = StreamBody::new(ReaderStream::new(file.take(length)));

    let mut response_headers = HeaderMap::new();
    insert_header(&mut response_headers, header::CONTENT_TYPE, mime.as_ref());
    insert_header(&mut response_headers, header::ACCEPT_RANGES, "bytes");
    insert_header(
        &mut response_headers,
        header::CONTENT_LENGTH,
        &length.to_string(),
    );
    insert_header(
        &mut response_headers,
        header::CONTENT_RANGE,
        &format!("bytes {start}-{end}/{size}"),
    );

    let status = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    Ok((status, response_headers, body).into_response())
}

fn insert_header(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Resolves a Range header against the file size. `None` means the request
/// asked for an unsatisfiable range. An absent or non-bytes header resolves
/// to the full file with `partial` false; an empty start bound means zero
/// and an empty end bound means end of file, clamped to the last byte.
pub(crate) fn parse_range(header: Option<&str>, size: u64) -> Option<(u64, u64, bool)> {
    let last = size.saturating_sub(1);
    let Some(raw) = header else {
        return Some((0, last, false));
    };
    let Some(spec) = raw.trim().strip_prefix("bytes=") else {
        return Some((0, last, false));
    };
    if spec.contains(',') {
        return None;
    }
    let (start_raw, end_raw) = spec.split_once('-')?;
    let start = if start_raw.trim().is_empty() {
        0
    } else {
        start_raw.trim().parse::<u64>().ok()?
    };
    let end = if end_raw.trim().is_empty() {
        last
    } else {
        end_raw.trim().parse::<u64>().ok()?.min(last)
    };
    if size == 0 || start > end || start >= size {
        return None;
    }
    Some((start, end, true))
}

/// Best-effort view accounting: index the file if it has never been scanned,
/// then bump its view count. Failures are logged and never block playback.
async fn account_view(state: &AppState, path: &str, fs_meta: &std::fs::Metadata) {
    match db::get_file_by_path(&state.pool, path).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            if let Err(e) = index_on_first_view(state, path, fs_meta).await {
                warn!("lazy indexing failed for {path}: {e}");
                return;
            }
        }
        Err(e) => {
            warn!("view lookup failed for {path}: {e}");
            return;
        }
    }
    if let Err(e) = db::record_view(&state.pool, path).await {
        warn!("failed to record view for {path}: {e}");
    }
}

async fn index_on_first_view(
    state: &AppState,
    path: &str,
    fs_meta: &std::fs::Metadata,
) -> crate::error::Result<()> {
    debug!("indexing {path} on first view");
    let fingerprint = hasher::fingerprint_file(Path::new(path)).await?;
    let meta = state.metadata.resolve(path).await;
    let record = NewMediaFile::new(
        fingerprint,
        path.to_string(),
        fs_meta.len() as i64,
        fs_meta.created().ok().map(DateTime::<Utc>::from),
        fs_meta.modified().ok().map(DateTime::<Utc>::from),
        &meta,
    );
    db::insert_file(&state.pool, &record).await?;
    state.metadata.prime(path, &meta).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_range;

    #[test]
    fn absent_header_serves_full_file() {
        assert_eq!(parse_range(None, 100), Some((0, 99, false)));
    }

    #[test]
    fn non_bytes_unit_serves_full_file() {
        assert_eq!(parse_range(Some("items=0-5"), 100), Some((0, 99, false)));
    }

    #[test]
    fn explicit_range_is_partial() {
        assert_eq!(parse_range(Some("bytes=10-19"), 100), Some((10, 19, true)));
    }

    #[test]
    fn open_ended_range_runs_to_last_byte() {
        assert_eq!(parse_range(Some("bytes=90-"), 100), Some((90, 99, true)));
    }

    #[test]
    fn empty_start_means_zero() {
        assert_eq!(parse_range(Some("bytes=-19"), 100), Some((0, 19, true)));
    }

    #[test]
    fn end_is_clamped_to_file_size() {
        assert_eq!(parse_range(Some("bytes=50-5000"), 100), Some((50, 99, true)));
    }

    #[test]
    fn start_past_end_of_file_is_unsatisfiable() {
        assert_eq!(parse_range(Some("bytes=100-"), 100), None);
        assert_eq!(parse_range(Some("bytes=200-300"), 100), None);
    }

    #[test]
    fn inverted_and_garbage_ranges_are_unsatisfiable() {
        assert_eq!(parse_range(Some("bytes=20-10"), 100), None);
        assert_eq!(parse_range(Some("bytes=abc-def"), 100), None);
        assert_eq!(parse_range(Some("bytes=0-1,5-6"), 100), None);
    }
}
