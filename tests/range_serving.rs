use std::path::Path;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use sqlx::sqlite::SqlitePoolOptions;

use vindex::config::AppConfig;
use vindex::db;
use vindex::handlers::streaming::{stream_handler, StreamQuery};
use vindex::startup::build_metadata_chain;
use vindex::state::AppState;

async fn test_state(dir: &Path) -> AppState {
    let db_path = dir.join("index.db");
    std::fs::File::create(&db_path).unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite://{}", db_path.display()))
        .await
        .unwrap();
    db::initialize_database(&pool).await.unwrap();

    let mut config = AppConfig::default();
    config.ffprobe_path = "/nonexistent/ffprobe".to_string();
    config.max_retries = 1;
    config.retry_delay_ms = 0;

    let metadata = build_metadata_chain(&config, pool.clone()).await;
    AppState::new(pool, metadata, Arc::new(config))
}

fn range_headers(spec: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::RANGE, HeaderValue::from_str(spec).unwrap());
    headers
}

async fn write_video(dir: &Path, name: &str, len: usize) -> String {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let path = dir.join(name);
    tokio::fs::write(&path, &data).await.unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn full_request_returns_entire_file_as_200() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let path = write_video(dir.path(), "v.mp4", 1000).await;

    let response = stream_handler(
        State(state),
        Query(StreamQuery { path }),
        HeaderMap::new(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-999/1000");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body.len(), 1000);
}

#[tokio::test]
async fn range_request_returns_206_with_exact_slice() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let path = write_video(dir.path(), "v.mp4", 1000).await;

    let response = stream_handler(
        State(state),
        Query(StreamQuery { path }),
        range_headers("bytes=100-199"),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE],
        "bytes 100-199/1000"
    );
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body.len(), 100);
    assert_eq!(body[0], (100 % 251) as u8);
}

#[tokio::test]
async fn open_ended_range_runs_to_end_of_file() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let path = write_video(dir.path(), "v.mp4", 500).await;

    let response = stream_handler(
        State(state),
        Query(StreamQuery { path }),
        range_headers("bytes=450-"),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 450-499/500");
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body.len(), 50);
}

#[tokio::test]
async fn unsatisfiable_range_is_416() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let path = write_video(dir.path(), "v.mp4", 100).await;

    let err = stream_handler(
        State(state),
        Query(StreamQuery { path }),
        range_headers("bytes=100-"),
    )
    .await
    .unwrap_err();

    assert_eq!(err.0, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn rejected_range_does_not_count_a_view() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let path = write_video(dir.path(), "v.mp4", 100).await;

    let err = stream_handler(
        State(state.clone()),
        Query(StreamQuery { path: path.clone() }),
        range_headers("bytes=500-600"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.0, StatusCode::RANGE_NOT_SATISFIABLE);

    // no bytes served, so nothing was indexed or counted
    assert!(db::get_file_by_path(&state.pool, &path)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn missing_file_is_404_and_traversal_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;

    let missing = stream_handler(
        State(state.clone()),
        Query(StreamQuery {
            path: dir.path().join("nope.mp4").display().to_string(),
        }),
        HeaderMap::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(missing.0, StatusCode::NOT_FOUND);

    let traversal = stream_handler(
        State(state),
        Query(StreamQuery {
            path: "/videos/../etc/passwd".to_string(),
        }),
        HeaderMap::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(traversal.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn serving_lazily_indexes_and_counts_views() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let path = write_video(dir.path(), "v.mp4", 256).await;

    assert!(db::get_file_by_path(&state.pool, &path)
        .await
        .unwrap()
        .is_none());

    for _ in 0..2 {
        stream_handler(
            State(state.clone()),
            Query(StreamQuery { path: path.clone() }),
            HeaderMap::new(),
        )
        .await
        .unwrap();
    }

    let record = db::get_file_by_path(&state.pool, &path)
        .await
        .unwrap()
        .expect("file should be indexed after first view");
    assert_eq!(record.view_count, 2);
    assert!(!record.fingerprint.is_empty());
    assert!(record.last_viewed_at.is_some());
}
