use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;

use vindex::config::AppConfig;
use vindex::db;
use vindex::scanner::{scan_folder, ScanEvent};
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
    // no probing tools in the test environment; metadata falls back to defaults
    config.ffprobe_path = "/nonexistent/ffprobe".to_string();
    config.ffmpeg_path = "/nonexistent/ffmpeg".to_string();
    config.max_retries = 1;
    config.retry_delay_ms = 0;
    config.max_workers = 2;

    let metadata = build_metadata_chain(&config, pool.clone()).await;
    AppState::new(pool, metadata, Arc::new(config))
}

async fn run_scan(state: &AppState, folder: &Path) -> Vec<ScanEvent> {
    let (tx, mut rx) = mpsc::channel(256);
    scan_folder(state.clone(), folder.display().to_string(), tx).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn first_scan_indexes_every_file_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let videos = dir.path().join("videos");
    tokio::fs::create_dir(&videos).await.unwrap();
    tokio::fs::write(videos.join("b.mp4"), b"second").await.unwrap();
    tokio::fs::write(videos.join("a.mp4"), b"first").await.unwrap();
    tokio::fs::write(videos.join("notes.txt"), b"ignored").await.unwrap();

    let state = test_state(dir.path()).await;
    let events = run_scan(&state, &videos).await;

    let ScanEvent::Start { total, temp_playlist } = &events[0] else {
        panic!("expected start, got {:?}", events[0]);
    };
    assert_eq!(*total, 2);
    assert!(temp_playlist.starts_with("temp_"));

    let updates: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Update { file, .. } => Some(file.path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 2);
    assert!(updates[0].ends_with("a.mp4"));
    assert!(updates[1].ends_with("b.mp4"));
    assert!(matches!(events.last(), Some(ScanEvent::End { total: 2, .. })));

    // both files landed in the index and in the scan's temp playlist
    let a = db::get_file_by_path(&state.pool, &updates[0]).await.unwrap();
    assert!(a.is_some());
    let playlist = db::get_playlist(&state.pool, temp_playlist, true)
        .await
        .unwrap()
        .unwrap();
    assert!(playlist.is_temp);
    assert_eq!(playlist.files, updates);
}

#[tokio::test]
async fn rescan_skips_unchanged_files() {
    let dir = tempfile::tempdir().unwrap();
    let videos = dir.path().join("videos");
    tokio::fs::create_dir(&videos).await.unwrap();
    tokio::fs::write(videos.join("a.mp4"), b"content").await.unwrap();

    let state = test_state(dir.path()).await;
    run_scan(&state, &videos).await;
    let second = run_scan(&state, &videos).await;

    let skips: Vec<_> = second
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Skipped { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(skips, vec!["already indexed".to_string()]);
    assert!(!second
        .iter()
        .any(|e| matches!(e, ScanEvent::Update { .. } | ScanEvent::Error { .. })));
}

#[tokio::test]
async fn moved_file_keeps_identity_and_view_count() {
    let dir = tempfile::tempdir().unwrap();
    let videos = dir.path().join("videos");
    tokio::fs::create_dir(&videos).await.unwrap();
    let old_path = videos.join("old.mp4");
    tokio::fs::write(&old_path, b"stable content").await.unwrap();

    let state = test_state(dir.path()).await;
    run_scan(&state, &videos).await;

    let old_display = old_path.display().to_string();
    db::record_view(&state.pool, &old_display).await.unwrap();
    let before = db::get_file_by_path(&state.pool, &old_display)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.view_count, 1);

    let new_path = videos.join("renamed.mp4");
    tokio::fs::rename(&old_path, &new_path).await.unwrap();
    let events = run_scan(&state, &videos).await;

    assert!(events.iter().any(|e| matches!(
        e,
        ScanEvent::Skipped { message, .. } if message == "file moved, index updated"
    )));

    let after = db::get_file_by_path(&state.pool, &new_path.display().to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.fingerprint, before.fingerprint);
    assert_eq!(after.view_count, 1);
    assert!(db::get_file_by_path(&state.pool, &old_display)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn deleted_files_are_pruned_from_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let videos = dir.path().join("videos");
    tokio::fs::create_dir(&videos).await.unwrap();
    tokio::fs::write(videos.join("keep.mp4"), b"keep").await.unwrap();
    let doomed = videos.join("doomed.mp4");
    tokio::fs::write(&doomed, b"doomed").await.unwrap();

    let state = test_state(dir.path()).await;
    run_scan(&state, &videos).await;
    tokio::fs::remove_file(&doomed).await.unwrap();
    run_scan(&state, &videos).await;

    assert!(db::get_file_by_path(&state.pool, &doomed.display().to_string())
        .await
        .unwrap()
        .is_none());
    assert!(db::get_file_by_path(
        &state.pool,
        &videos.join("keep.mp4").display().to_string()
    )
    .await
    .unwrap()
    .is_some());
}

#[tokio::test]
async fn sibling_folder_sharing_a_prefix_is_not_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let videos = dir.path().join("videos");
    let sibling = dir.path().join("videos_extra");
    tokio::fs::create_dir(&videos).await.unwrap();
    tokio::fs::create_dir(&sibling).await.unwrap();
    tokio::fs::write(videos.join("a.mp4"), b"a").await.unwrap();
    let kept = sibling.join("z.mp4");
    tokio::fs::write(&kept, b"z").await.unwrap();

    let state = test_state(dir.path()).await;
    run_scan(&state, &sibling).await;
    run_scan(&state, &videos).await;

    assert!(db::get_file_by_path(&state.pool, &kept.display().to_string())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn duplicate_content_stays_put_across_rescans() {
    let dir = tempfile::tempdir().unwrap();
    let videos = dir.path().join("videos");
    tokio::fs::create_dir(&videos).await.unwrap();
    tokio::fs::write(videos.join("a.mp4"), b"same bytes").await.unwrap();
    tokio::fs::write(videos.join("b.mp4"), b"same bytes").await.unwrap();

    let state = test_state(dir.path()).await;
    let first = run_scan(&state, &videos).await;
    let second = run_scan(&state, &videos).await;

    // one row owns the fingerprint; the copy is reported, never rebound
    assert!(first.iter().any(|e| matches!(
        e,
        ScanEvent::Skipped { message, .. } if message == "duplicate content, already indexed"
    )));
    for events in [&first, &second] {
        assert!(!events.iter().any(|e| matches!(
            e,
            ScanEvent::Skipped { message, .. } if message == "file moved, index updated"
        )));
    }
    assert!(!second
        .iter()
        .any(|e| matches!(e, ScanEvent::Update { .. } | ScanEvent::Error { .. })));

    let a = db::get_file_by_path(&state.pool, &videos.join("a.mp4").display().to_string())
        .await
        .unwrap();
    let b = db::get_file_by_path(&state.pool, &videos.join("b.mp4").display().to_string())
        .await
        .unwrap();
    assert!(a.is_some() ^ b.is_some());
}

#[tokio::test]
async fn invalid_folder_reports_a_single_error() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let events = run_scan(&state, &dir.path().join("missing")).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ScanEvent::Error { .. }));
}
