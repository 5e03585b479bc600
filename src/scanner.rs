use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::db;
use crate::hasher;
use crate::models::{MediaItem, NewMediaFile};
use crate::state::AppState;

/// Progress events emitted while a folder scan runs. Serialized as the SSE
/// payload, discriminated by `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScanEvent {
    Start {
        total: usize,
        temp_playlist: String,
    },
    Skipped {
        file: MediaItem,
        progress: usize,
        total: usize,
        message: String,
    },
    Update {
        file: MediaItem,
        progress: usize,
        total: usize,
    },
    Error {
        file: String,
        message: String,
    },
    End {
        total: usize,
        temp_playlist: String,
    },
}

enum Classified {
    /// Same path, same size, known fingerprint. Nothing written.
    Unchanged(MediaItem),
    /// Known fingerprint at a new location; the index row was rebound.
    Moved(MediaItem),
    /// Known fingerprint whose recorded path still exists elsewhere; the
    /// row stays where it is.
    Duplicate(MediaItem),
    /// Unseen content; metadata resolved and a new row inserted.
    Added(MediaItem),
    Failed(String),
}

/// Scans `folder` for video files and reconciles the index with what is on
/// disk, streaming one event per file to `tx`. Files are processed with
/// bounded concurrency but events keep enumeration order. Rows whose path
/// lies under `folder` and was not seen this pass are deleted afterwards, so
/// a moved file is rebound before its old path could be mistaken for
/// obsolete.
pub async fn scan_folder(state: AppState, folder: String, tx: mpsc::Sender<ScanEvent>) {
    let root = Path::new(&folder);
    match tokio::fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => {}
        _ => {
            let _ = tx
                .send(ScanEvent::Error {
                    file: folder.clone(),
                    message: format!("not a readable directory: {folder}"),
                })
                .await;
            return;
        }
    }

    let files = match enumerate_videos(root, &state.config.video_extensions).await {
        Ok(files) => files,
        Err(e) => {
            let _ = tx
                .send(ScanEvent::Error {
                    file: folder.clone(),
                    message: format!("failed to enumerate {folder}: {e}"),
                })
                .await;
            return;
        }
    };
    let total = files.len();

    let temp_playlist = format!("temp_{}", Local::now().format("%Y%m%d_%H%M%S"));
    if let Err(e) = db::create_temp_playlist(&state.pool, &temp_playlist, &folder).await {
        let _ = tx
            .send(ScanEvent::Error {
                file: folder.clone(),
                message: format!("failed to create scan playlist: {e}"),
            })
            .await;
        return;
    }

    let before: HashSet<String> = match db::paths_under_root(&state.pool, &folder).await {
        Ok(paths) => paths.into_iter().collect(),
        Err(e) => {
            let _ = tx
                .send(ScanEvent::Error {
                    file: folder.clone(),
                    message: format!("failed to snapshot index: {e}"),
                })
                .await;
            return;
        }
    };

    if tx
        .send(ScanEvent::Start {
            total,
            temp_playlist: temp_playlist.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    info!("scanning {folder}: {total} candidate files");

    let mut observed: HashSet<String> = HashSet::new();
    let mut outcomes = stream::iter(files.into_iter().map(|path| {
        let state = state.clone();
        async move {
            let display = path.display().to_string();
            (display.clone(), classify_file(&state, &path, &display).await)
        }
    }))
    .buffered(state.config.max_workers.max(1));

    let mut progress = 0;
    while let Some((path, outcome)) = outcomes.next().await {
        progress += 1;
        let event = match outcome {
            Classified::Unchanged(file) => {
                observed.insert(path.clone());
                ScanEvent::Skipped {
                    file,
                    progress,
                    total,
                    message: "already indexed".to_string(),
                }
            }
            Classified::Moved(file) => {
                observed.insert(path.clone());
                ScanEvent::Skipped {
                    file,
                    progress,
                    total,
                    message: "file moved, index updated".to_string(),
                }
            }
            Classified::Duplicate(file) => {
                observed.insert(path.clone());
                ScanEvent::Skipped {
                    file,
                    progress,
                    total,
                    message: "duplicate content, already indexed".to_string(),
                }
            }
            Classified::Added(file) => {
                observed.insert(path.clone());
                ScanEvent::Update {
                    file,
                    progress,
                    total,
                }
            }
            Classified::Failed(message) => ScanEvent::Error {
                file: path.clone(),
                message,
            },
        };

        if observed.contains(&path) {
            if let Err(e) = db::append_playlist_file(&state.pool, &temp_playlist, &path).await {
                warn!("failed to append {path} to {temp_playlist}: {e}");
            }
        }
        if tx.send(event).await.is_err() {
            return;
        }
    }

    let obsolete: Vec<String> = before.difference(&observed).cloned().collect();
    if !obsolete.is_empty() {
        match db::delete_files_by_paths(&state.pool, &obsolete).await {
            Ok(n) => info!("removed {n} index rows with no file on disk"),
            Err(e) => warn!("failed to remove obsolete index rows: {e}"),
        }
    }

    let _ = tx
        .send(ScanEvent::End {
            total,
            temp_playlist,
        })
        .await;
}

/// Iterative directory walk, whitelisted by extension. Sorted for stable
/// event and playlist order.
pub async fn enumerate_videos(
    root: &Path,
    extensions: &[String],
) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("skipping unreadable directory {}: {e}", dir.display());
                continue;
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let kind = entry.file_type().await?;
            if kind.is_dir() {
                stack.push(path);
            } else if has_video_extension(&path, extensions) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn has_video_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let dotted = format!(".{}", ext.to_ascii_lowercase());
    extensions.iter().any(|e| e.eq_ignore_ascii_case(&dotted))
}

async fn classify_file(state: &AppState, path: &Path, display: &str) -> Classified {
    let fingerprint = match hasher::fingerprint_file(path).await {
        Ok(fp) => fp,
        Err(e) => return Classified::Failed(format!("fingerprint failed: {e}")),
    };

    let fs_meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) => return Classified::Failed(format!("stat failed: {e}")),
    };
    let size_bytes = fs_meta.len() as i64;
    let created_at = fs_meta.created().ok().map(DateTime::<Utc>::from);
    let modified_at = fs_meta.modified().ok().map(DateTime::<Utc>::from);

    match db::get_file_by_path_and_size(&state.pool, display, size_bytes).await {
        Ok(Some(existing)) if existing.fingerprint == fingerprint => {
            return Classified::Unchanged(MediaItem {
                path: display.to_string(),
                duration: existing.duration_seconds,
            });
        }
        Ok(_) => {}
        Err(e) => return Classified::Failed(format!("index lookup failed: {e}")),
    }

    match db::get_file_by_fingerprint(&state.pool, &fingerprint).await {
        Ok(Some(existing)) => {
            // same bytes at two live paths is a copy, not a move; rebinding
            // would ping-pong the row between them on every scan
            if existing.path != display && tokio::fs::metadata(&existing.path).await.is_ok() {
                return Classified::Duplicate(MediaItem {
                    path: display.to_string(),
                    duration: existing.duration_seconds,
                });
            }
            if let Err(e) = db::update_file_location(
                &state.pool,
                &fingerprint,
                display,
                size_bytes,
                modified_at,
            )
            .await
            {
                return Classified::Failed(format!("failed to rebind moved file: {e}"));
            }
            return Classified::Moved(MediaItem {
                path: display.to_string(),
                duration: existing.duration_seconds,
            });
        }
        Ok(None) => {}
        Err(e) => return Classified::Failed(format!("index lookup failed: {e}")),
    }

    // a row at this path with a different fingerprint means the content was
    // replaced in place; drop it so the insert below can reclaim the path
    match db::get_file_by_path(&state.pool, display).await {
        Ok(Some(_)) => {
            if let Err(e) =
                db::delete_files_by_paths(&state.pool, &[display.to_string()]).await
            {
                return Classified::Failed(format!("failed to replace stale row: {e}"));
            }
        }
        Ok(None) => {}
        Err(e) => return Classified::Failed(format!("index lookup failed: {e}")),
    }

    let meta = state.metadata.resolve(display).await;
    let record = NewMediaFile::new(
        fingerprint.clone(),
        display.to_string(),
        size_bytes,
        created_at,
        modified_at,
        &meta,
    );
    if let Err(e) = db::insert_file(&state.pool, &record).await {
        // a concurrent worker can win the insert for the same fingerprint
        if let Ok(Some(existing)) = db::get_file_by_fingerprint(&state.pool, &fingerprint).await {
            if existing.path != display {
                return Classified::Duplicate(MediaItem {
                    path: display.to_string(),
                    duration: existing.duration_seconds,
                });
            }
        }
        return Classified::Failed(format!("failed to index {display}: {e}"));
    }
    state.metadata.prime(display, &meta).await;

    Classified::Added(MediaItem {
        path: display.to_string(),
        duration: meta.duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_whitelist_is_case_insensitive() {
        let exts = vec![".mp4".to_string(), ".mkv".to_string()];
        assert!(has_video_extension(Path::new("/a/B.MP4"), &exts));
        assert!(has_video_extension(Path::new("/a/b.mkv"), &exts));
        assert!(!has_video_extension(Path::new("/a/b.txt"), &exts));
        assert!(!has_video_extension(Path::new("/a/noext"), &exts));
    }

    #[tokio::test]
    async fn enumeration_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        tokio::fs::create_dir(&sub).await.unwrap();
        tokio::fs::write(dir.path().join("b.mp4"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("a.mp4"), b"x").await.unwrap();
        tokio::fs::write(sub.join("c.mkv"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"x").await.unwrap();

        let exts = vec![".mp4".to_string(), ".mkv".to_string()];
        let found = enumerate_videos(dir.path(), &exts).await.unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4", "sub/c.mkv"]);
    }
}
