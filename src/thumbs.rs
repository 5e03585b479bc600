use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, VindexError};
use crate::state::AppState;

/// Hidden directory holding thumbnails, placed next to the scanned folder's
/// content so thumbnails move with the library.
pub const THUMBS_DIR: &str = ".thumbs";

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ThumbSummary {
    pub generated: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Generates thumbnails for every file of a saved playlist, in batches with
/// bounded concurrency. Orphaned thumbnails are removed first. Stops early
/// when the time budget runs out and reports the partial counts.
pub async fn process_playlist(state: &AppState, name: &str) -> Result<ThumbSummary> {
    let playlist = crate::db::get_playlist(&state.pool, name, false)
        .await?
        .ok_or_else(|| VindexError::NotFound(format!("playlist {name}")))?;
    let source = playlist
        .source_folder
        .ok_or_else(|| VindexError::NotFound(format!("playlist {name} has no source folder")))?;

    let thumbs_dir = Path::new(&source).join(THUMBS_DIR);
    tokio::fs::create_dir_all(&thumbs_dir).await?;

    let pending = sanitize_thumbs(&thumbs_dir, &playlist.files, &state.config.thumb_format).await?;
    let skipped = playlist.files.len() - pending.len();
    info!(
        "thumbnails for {name}: {} pending, {skipped} present",
        pending.len()
    );

    let started = Instant::now();
    let budget = Duration::from_secs(state.config.thumb_time_budget_secs);
    let mut summary = ThumbSummary {
        skipped,
        ..Default::default()
    };

    for batch in pending.chunks(state.config.thumb_batch_size.max(1)) {
        if started.elapsed() > budget {
            warn!(
                "thumbnail time budget exhausted after {} generated, stopping early",
                summary.generated
            );
            break;
        }
        let workers = effective_workers(state.config.thumb_workers).await;
        debug!("thumbnail batch of {} with {workers} workers", batch.len());

        let results: Vec<bool> = stream::iter(batch.to_vec().into_iter().map(|video| {
            let thumbs_dir = thumbs_dir.clone();
            async move { generate_thumbnail(state, &video, &thumbs_dir).await }
        }))
        .buffer_unordered(workers)
        .collect()
        .await;

        for ok in results {
            if ok {
                summary.generated += 1;
            } else {
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// Deletes thumbnails whose stem matches no playlist entry, then returns the
/// entries that still need one. Matching is by file stem, so a renamed video
/// invalidates its old thumbnail.
pub async fn sanitize_thumbs(
    thumbs_dir: &Path,
    files: &[String],
    format: &str,
) -> std::io::Result<Vec<String>> {
    let wanted: Vec<(String, &String)> = files
        .iter()
        .filter_map(|f| stem_of(f).map(|s| (s, f)))
        .collect();

    let mut entries = tokio::fs::read_dir(thumbs_dir).await?;
    let mut present = std::collections::HashSet::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_thumb = path.extension().and_then(|e| e.to_str()) == Some(format);
        let stem = stem_of(&path.to_string_lossy());
        match stem {
            Some(stem) if is_thumb && wanted.iter().any(|(s, _)| *s == stem) => {
                present.insert(stem);
            }
            // anything else, leftover partials included, is an orphan
            _ => {
                debug!("removing orphaned thumbnail {}", path.display());
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("failed to remove orphaned thumbnail {}: {e}", path.display());
                }
            }
        }
    }

    Ok(wanted
        .into_iter()
        .filter(|(stem, _)| !present.contains(stem))
        .map(|(_, f)| f.clone())
        .collect())
}

fn stem_of(path: &str) -> Option<String> {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
}

/// Scales the configured worker count down when the host is already loaded.
/// CPU usage needs two samples a short interval apart to be meaningful.
async fn effective_workers(configured: usize) -> usize {
    let configured = configured.max(1);
    let loaded = tokio::task::spawn_blocking(|| {
        let mut sys = System::new();
        sys.refresh_cpu();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu();
        sys.refresh_memory();
        let cpu = sys.global_cpu_info().cpu_usage();
        let mem = if sys.total_memory() > 0 {
            sys.used_memory() as f64 / sys.total_memory() as f64
        } else {
            0.0
        };
        cpu > 85.0 || mem > 0.9
    })
    .await
    .unwrap_or(false);

    if loaded {
        (configured / 2).max(1)
    } else {
        configured
    }
}

/// One ffmpeg run producing a square, padded still at a fixed fraction of
/// the video's duration. The frame is written to a temporary name, decoded
/// once to verify it, then renamed into place.
async fn generate_thumbnail(state: &AppState, video: &str, thumbs_dir: &Path) -> bool {
    let Some(stem) = stem_of(video) else {
        return false;
    };
    let meta = state.metadata.resolve(video).await;
    if meta.duration_seconds <= 0.0 {
        warn!("no duration for {video}, cannot pick a frame");
        return false;
    }
    let timestamp = meta.duration_seconds * state.config.thumb_extraction_point;

    let out = thumbs_dir.join(format!("{stem}.{}", state.config.thumb_format));
    let tmp = thumbs_dir.join(format!(".{stem}.partial.{}", state.config.thumb_format));
    let size = state.config.thumb_size;
    let filter = format!(
        "scale={size}:{size}:force_original_aspect_ratio=decrease,\
         pad={size}:{size}:(ow-iw)/2:(oh-ih)/2"
    );

    let invocation = Command::new(&state.config.ffmpeg_path)
        .args([
            "-ss",
            &format!("{timestamp:.3}"),
            "-i",
            video,
            "-vframes",
            "1",
            "-vf",
            &filter,
            "-q:v",
            &state.config.thumb_quality.to_string(),
            "-f",
            &state.config.thumb_format,
            "-y",
        ])
        .arg(&tmp)
        .output();

    let timeout = Duration::from_secs(state.config.ffmpeg_timeout_secs);
    let output = match tokio::time::timeout(timeout, invocation).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("failed to spawn ffmpeg for {video}: {e}");
            return false;
        }
        Err(_) => {
            warn!("ffmpeg timed out for {video}");
            let _ = tokio::fs::remove_file(&tmp).await;
            return false;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("ffmpeg failed for {video}: {}", stderr.trim());
        let _ = tokio::fs::remove_file(&tmp).await;
        return false;
    }

    if !verify_image(&tmp).await {
        warn!("ffmpeg produced an undecodable frame for {video}");
        let _ = tokio::fs::remove_file(&tmp).await;
        return false;
    }

    if let Err(e) = tokio::fs::rename(&tmp, &out).await {
        warn!("failed to move thumbnail into place for {video}: {e}");
        let _ = tokio::fs::remove_file(&tmp).await;
        return false;
    }
    true
}

async fn verify_image(path: &Path) -> bool {
    let owned: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        image::io::Reader::open(&owned)
            .ok()
            .and_then(|r| r.with_guessed_format().ok())
            .and_then(|r| r.decode().ok())
            .is_some()
    })
    .await
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sanitize_removes_orphans_and_lists_pending() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("keep.webp"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("orphan.webp"), b"x").await.unwrap();

        let files = vec![
            "/videos/keep.mp4".to_string(),
            "/videos/missing.mp4".to_string(),
        ];
        let pending = sanitize_thumbs(dir.path(), &files, "webp").await.unwrap();

        assert_eq!(pending, vec!["/videos/missing.mp4".to_string()]);
        assert!(!dir.path().join("orphan.webp").exists());
        assert!(dir.path().join("keep.webp").exists());
    }

    #[tokio::test]
    async fn sanitize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("orphan.webp"), b"x").await.unwrap();
        let files = vec!["/videos/a.mp4".to_string()];

        let first = sanitize_thumbs(dir.path(), &files, "webp").await.unwrap();
        let second = sanitize_thumbs(dir.path(), &files, "webp").await.unwrap();
        assert_eq!(first, second);
        assert!(!dir.path().join("orphan.webp").exists());
    }

    #[tokio::test]
    async fn effective_workers_is_at_least_one() {
        assert!(effective_workers(0).await >= 1);
    }
}
