use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;
use std::path::Path;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::db_error_response;
use crate::db;
use crate::models::{Playlist, SessionRecord};
use crate::scanner;
use crate::state::AppState;

const SCAN_EVENT_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub folder: String,
}

/// Kicks off a folder scan and streams its progress as server-sent events.
/// The scan runs on its own task; dropping the response cancels it through
/// the closed channel.
pub async fn scan(
    State(state): State<AppState>,
    Query(req): Query<ScanRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(SCAN_EVENT_BUFFER);
    tokio::spawn(scanner::scan_folder(state, req.folder, tx));

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok(Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// --- playlists ---

#[derive(Debug, Deserialize)]
pub struct PlaylistQuery {
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PlaylistResponse {
    One(Playlist),
    Many(Vec<Playlist>),
}

pub async fn playlists_get(
    State(state): State<AppState>,
    Query(q): Query<PlaylistQuery>,
) -> Result<Json<PlaylistResponse>, (StatusCode, String)> {
    match q.name {
        Some(name) => {
            let playlist = db::get_playlist(&state.pool, &name, false)
                .await
                .map_err(db_error_response)?
                .ok_or((StatusCode::NOT_FOUND, format!("no playlist named {name}")))?;
            Ok(Json(PlaylistResponse::One(playlist)))
        }
        None => {
            let playlists = db::list_playlists(&state.pool)
                .await
                .map_err(db_error_response)?;
            Ok(Json(PlaylistResponse::Many(playlists)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SavePlaylistRequest {
    pub name: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub source_folder: String,
}

pub async fn playlists_post(
    State(state): State<AppState>,
    Json(req): Json<SavePlaylistRequest>,
) -> Result<Json<Playlist>, (StatusCode, String)> {
    db::upsert_playlist(&state.pool, &req.name, &req.files, &req.source_folder)
        .await
        .map_err(db_error_response)?;
    let saved = db::get_playlist(&state.pool, &req.name, false)
        .await
        .map_err(db_error_response)?
        .ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "playlist vanished after save".to_string(),
        ))?;
    Ok(Json(saved))
}

#[derive(Debug, Deserialize)]
pub struct SaveTempRequest {
    pub temp_name: String,
    pub name: String,
}

/// Promotes the temporary playlist a scan produced into a permanent one.
pub async fn save_temp_playlist(
    State(state): State<AppState>,
    Json(req): Json<SaveTempRequest>,
) -> Result<Json<Playlist>, (StatusCode, String)> {
    let saved = db::promote_temp_playlist(&state.pool, &req.temp_name, &req.name)
        .await
        .map_err(db_error_response)?
        .ok_or((
            StatusCode::NOT_FOUND,
            format!("no temporary playlist named {}", req.temp_name),
        ))?;
    Ok(Json(saved))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlaylistRequest {
    pub name: String,
    #[serde(default)]
    pub temp_name: Option<String>,
}

/// Reconciles a saved playlist with reality: merges an optional temporary
/// playlist into it, re-enumerates its source folder, dedupes while keeping
/// first-seen order, and drops entries whose files no longer exist on disk.
pub async fn update_playlist(
    State(state): State<AppState>,
    Json(req): Json<UpdatePlaylistRequest>,
) -> Result<Json<Playlist>, (StatusCode, String)> {
    let playlist = db::get_playlist(&state.pool, &req.name, false)
        .await
        .map_err(db_error_response)?
        .ok_or((StatusCode::NOT_FOUND, format!("no playlist named {}", req.name)))?;

    let mut files = playlist.files;
    if let Some(temp_name) = &req.temp_name {
        let temp = db::get_playlist(&state.pool, temp_name, true)
            .await
            .map_err(db_error_response)?
            .filter(|p| p.is_temp)
            .ok_or((
                StatusCode::NOT_FOUND,
                format!("no temporary playlist named {temp_name}"),
            ))?;
        files.extend(temp.files);
        db::remove_playlist(&state.pool, temp_name)
            .await
            .map_err(db_error_response)?;
    }
    if let Some(source) = &playlist.source_folder {
        if let Ok(found) =
            scanner::enumerate_videos(Path::new(source), &state.config.video_extensions).await
        {
            files.extend(found.iter().map(|p| p.display().to_string()));
        }
    }

    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for file in files {
        if seen.insert(file.clone()) && tokio::fs::metadata(&file).await.is_ok() {
            kept.push(file);
        }
    }

    db::upsert_playlist(
        &state.pool,
        &req.name,
        &kept,
        playlist.source_folder.as_deref().unwrap_or(""),
    )
    .await
    .map_err(db_error_response)?;
    let updated = db::get_playlist(&state.pool, &req.name, false)
        .await
        .map_err(db_error_response)?
        .ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "playlist vanished after update".to_string(),
        ))?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct NamedRequest {
    pub name: String,
}

pub async fn remove_playlist(
    State(state): State<AppState>,
    Json(req): Json<NamedRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let removed = db::remove_playlist(&state.pool, &req.name)
        .await
        .map_err(db_error_response)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("no playlist named {}", req.name),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoveFilesRequest {
    pub name: String,
    pub files: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RemainingFiles {
    pub files: Vec<String>,
}

pub async fn remove_from_playlist(
    State(state): State<AppState>,
    Json(req): Json<RemoveFilesRequest>,
) -> Result<Json<RemainingFiles>, (StatusCode, String)> {
    let remaining = db::remove_files_from_playlist(&state.pool, &req.name, &req.files)
        .await
        .map_err(db_error_response)?
        .ok_or((
            StatusCode::NOT_FOUND,
            format!("no playlist named {}", req.name),
        ))?;
    Ok(Json(RemainingFiles { files: remaining }))
}

// --- sessions ---

pub async fn sessions_get(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionRecord>>, (StatusCode, String)> {
    let sessions = db::list_sessions(&state.pool)
        .await
        .map_err(db_error_response)?;
    Ok(Json(sessions))
}

pub async fn sessions_post(
    State(state): State<AppState>,
    Json(req): Json<SessionRecord>,
) -> Result<StatusCode, (StatusCode, String)> {
    db::upsert_session(&state.pool, &req.name, &req.videos)
        .await
        .map_err(db_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_session(
    State(state): State<AppState>,
    Json(req): Json<NamedRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let removed = db::remove_session(&state.pool, &req.name)
        .await
        .map_err(db_error_response)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("no session named {}", req.name),
        ))
    }
}

// --- favorites ---

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    pub path: String,
}

pub async fn favorites_get(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    let favorites = db::list_favorites(&state.pool)
        .await
        .map_err(db_error_response)?;
    Ok(Json(favorites))
}

pub async fn favorites_post(
    State(state): State<AppState>,
    Json(req): Json<FavoriteRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    set_favorite(&state, &req.path, true).await
}

pub async fn favorites_delete(
    State(state): State<AppState>,
    Json(req): Json<FavoriteRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    set_favorite(&state, &req.path, false).await
}

async fn set_favorite(
    state: &AppState,
    path: &str,
    favorite: bool,
) -> Result<StatusCode, (StatusCode, String)> {
    let touched = db::set_favorite(&state.pool, path, favorite)
        .await
        .map_err(db_error_response)?;
    if touched > 0 {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("{path} is not indexed")))
    }
}

// --- analytics ---

#[derive(Debug, Serialize)]
pub struct VideoViews {
    pub path: String,
    pub view_count: i64,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub top_videos: Vec<VideoViews>,
    // extension (lowercased, "none" when absent) -> indexed file count
    pub file_types: BTreeMap<String, i64>,
    // occupied session slots -> session count
    pub player_usage: BTreeMap<usize, i64>,
}

const TOP_VIDEOS_LIMIT: i64 = 10;

pub async fn analytics_get(
    State(state): State<AppState>,
) -> Result<Json<AnalyticsResponse>, (StatusCode, String)> {
    let top_videos = db::top_viewed(&state.pool, TOP_VIDEOS_LIMIT)
        .await
        .map_err(db_error_response)?
        .into_iter()
        .map(|(path, view_count)| VideoViews { path, view_count })
        .collect();

    let mut file_types = BTreeMap::new();
    for path in db::list_paths(&state.pool).await.map_err(db_error_response)? {
        let ext = Path::new(&path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("none")
            .to_ascii_lowercase();
        *file_types.entry(ext).or_insert(0) += 1;
    }

    let mut player_usage = BTreeMap::new();
    for session in db::list_sessions(&state.pool)
        .await
        .map_err(db_error_response)?
    {
        let slots = session.videos.iter().flatten().count();
        *player_usage.entry(slots).or_insert(0) += 1;
    }

    Ok(Json(AnalyticsResponse {
        top_videos,
        file_types,
        player_usage,
    }))
}

// --- stats ---

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub files: i64,
    pub playlists: i64,
    pub sessions: i64,
}

pub async fn stats_get(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, (StatusCode, String)> {
    let (files, playlists, sessions) = db::count_stats(&state.pool)
        .await
        .map_err(db_error_response)?;
    Ok(Json(StatsResponse {
        files,
        playlists,
        sessions,
    }))
}
