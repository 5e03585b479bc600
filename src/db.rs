use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar, SqlitePool};

use crate::metadata::{Orientation, VideoMetadata};
use crate::models::{MediaFile, NewMediaFile, Playlist, SessionRecord};

type MediaFileRow = (
    i64,
    String,
    String,
    i64,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    String,
    String,
    String,
    f64,
    i64,
    Option<DateTime<Utc>>,
    bool,
);

const MEDIA_FILE_COLUMNS: &str = "id, fingerprint, path, size_bytes, created_at, modified_at, \
     codec, resolution, orientation, duration_seconds, view_count, last_viewed_at, is_favorite";

fn from_row(r: MediaFileRow) -> MediaFile {
    MediaFile {
        id: r.0,
        fingerprint: r.1,
        path: r.2,
        size_bytes: r.3,
        created_at: r.4,
        modified_at: r.5,
        codec: r.6,
        resolution: r.7,
        orientation: r.8,
        duration_seconds: r.9,
        view_count: r.10,
        last_viewed_at: r.11,
        is_favorite: r.12,
    }
}

pub async fn initialize_database(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let files = r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            fingerprint TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL UNIQUE,
            size_bytes INTEGER NOT NULL,
            created_at TEXT,
            modified_at TEXT,
            codec TEXT NOT NULL DEFAULT 'unknown',
            resolution TEXT NOT NULL DEFAULT 'unknown',
            orientation TEXT NOT NULL DEFAULT 'unknown',
            duration_seconds REAL NOT NULL DEFAULT 0,
            view_count INTEGER NOT NULL DEFAULT 0,
            last_viewed_at TEXT,
            is_favorite INTEGER NOT NULL DEFAULT 0
        )
    "#;

    let playlists = r#"
        CREATE TABLE IF NOT EXISTS playlists (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            files TEXT NOT NULL DEFAULT '[]',
            play_count INTEGER NOT NULL DEFAULT 0,
            source_folder TEXT,
            is_temp INTEGER NOT NULL DEFAULT 0
        )
    "#;

    let sessions = r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            videos TEXT NOT NULL DEFAULT '[]'
        )
    "#;

    let idx_fingerprint = "CREATE INDEX IF NOT EXISTS idx_files_fingerprint ON files (fingerprint)";
    let idx_path = "CREATE INDEX IF NOT EXISTS idx_files_path ON files (path)";

    query(files).execute(pool).await?;
    query(playlists).execute(pool).await?;
    query(sessions).execute(pool).await?;
    query(idx_fingerprint).execute(pool).await?;
    query(idx_path).execute(pool).await?;

    Ok(())
}

// --- files ---

pub async fn insert_file(pool: &SqlitePool, f: &NewMediaFile) -> Result<(), sqlx::Error> {
    let q = r#"
        INSERT INTO files (fingerprint, path, size_bytes, created_at, modified_at,
                           codec, resolution, orientation, duration_seconds,
                           view_count, last_viewed_at, is_favorite)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, NULL, 0)
    "#;
    query(q)
        .bind(&f.fingerprint)
        .bind(&f.path)
        .bind(f.size_bytes)
        .bind(f.created_at)
        .bind(f.modified_at)
        .bind(&f.codec)
        .bind(&f.resolution)
        .bind(&f.orientation)
        .bind(f.duration_seconds)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_file_by_path(
    pool: &SqlitePool,
    path: &str,
) -> Result<Option<MediaFile>, sqlx::Error> {
    let sql = format!("SELECT {MEDIA_FILE_COLUMNS} FROM files WHERE path = ?1");
    let row = query_as::<_, MediaFileRow>(&sql)
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(from_row))
}

pub async fn get_file_by_path_and_size(
    pool: &SqlitePool,
    path: &str,
    size_bytes: i64,
) -> Result<Option<MediaFile>, sqlx::Error> {
    let sql = format!("SELECT {MEDIA_FILE_COLUMNS} FROM files WHERE path = ?1 AND size_bytes = ?2");
    let row = query_as::<_, MediaFileRow>(&sql)
        .bind(path)
        .bind(size_bytes)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(from_row))
}

pub async fn get_file_by_fingerprint(
    pool: &SqlitePool,
    fingerprint: &str,
) -> Result<Option<MediaFile>, sqlx::Error> {
    let sql = format!("SELECT {MEDIA_FILE_COLUMNS} FROM files WHERE fingerprint = ?1");
    let row = query_as::<_, MediaFileRow>(&sql)
        .bind(fingerprint)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(from_row))
}

/// Rebinds an existing fingerprint to a new location (move/rename) and
/// refreshes the filesystem provenance. Never creates a second record for
/// the same fingerprint.
pub async fn update_file_location(
    pool: &SqlitePool,
    fingerprint: &str,
    path: &str,
    size_bytes: i64,
    modified_at: Option<DateTime<Utc>>,
) -> Result<(), sqlx::Error> {
    query("UPDATE files SET path = ?1, size_bytes = ?2, modified_at = ?3 WHERE fingerprint = ?4")
        .bind(path)
        .bind(size_bytes)
        .bind(modified_at)
        .bind(fingerprint)
        .execute(pool)
        .await?;
    Ok(())
}

/// Paths of indexed rows lying under `root`. The match is anchored at a
/// path separator so a sibling folder sharing the prefix (`videos` vs
/// `videos_extra`) is never included, and LIKE wildcards in the root are
/// escaped to match literally.
pub async fn paths_under_root(
    pool: &SqlitePool,
    root: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let escaped = root
        .trim_end_matches('/')
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let rows: Vec<(String,)> =
        query_as("SELECT path FROM files WHERE path LIKE ?1 ESCAPE '\\'")
            .bind(format!("{escaped}/%"))
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(p,)| p).collect())
}

pub async fn delete_files_by_paths(
    pool: &SqlitePool,
    paths: &[String],
) -> Result<u64, sqlx::Error> {
    if paths.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;
    let mut deleted = 0;
    for path in paths {
        let res = query("DELETE FROM files WHERE path = ?1")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        deleted += res.rows_affected();
    }
    tx.commit().await?;
    Ok(deleted)
}

pub async fn get_metadata_by_path(
    pool: &SqlitePool,
    path: &str,
) -> Result<Option<VideoMetadata>, sqlx::Error> {
    let row: Option<(String, String, String, f64)> = query_as(
        "SELECT codec, resolution, orientation, duration_seconds FROM files WHERE path = ?1",
    )
    .bind(path)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(codec, resolution, orientation, duration_seconds)| VideoMetadata {
        codec,
        resolution,
        orientation: match orientation.as_str() {
            "portrait" => Orientation::Portrait,
            "landscape" => Orientation::Landscape,
            "square" => Orientation::Square,
            _ => Orientation::Unknown,
        },
        duration_seconds,
    }))
}

/// View accounting for the streaming path; the only writer of `view_count`.
pub async fn record_view(pool: &SqlitePool, path: &str) -> Result<(), sqlx::Error> {
    query("UPDATE files SET view_count = view_count + 1, last_viewed_at = ?1 WHERE path = ?2")
        .bind(Utc::now())
        .bind(path)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_favorite(
    pool: &SqlitePool,
    path: &str,
    favorite: bool,
) -> Result<u64, sqlx::Error> {
    let res = query("UPDATE files SET is_favorite = ?1 WHERE path = ?2")
        .bind(favorite)
        .bind(path)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn list_paths(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = query_as("SELECT path FROM files")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(p,)| p).collect())
}

/// Most-viewed files, ties broken by path for a stable order.
pub async fn top_viewed(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    query_as(
        "SELECT path, view_count FROM files WHERE view_count > 0 \
         ORDER BY view_count DESC, path LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn list_favorites(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = query_as("SELECT path FROM files WHERE is_favorite = 1")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(p,)| p).collect())
}

// --- playlists ---

type PlaylistRow = (String, String, i64, Option<String>, bool);

fn playlist_from_row(r: PlaylistRow) -> Playlist {
    let files: Vec<String> = serde_json::from_str(&r.1).unwrap_or_default();
    Playlist {
        name: r.0,
        files,
        play_count: r.2,
        source_folder: r.3,
        is_temp: r.4,
    }
}

pub async fn create_temp_playlist(
    pool: &SqlitePool,
    name: &str,
    source_folder: &str,
) -> Result<(), sqlx::Error> {
    query(
        "INSERT INTO playlists (name, files, play_count, source_folder, is_temp) \
         VALUES (?1, '[]', 0, ?2, 1) ON CONFLICT (name) DO NOTHING",
    )
    .bind(name)
    .bind(source_folder)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn append_playlist_file(
    pool: &SqlitePool,
    name: &str,
    path: &str,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    let row: Option<(String,)> = query_as("SELECT files FROM playlists WHERE name = ?1")
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;
    let Some((files_json,)) = row else {
        return Ok(());
    };
    let mut files: Vec<String> = serde_json::from_str(&files_json).unwrap_or_default();
    files.push(path.to_string());
    query("UPDATE playlists SET files = ?1 WHERE name = ?2")
        .bind(serde_json::to_string(&files).unwrap_or_else(|_| "[]".to_string()))
        .bind(name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn get_playlist(
    pool: &SqlitePool,
    name: &str,
    include_temp: bool,
) -> Result<Option<Playlist>, sqlx::Error> {
    let sql = if include_temp {
        "SELECT name, files, play_count, source_folder, is_temp FROM playlists WHERE name = ?1"
    } else {
        "SELECT name, files, play_count, source_folder, is_temp FROM playlists \
         WHERE name = ?1 AND is_temp = 0"
    };
    let row = query_as::<_, PlaylistRow>(sql)
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(playlist_from_row))
}

pub async fn list_playlists(pool: &SqlitePool) -> Result<Vec<Playlist>, sqlx::Error> {
    let rows = query_as::<_, PlaylistRow>(
        "SELECT name, files, play_count, source_folder, is_temp FROM playlists WHERE is_temp = 0",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(playlist_from_row).collect())
}

/// Creates or replaces a permanent playlist, preserving the existing
/// play_count on replace.
pub async fn upsert_playlist(
    pool: &SqlitePool,
    name: &str,
    files: &[String],
    source_folder: &str,
) -> Result<(), sqlx::Error> {
    let files_json = serde_json::to_string(files).unwrap_or_else(|_| "[]".to_string());
    let source = (!source_folder.is_empty()).then_some(source_folder);
    query(
        "INSERT INTO playlists (name, files, play_count, source_folder, is_temp) \
         VALUES (?1, ?2, 0, ?3, 0) \
         ON CONFLICT (name) DO UPDATE SET files = excluded.files, \
             source_folder = excluded.source_folder, is_temp = 0",
    )
    .bind(name)
    .bind(files_json)
    .bind(source)
    .execute(pool)
    .await?;
    Ok(())
}

/// The "save" operation: converts a scan's temporary playlist into a
/// permanent one under a new name. Returns the saved playlist, or None if
/// the temporary playlist does not exist.
pub async fn promote_temp_playlist(
    pool: &SqlitePool,
    temp_name: &str,
    new_name: &str,
) -> Result<Option<Playlist>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let row: Option<(String, Option<String>)> = query_as(
        "SELECT files, source_folder FROM playlists WHERE name = ?1 AND is_temp = 1",
    )
    .bind(temp_name)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((files_json, source_folder)) = row else {
        return Ok(None);
    };
    query(
        "INSERT INTO playlists (name, files, play_count, source_folder, is_temp) \
         VALUES (?1, ?2, 0, ?3, 0)",
    )
    .bind(new_name)
    .bind(&files_json)
    .bind(&source_folder)
    .execute(&mut *tx)
    .await?;
    query("DELETE FROM playlists WHERE name = ?1 AND is_temp = 1")
        .bind(temp_name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(Some(Playlist {
        name: new_name.to_string(),
        files: serde_json::from_str(&files_json).unwrap_or_default(),
        play_count: 0,
        source_folder,
        is_temp: false,
    }))
}

pub async fn remove_playlist(pool: &SqlitePool, name: &str) -> Result<bool, sqlx::Error> {
    let res = query("DELETE FROM playlists WHERE name = ?1")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn remove_files_from_playlist(
    pool: &SqlitePool,
    name: &str,
    files_to_remove: &[String],
) -> Result<Option<Vec<String>>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let row: Option<(String,)> =
        query_as("SELECT files FROM playlists WHERE name = ?1 AND is_temp = 0")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
    let Some((files_json,)) = row else {
        return Ok(None);
    };
    let current: Vec<String> = serde_json::from_str(&files_json).unwrap_or_default();
    let remaining: Vec<String> = current
        .into_iter()
        .filter(|f| !files_to_remove.contains(f))
        .collect();
    query("UPDATE playlists SET files = ?1 WHERE name = ?2 AND is_temp = 0")
        .bind(serde_json::to_string(&remaining).unwrap_or_else(|_| "[]".to_string()))
        .bind(name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(Some(remaining))
}

// --- sessions ---

pub async fn upsert_session(
    pool: &SqlitePool,
    name: &str,
    videos: &[Option<String>],
) -> Result<(), sqlx::Error> {
    let videos_json = serde_json::to_string(videos).unwrap_or_else(|_| "[]".to_string());
    query(
        "INSERT INTO sessions (name, videos) VALUES (?1, ?2) \
         ON CONFLICT (name) DO UPDATE SET videos = excluded.videos",
    )
    .bind(name)
    .bind(videos_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_sessions(pool: &SqlitePool) -> Result<Vec<SessionRecord>, sqlx::Error> {
    let rows: Vec<(String, String)> = query_as("SELECT name, videos FROM sessions")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(name, videos_json)| SessionRecord {
            name,
            videos: serde_json::from_str(&videos_json).unwrap_or_default(),
        })
        .collect())
}

pub async fn remove_session(pool: &SqlitePool, name: &str) -> Result<bool, sqlx::Error> {
    let res = query("DELETE FROM sessions WHERE name = ?1")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

// --- stats ---

pub async fn count_stats(pool: &SqlitePool) -> Result<(i64, i64, i64), sqlx::Error> {
    let files: i64 = query_scalar("SELECT COUNT(1) FROM files")
        .fetch_one(pool)
        .await?;
    let playlists: i64 = query_scalar("SELECT COUNT(1) FROM playlists WHERE is_temp = 0")
        .fetch_one(pool)
        .await?;
    let sessions: i64 = query_scalar("SELECT COUNT(1) FROM sessions")
        .fetch_one(pool)
        .await?;
    Ok((files, playlists, sessions))
}
