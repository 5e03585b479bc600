use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::VideoMetadata;

/// Indexed video file, keyed by content fingerprint. Exactly one active row
/// per fingerprint; `path` resolves to at most one row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaFile {
    pub id: i64,
    pub fingerprint: String,
    // current absolute location; updated in place when a move is detected
    pub path: String,
    pub size_bytes: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub codec: String,
    // "WxH" or "unknown"
    pub resolution: String,
    pub orientation: String,
    pub duration_seconds: f64,
    // incremented only by the streaming path
    pub view_count: i64,
    pub last_viewed_at: Option<DateTime<Utc>>,
    // user flag, never touched by indexing
    pub is_favorite: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewMediaFile {
    pub fingerprint: String,
    pub path: String,
    pub size_bytes: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub codec: String,
    pub resolution: String,
    pub orientation: String,
    pub duration_seconds: f64,
}

impl NewMediaFile {
    pub fn new(
        fingerprint: String,
        path: String,
        size_bytes: i64,
        created_at: Option<DateTime<Utc>>,
        modified_at: Option<DateTime<Utc>>,
        meta: &VideoMetadata,
    ) -> Self {
        Self {
            fingerprint,
            path,
            size_bytes,
            created_at,
            modified_at,
            codec: meta.codec.clone(),
            resolution: meta.resolution.clone(),
            orientation: meta.orientation.as_str().to_string(),
            duration_seconds: meta.duration_seconds,
        }
    }
}

/// Compact file reference carried in scan progress events.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MediaItem {
    pub path: String,
    pub duration: f64,
}

/// Named, ordered list of paths. Entries are path references, not
/// fingerprint references; consumers must tolerate dangling paths and
/// filter by filesystem existence before use.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Playlist {
    pub name: String,
    pub files: Vec<String>,
    pub play_count: i64,
    pub source_folder: Option<String>,
    pub is_temp: bool,
}

/// Named session record: one video slot per player pane, slots may be empty.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionRecord {
    pub name: String,
    pub videos: Vec<Option<String>>,
}
