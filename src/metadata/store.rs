use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::warn;

use super::{MetadataTier, VideoMetadata};
use crate::db;

/// Authoritative tier: metadata already persisted on the file's index row.
/// Writes happen in the callers' own transactions when they index a file,
/// so `store` is a no-op here.
pub struct StoreTier {
    pool: SqlitePool,
}

impl StoreTier {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataTier for StoreTier {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn lookup(&self, path: &str) -> Option<VideoMetadata> {
        match db::get_metadata_by_path(&self.pool, path).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!("store tier lookup failed for {path}: {e}");
                None
            }
        }
    }

    async fn store(&self, _path: &str, _meta: &VideoMetadata) {}
}
