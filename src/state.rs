use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::metadata::MetadataChain;

/// Shared handles passed to every handler and background task. Cheap to
/// clone; the pool and chain are internally reference counted.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub metadata: Arc<MetadataChain>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(pool: SqlitePool, metadata: Arc<MetadataChain>, config: Arc<AppConfig>) -> Self {
        Self {
            pool,
            metadata,
            config,
        }
    }
}
