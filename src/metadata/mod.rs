//! Tiered metadata resolution: an ordered list of lookup layers of
//! increasing cost, terminating in an ffprobe invocation. On a hit, every
//! faster tier is written through so repeated lookups converge to the local
//! tier. The persistent store stays authoritative; the faster tiers are
//! disposable accelerators.

pub mod local;
pub mod probe;
pub mod shared;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use local::LocalTier;
pub use probe::ProbeTier;
pub use shared::SharedTier;
pub use store::StoreTier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
    Square,
    #[default]
    Unknown,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
            Orientation::Square => "square",
            Orientation::Unknown => "unknown",
        }
    }

    pub fn from_dimensions(width: u64, height: u64) -> Self {
        if width == 0 || height == 0 {
            Orientation::Unknown
        } else if width < height {
            Orientation::Portrait
        } else if width > height {
            Orientation::Landscape
        } else {
            Orientation::Square
        }
    }
}

/// Technical metadata for one video file. Every field falls back to
/// "unknown"/0 rather than failing, since metadata absence must not block
/// indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub codec: String,
    pub resolution: String,
    pub orientation: Orientation,
    pub duration_seconds: f64,
}

impl Default for VideoMetadata {
    fn default() -> Self {
        Self {
            codec: "unknown".to_string(),
            resolution: "unknown".to_string(),
            orientation: Orientation::Unknown,
            duration_seconds: 0.0,
        }
    }
}

/// One layer of the chain. `lookup` answers `None` on miss or tier failure;
/// a failing tier must degrade to a miss, never an error. `store` is
/// best-effort write-through and may be a no-op for authoritative tiers.
#[async_trait]
pub trait MetadataTier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn lookup(&self, path: &str) -> Option<VideoMetadata>;
    async fn store(&self, path: &str, meta: &VideoMetadata);
}

pub struct MetadataChain {
    tiers: Vec<Box<dyn MetadataTier>>,
}

impl MetadataChain {
    pub fn new(tiers: Vec<Box<dyn MetadataTier>>) -> Self {
        Self { tiers }
    }

    /// Walks the tiers in order; on a hit, writes the value through every
    /// faster tier before returning. When every tier misses (including the
    /// probe after its retries), returns the all-unknown default without
    /// caching it.
    pub async fn resolve(&self, path: &str) -> VideoMetadata {
        for (idx, tier) in self.tiers.iter().enumerate() {
            if let Some(meta) = tier.lookup(path).await {
                debug!(tier = tier.name(), path, "metadata hit");
                for faster in &self.tiers[..idx] {
                    faster.store(path, &meta).await;
                }
                return meta;
            }
        }
        debug!(path, "metadata unresolved, using defaults");
        VideoMetadata::default()
    }

    /// Seeds every tier with a value the caller just obtained and persisted.
    /// The chain caches only what it is told.
    pub async fn prime(&self, path: &str, meta: &VideoMetadata) {
        for tier in &self.tiers {
            tier.store(path, meta).await;
        }
    }
}

impl std::fmt::Debug for MetadataChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.tiers.iter().map(|t| t.name()).collect();
        f.debug_struct("MetadataChain").field("tiers", &names).finish()
    }
}
