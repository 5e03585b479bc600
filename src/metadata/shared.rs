use std::io::Read;

use async_trait::async_trait;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::{MetadataTier, VideoMetadata};

/// Shared tier backed by Redis, usable by several worker processes at once.
/// Values are zlib-compressed JSON. An unreachable server degrades to a
/// miss; it never surfaces as an error and never disables the rest of the
/// chain.
pub struct SharedTier {
    conn: ConnectionManager,
    ttl_secs: u64,
    compression: Compression,
}

impl SharedTier {
    pub async fn connect(
        url: &str,
        ttl_secs: u64,
        compression_level: u32,
    ) -> Result<Self, redis::RedisError> {
        info!("connecting to shared metadata cache at {url}");
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            ttl_secs,
            compression: Compression::new(compression_level.min(9)),
        })
    }

    fn key(path: &str) -> String {
        format!("metadata:{path}")
    }
}

pub(crate) fn compress_value(meta: &VideoMetadata, level: Compression) -> Option<Vec<u8>> {
    let json = serde_json::to_vec(meta).ok()?;
    let mut encoder = ZlibEncoder::new(&json[..], level);
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).ok()?;
    Some(out)
}

pub(crate) fn decompress_value(data: &[u8]) -> Option<VideoMetadata> {
    let mut decoder = ZlibDecoder::new(data);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).ok()?;
    serde_json::from_slice(&json).ok()
}

#[async_trait]
impl MetadataTier for SharedTier {
    fn name(&self) -> &'static str {
        "shared"
    }

    async fn lookup(&self, path: &str) -> Option<VideoMetadata> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<Vec<u8>>>(Self::key(path)).await {
            Ok(Some(data)) => decompress_value(&data),
            Ok(None) => None,
            Err(e) => {
                debug!("shared cache unavailable, treating as miss: {e}");
                None
            }
        }
    }

    async fn store(&self, path: &str, meta: &VideoMetadata) {
        let Some(payload) = compress_value(meta, self.compression) else {
            return;
        };
        let mut conn = self.conn.clone();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(Self::key(path), payload, self.ttl_secs)
            .await
        {
            debug!("shared cache write failed: {e}");
        }
    }
}
