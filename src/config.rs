use serde::Deserialize;

/// Full configuration surface for the indexing/serving core. Every field has
/// a default so a partial config.json works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    // empty means "resolve a per-user default at startup"
    pub db_path: String,
    pub host: String,
    pub port: u16,

    // external tools
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    pub probe_timeout_secs: u64,
    pub ffmpeg_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,

    // scanner
    pub max_workers: usize,
    pub video_extensions: Vec<String>,

    // metadata cache tiers
    pub local_cache_size: usize,
    pub local_cache_ttl_secs: u64,
    pub redis_url: Option<String>,
    pub redis_ttl_secs: u64,
    pub compression_level: u32,

    // thumbnails
    pub thumb_size: u32,
    pub thumb_format: String,
    pub thumb_quality: u8,
    pub thumb_extraction_point: f64,
    pub thumb_workers: usize,
    pub thumb_batch_size: usize,
    pub thumb_time_budget_secs: u64,

    pub cors_allowed_origins: Option<Vec<String>>,
    pub cors_allow_credentials: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            ffprobe_path: "ffprobe".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            probe_timeout_secs: 30,
            ffmpeg_timeout_secs: 60,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_workers: 8,
            video_extensions: [".mp4", ".mkv", ".mov", ".divx", ".webm", ".mpg", ".avi"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            local_cache_size: 1000,
            local_cache_ttl_secs: 3600,
            redis_url: None,
            redis_ttl_secs: 86_400,
            compression_level: 6,
            thumb_size: 50,
            thumb_format: "webp".to_string(),
            thumb_quality: 80,
            thumb_extraction_point: 0.1,
            thumb_workers: 4,
            thumb_batch_size: 100,
            thumb_time_budget_secs: 600,
            cors_allowed_origins: None,
            cors_allow_credentials: false,
        }
    }
}
