use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::initialize_database;
use crate::metadata::{LocalTier, MetadataChain, MetadataTier, ProbeTier, SharedTier, StoreTier};
use crate::retry::RetryPolicy;

pub fn load_config(cli_path: Option<PathBuf>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    use ::config::{builder::DefaultState, ConfigBuilder, File};

    let mut chosen: Option<PathBuf> = None;

    // CLI path is used as-is; deserialization fails loudly if the format is
    // wrong.
    if let Some(p) = cli_path {
        chosen = Some(p);
    } else {
        let existing = |p: PathBuf| -> Option<PathBuf> { p.exists().then_some(p) };

        if let Ok(cwd) = std::env::current_dir() {
            chosen = existing(cwd.join("config.json"));
        }
        if chosen.is_none() {
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                chosen = existing(PathBuf::from(xdg).join("vindex/config.json"));
            }
        }
        if chosen.is_none() {
            if let Some(home) = dirs::home_dir() {
                chosen = existing(home.join(".config/vindex/config.json"));
            }
        }
        if chosen.is_none() {
            chosen = existing(PathBuf::from("/etc/vindex/config.json"));
        }
    }

    let Some(cfg_path) = chosen else {
        info!("no config.json found, running with defaults");
        return Ok(AppConfig::default());
    };

    info!("using configuration file: {}", cfg_path.display());
    let settings = ConfigBuilder::<DefaultState>::default()
        .add_source(File::from(cfg_path))
        .build()?;
    let cfg: AppConfig = settings.try_deserialize()?;
    Ok(cfg)
}

/// Resolves the database location when the config leaves it empty:
/// XDG data dir per user, falling back to the working directory.
pub fn resolve_db_path(config: &AppConfig) -> PathBuf {
    if !config.db_path.is_empty() {
        return PathBuf::from(&config.db_path);
    }
    if let Some(data) = dirs::data_dir() {
        data.join("vindex/index.db")
    } else {
        PathBuf::from("index.db")
    }
}

pub async fn init_db(config: &AppConfig) -> Result<SqlitePool, Box<dyn std::error::Error>> {
    let db_path = resolve_db_path(config);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!("resolved db path: {}", db_path.display());
    if !db_path.exists() {
        std::fs::File::create(&db_path)?;
    }
    let db_url = format!("sqlite://{}", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&db_url)
        .await?;
    initialize_database(&pool).await?;
    Ok(pool)
}

/// Assembles the metadata lookup chain in cost order. The shared cache is
/// optional; when the configured server is unreachable at startup the tier
/// is skipped rather than failing boot.
pub async fn build_metadata_chain(config: &AppConfig, pool: SqlitePool) -> Arc<MetadataChain> {
    let mut tiers: Vec<Box<dyn MetadataTier>> = vec![Box::new(LocalTier::new(
        config.local_cache_size,
        Duration::from_secs(config.local_cache_ttl_secs),
    ))];

    if let Some(url) = &config.redis_url {
        match SharedTier::connect(url, config.redis_ttl_secs, config.compression_level).await {
            Ok(tier) => tiers.push(Box::new(tier)),
            Err(e) => warn!("shared metadata cache unavailable, continuing without it: {e}"),
        }
    }

    tiers.push(Box::new(StoreTier::new(pool)));
    tiers.push(Box::new(ProbeTier::new(
        config.ffprobe_path.clone(),
        Duration::from_secs(config.probe_timeout_secs),
        RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        ),
    )));

    Arc::new(MetadataChain::new(tiers))
}

pub fn build_cors(config: &AppConfig) -> CorsLayer {
    let mut cors =
        CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);

    let explicit: Vec<HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect();

    if explicit.is_empty() {
        // credentials cannot be combined with a wildcard origin
        if config.cors_allow_credentials {
            warn!("cors_allow_credentials requires explicit origins, ignoring");
        }
        cors = cors.allow_origin(Any).allow_headers(Any);
    } else {
        cors = cors
            .allow_origin(tower_http::cors::AllowOrigin::list(explicit))
            .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::RANGE]);
        if config.cors_allow_credentials {
            cors = cors.allow_credentials(true);
        }
    }

    cors
}
