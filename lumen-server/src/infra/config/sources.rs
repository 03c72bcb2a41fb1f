use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Raw configuration as written in `lumen.toml`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub cache: FileCacheConfig,
    #[serde(default)]
    pub scanner: FileScannerConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileCacheConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// Durations are humantime strings such as `"15m"` or `"500ms"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileScannerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg_quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_throttle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_refresh: Option<String>,
}

/// Environment-derived configuration values, kept as raw strings so the
/// loader can report which variable was malformed.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_url_file: Option<PathBuf>,
    pub database_host: Option<String>,
    pub database_port: Option<String>,
    pub database_user: Option<String>,
    pub database_name: Option<String>,
    pub database_password: Option<String>,
    pub database_password_file: Option<PathBuf>,
    pub database_max_connections: Option<String>,
    pub cache_root: Option<PathBuf>,
    pub scanner_workers: Option<String>,
    pub scan_interval: Option<String>,
    pub thumbnail_size: Option<String>,
    pub jpeg_quality: Option<String>,
    pub progress_throttle: Option<String>,
    pub ignore_file: Option<String>,
    pub settings_refresh: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let path = |key: &str| var(key).map(PathBuf::from);

        Self {
            config_path: path("LUMEN_CONFIG"),
            database_url: var("DATABASE_URL"),
            database_url_file: path("DATABASE_URL_FILE"),
            database_host: var("DATABASE_HOST"),
            database_port: var("DATABASE_PORT"),
            database_user: var("DATABASE_USER"),
            database_name: var("DATABASE_NAME"),
            database_password: var("DATABASE_PASSWORD"),
            database_password_file: path("DATABASE_PASSWORD_FILE"),
            database_max_connections: var("LUMEN_DATABASE_MAX_CONNECTIONS"),
            cache_root: path("LUMEN_CACHE_ROOT"),
            scanner_workers: var("LUMEN_SCANNER_WORKERS"),
            scan_interval: var("LUMEN_SCAN_INTERVAL"),
            thumbnail_size: var("LUMEN_THUMBNAIL_SIZE"),
            jpeg_quality: var("LUMEN_JPEG_QUALITY"),
            progress_throttle: var("LUMEN_PROGRESS_THROTTLE"),
            ignore_file: var("LUMEN_IGNORE_FILE"),
            settings_refresh: var("LUMEN_SETTINGS_REFRESH"),
        }
    }
}
