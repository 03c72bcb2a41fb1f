//! Server configuration: `lumen.toml`, overlaid by environment variables.

pub mod loader;
pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use lumen_core::scan::ScannerConfig;
use lumen_model::SiteSettings;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions, ConfigWarnings};

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scanner: ScannerConfig,
    pub schedule: ScheduleOverrides,
    /// How often a running server re-reads the persisted site settings.
    /// Zero disables polling; SIGHUP still triggers a reload.
    pub settings_refresh: Duration,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

/// Worker count and periodic interval given in the file or environment.
///
/// The persisted site settings are authoritative; values present here
/// replace them for the lifetime of this process without being saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOverrides {
    pub workers: Option<i32>,
    pub interval: Option<Duration>,
}

impl ScheduleOverrides {
    pub fn is_empty(&self) -> bool {
        self.workers.is_none() && self.interval.is_none()
    }

    pub fn apply(&self, persisted: SiteSettings) -> SiteSettings {
        SiteSettings {
            concurrent_workers: self.workers.unwrap_or(persisted.concurrent_workers),
            periodic_scan_interval: self
                .interval
                .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
                .unwrap_or(persisted.periodic_scan_interval),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Config {
    pub fn database_url(&self) -> Result<&str, ConfigLoadError> {
        self.database
            .url
            .as_deref()
            .ok_or(ConfigLoadError::MissingDatabaseUrl)
    }
}
