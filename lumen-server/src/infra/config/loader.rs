use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use lumen_core::scan::ScannerConfig;
use once_cell::sync::Lazy;
use thiserror::Error;
use url::Url;

use super::sources::{EnvConfig, FileConfig, FileDatabaseConfig};
use super::{Config, ConfigMetadata, DatabaseConfig, ScheduleOverrides};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("lumen.toml"),
        PathBuf::from("config/lumen.toml"),
    ]
});

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_SETTINGS_REFRESH: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Use these values instead of reading the process environment. No
    /// `.env` file is loaded when set.
    pub env: Option<EnvConfig>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

/// Non-fatal findings reported once tracing is up.
#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<String>,
}

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.options.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (env_config, env_file_loaded) = match &self.options.env {
            Some(env) => (env.clone(), false),
            None => {
                let loaded = self.load_env_file()?;
                (EnvConfig::gather(), loaded)
            }
        };

        let (file_config, config_path) = self.load_file_config(&env_config)?;
        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push("no lumen.toml found; using environment variables and defaults");
        }

        let metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        let config = compose_config(file_config.unwrap_or_default(), &env_config, metadata)?;
        if config.database.url.is_none() {
            warnings.push("no database URL configured; set DATABASE_URL or [database].url");
        }
        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        match loaded {
            Ok(loaded) => Ok(loaded),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(ConfigLoadError::EnvFile(err)),
        }
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS.iter().find(|c| c.exists()) {
                Some(found) => found.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok((Some(file_config), Some(path)))
    }
}

/// Environment values win over the file; the file wins over defaults.
fn compose_config(
    file: FileConfig,
    env: &EnvConfig,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        database: file_database,
        cache: file_cache,
        scanner: file_scanner,
    } = file;

    let max_connections = match env.database_max_connections.as_deref() {
        Some(raw) => parse_env("LUMEN_DATABASE_MAX_CONNECTIONS", raw)?,
        None => file_database
            .max_connections
            .unwrap_or(DEFAULT_MAX_CONNECTIONS),
    };
    if max_connections == 0 {
        return Err(ConfigLoadError::Invalid {
            field: "database.max_connections",
            reason: "must be at least 1".into(),
        });
    }
    let database = DatabaseConfig {
        url: resolve_database_url(env, &file_database)?,
        max_connections,
    };

    let defaults = ScannerConfig::default();
    let workers = match env.scanner_workers.as_deref() {
        Some(raw) => Some(parse_env::<i64>("LUMEN_SCANNER_WORKERS", raw)?),
        None => file_scanner.workers,
    };
    let workers = workers.map(validate_workers).transpose()?;

    let interval = match env.scan_interval.as_deref() {
        Some(raw) => Some(parse_duration("LUMEN_SCAN_INTERVAL", raw)?),
        None => file_scanner
            .interval
            .as_deref()
            .map(|raw| parse_duration("scanner.interval", raw))
            .transpose()?,
    };

    let thumbnail_size = match env.thumbnail_size.as_deref() {
        Some(raw) => parse_env("LUMEN_THUMBNAIL_SIZE", raw)?,
        None => file_scanner.thumbnail_size.unwrap_or(defaults.thumbnail_size),
    };
    if thumbnail_size == 0 {
        return Err(ConfigLoadError::Invalid {
            field: "scanner.thumbnail_size",
            reason: "must be at least 1 pixel".into(),
        });
    }

    let jpeg_quality = match env.jpeg_quality.as_deref() {
        Some(raw) => parse_env("LUMEN_JPEG_QUALITY", raw)?,
        None => file_scanner.jpeg_quality.unwrap_or(defaults.jpeg_quality),
    };
    if !(1..=100).contains(&jpeg_quality) {
        return Err(ConfigLoadError::Invalid {
            field: "scanner.jpeg_quality",
            reason: format!("must be between 1 and 100, got {jpeg_quality}"),
        });
    }

    let progress_throttle = match env.progress_throttle.as_deref() {
        Some(raw) => parse_duration("LUMEN_PROGRESS_THROTTLE", raw)?,
        None => match file_scanner.progress_throttle.as_deref() {
            Some(raw) => parse_duration("scanner.progress_throttle", raw)?,
            None => defaults.progress_throttle(),
        },
    };

    let settings_refresh = match env.settings_refresh.as_deref() {
        Some(raw) => parse_duration("LUMEN_SETTINGS_REFRESH", raw)?,
        None => match file_scanner.settings_refresh.as_deref() {
            Some(raw) => parse_duration("scanner.settings_refresh", raw)?,
            None => DEFAULT_SETTINGS_REFRESH,
        },
    };

    let scanner = ScannerConfig {
        cache_root: env
            .cache_root
            .clone()
            .or(file_cache.root)
            .unwrap_or(defaults.cache_root),
        thumbnail_size,
        jpeg_quality,
        progress_throttle_ms: u64::try_from(progress_throttle.as_millis()).unwrap_or(u64::MAX),
        ignore_file_name: env
            .ignore_file
            .clone()
            .or(file_scanner.ignore_file)
            .unwrap_or(defaults.ignore_file_name),
        event_capacity: file_scanner
            .event_capacity
            .unwrap_or(defaults.event_capacity)
            .max(1),
    };

    Ok(Config {
        database,
        scanner,
        schedule: ScheduleOverrides { workers, interval },
        settings_refresh,
        metadata,
    })
}

fn validate_workers(workers: i64) -> Result<i32, ConfigLoadError> {
    if workers < 0 {
        return Err(ConfigLoadError::Invalid {
            field: "scanner.workers",
            reason: format!("must not be negative, got {workers}"),
        });
    }
    i32::try_from(workers).map_err(|_| ConfigLoadError::Invalid {
        field: "scanner.workers",
        reason: format!("{workers} is too large"),
    })
}

fn parse_env<T>(key: &'static str, raw: &str) -> Result<T, ConfigLoadError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|err: T::Err| ConfigLoadError::InvalidEnv {
            key,
            value: raw.to_string(),
            reason: err.to_string(),
        })
}

fn parse_duration(field: &'static str, raw: &str) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|source| ConfigLoadError::InvalidDuration {
        field,
        value: raw.to_string(),
        source,
    })
}

fn resolve_database_url(
    env: &EnvConfig,
    file_database: &FileDatabaseConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(url) = env.database_url.clone() {
        return Ok(Some(url));
    }
    if let Some(path) = env.database_url_file.as_ref()
        && let Some(url) = read_secret_file(path)?
    {
        return Ok(Some(url));
    }

    if let Some(stored) = file_database.url.as_deref().map(str::trim)
        && !stored.is_empty()
    {
        let mut parsed =
            Url::parse(stored).map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
        if parsed.password().is_none()
            && let Some(password) = resolve_database_password(env, file_database)?
        {
            parsed
                .set_password(Some(&password))
                .map_err(|_| ConfigLoadError::InvalidDatabasePassword)?;
        }
        return Ok(Some(parsed.to_string()));
    }

    if let (Some(host), Some(user), Some(name)) = (
        env.database_host.as_deref(),
        env.database_user.as_deref(),
        env.database_name.as_deref(),
    ) {
        let port: u16 = match env.database_port.as_deref() {
            Some(raw) => parse_env("DATABASE_PORT", raw)?,
            None => 5432,
        };
        let mut url = Url::parse(&format!("postgresql://{host}:{port}/{name}"))
            .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
        url.set_username(user)
            .map_err(|_| ConfigLoadError::InvalidDatabaseUsername {
                username: user.to_string(),
            })?;
        if let Some(password) = resolve_database_password(env, file_database)? {
            url.set_password(Some(&password))
                .map_err(|_| ConfigLoadError::InvalidDatabasePassword)?;
        }
        return Ok(Some(url.to_string()));
    }

    Ok(None)
}

fn resolve_database_password(
    env: &EnvConfig,
    file_database: &FileDatabaseConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(password) = env.database_password.clone() {
        return Ok(Some(password));
    }
    for path in [
        env.database_password_file.as_ref(),
        file_database.password_file.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        if let Some(secret) = read_secret_file(path)? {
            return Ok(Some(secret));
        }
    }
    Ok(None)
}

fn read_secret_file(path: &Path) -> Result<Option<String>, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::SecretFileIo {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },

    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to load .env file")]
    EnvFile(#[source] dotenvy::Error),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid duration '{value}' for {field}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },

    #[error("invalid database username '{username}'")]
    InvalidDatabaseUsername { username: String },

    #[error("failed to encode database password into URL")]
    InvalidDatabasePassword,

    #[error("failed to read secret file {path}")]
    SecretFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no database URL configured; set DATABASE_URL or [database].url")]
    MissingDatabaseUrl,
}
