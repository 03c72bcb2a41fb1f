use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lumen_model::SiteSettings;
use lumen_server::infra::config::sources::EnvConfig;
use lumen_server::infra::config::{ConfigLoadError, ConfigLoader, ScheduleOverrides};
use tempfile::TempDir;

fn env(vars: &[(&str, &str)]) -> EnvConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvConfig::from_lookup(|key| vars.get(key).cloned())
}

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("lumen.toml");
    std::fs::write(&path, contents).expect("write config");
    path
}

fn loader(path: &Path, vars: &[(&str, &str)]) -> ConfigLoader {
    ConfigLoader::new().with_config_path(path).with_env(env(vars))
}

#[test]
fn file_values_are_parsed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        &dir,
        r#"
[database]
url = "postgresql://lumen:secret@db:5432/lumen"
max_connections = 4

[cache]
root = "/var/cache/lumen"

[scanner]
workers = 6
interval = "15m"
thumbnail_size = 512
jpeg_quality = 90
progress_throttle = "250ms"
ignore_file = ".noindex"
settings_refresh = "2m"
"#,
    );

    let load = loader(&path, &[]).load().expect("load");
    let config = load.config;

    assert_eq!(
        config.database_url().expect("url"),
        "postgresql://lumen:secret@db:5432/lumen"
    );
    assert_eq!(config.database.max_connections, 4);
    assert_eq!(config.scanner.cache_root, PathBuf::from("/var/cache/lumen"));
    assert_eq!(config.scanner.thumbnail_size, 512);
    assert_eq!(config.scanner.jpeg_quality, 90);
    assert_eq!(config.scanner.progress_throttle_ms, 250);
    assert_eq!(config.scanner.ignore_file_name, ".noindex");
    assert_eq!(config.settings_refresh, Duration::from_secs(120));
    assert_eq!(
        config.schedule,
        ScheduleOverrides {
            workers: Some(6),
            interval: Some(Duration::from_secs(900)),
        }
    );
    assert_eq!(config.metadata.config_path.as_deref(), Some(path.as_path()));
    assert!(load.warnings.is_empty(), "{:?}", load.warnings);
}

#[test]
fn environment_overrides_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        &dir,
        r#"
[cache]
root = "/from/file"

[scanner]
workers = 2
interval = "1h"
"#,
    );

    let config = loader(
        &path,
        &[
            ("DATABASE_URL", "postgresql://env@localhost/lumen"),
            ("LUMEN_CACHE_ROOT", "/from/env"),
            ("LUMEN_SCANNER_WORKERS", "8"),
            ("LUMEN_SCAN_INTERVAL", "30s"),
            ("LUMEN_SETTINGS_REFRESH", "0s"),
        ],
    )
    .load()
    .expect("load")
    .config;

    assert_eq!(
        config.database.url.as_deref(),
        Some("postgresql://env@localhost/lumen")
    );
    assert_eq!(config.scanner.cache_root, PathBuf::from("/from/env"));
    assert_eq!(config.schedule.workers, Some(8));
    assert_eq!(config.schedule.interval, Some(Duration::from_secs(30)));
    assert!(config.settings_refresh.is_zero());
}

#[test]
fn defaults_apply_without_a_file() {
    let config = ConfigLoader::new()
        .with_env(env(&[]))
        .load()
        .expect("load");

    assert!(config.config.metadata.config_path.is_none());
    assert!(config.config.schedule.is_empty());
    assert_eq!(config.config.scanner.thumbnail_size, 1024);
    assert_eq!(config.config.settings_refresh, Duration::from_secs(30));
    assert!(matches!(
        config.config.database_url(),
        Err(ConfigLoadError::MissingDatabaseUrl)
    ));
    assert_eq!(config.warnings.items.len(), 2);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = loader(&dir.path().join("absent.toml"), &[])
        .load()
        .expect_err("missing file");
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn negative_workers_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir, "[scanner]\nworkers = -1\n");
    let err = loader(&path, &[]).load().expect_err("negative in file");
    assert!(matches!(
        err,
        ConfigLoadError::Invalid {
            field: "scanner.workers",
            ..
        }
    ));

    let path = write_config(&dir, "");
    let err = loader(&path, &[("LUMEN_SCANNER_WORKERS", "-3")])
        .load()
        .expect_err("negative in env");
    assert!(matches!(err, ConfigLoadError::Invalid { .. }));

    let err = loader(&path, &[("LUMEN_SCANNER_WORKERS", "many")])
        .load()
        .expect_err("not a number");
    assert!(matches!(
        err,
        ConfigLoadError::InvalidEnv {
            key: "LUMEN_SCANNER_WORKERS",
            ..
        }
    ));
}

#[test]
fn malformed_durations_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir, "[scanner]\ninterval = \"soon\"\n");
    let err = loader(&path, &[]).load().expect_err("bad interval");
    assert!(matches!(
        err,
        ConfigLoadError::InvalidDuration {
            field: "scanner.interval",
            ..
        }
    ));
}

#[test]
fn out_of_range_quality_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir, "[scanner]\njpeg_quality = 0\n");
    let err = loader(&path, &[]).load().expect_err("quality 0");
    assert!(matches!(
        err,
        ConfigLoadError::Invalid {
            field: "scanner.jpeg_quality",
            ..
        }
    ));
}

#[test]
fn unknown_keys_fail_parsing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir, "[scanner]\nworker = 3\n");
    let err = loader(&path, &[]).load().expect_err("typo");
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn database_url_is_composed_from_parts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir, "");
    let password_file = dir.path().join("db_password");
    std::fs::write(&password_file, "s3cret\n").expect("write secret");

    let config = loader(
        &path,
        &[
            ("DATABASE_HOST", "db"),
            ("DATABASE_PORT", "6543"),
            ("DATABASE_USER", "lumen"),
            ("DATABASE_NAME", "library"),
            (
                "DATABASE_PASSWORD_FILE",
                password_file.to_str().expect("utf-8 path"),
            ),
        ],
    )
    .load()
    .expect("load")
    .config;

    assert_eq!(
        config.database_url().expect("url"),
        "postgresql://lumen:s3cret@db:6543/library"
    );
}

#[test]
fn file_url_gets_a_password_from_the_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir, "[database]\nurl = \"postgresql://lumen@db/lumen\"\n");

    let config = loader(&path, &[("DATABASE_PASSWORD", "pw")])
        .load()
        .expect("load")
        .config;

    assert_eq!(
        config.database_url().expect("url"),
        "postgresql://lumen:pw@db/lumen"
    );
}

#[test]
fn overrides_replace_only_the_values_they_set() {
    let persisted = SiteSettings {
        concurrent_workers: 3,
        periodic_scan_interval: 600,
    };
    let overrides = ScheduleOverrides {
        workers: None,
        interval: Some(Duration::from_secs(0)),
    };
    assert_eq!(
        overrides.apply(persisted),
        SiteSettings {
            concurrent_workers: 3,
            periodic_scan_interval: 0,
        }
    );
    assert_eq!(ScheduleOverrides::default().apply(persisted), persisted);
}
