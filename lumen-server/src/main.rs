use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lumen_core::database::Catalog;
use lumen_core::scan::LibraryScanReport;
use lumen_model::{SiteSettings, UserId};
use lumen_server::cli::{Cli, Command, DbCommand, ScanArgs, ServeArgs, SettingsCommand, UserCommand};
use lumen_server::infra::app::{AppContext, connect_catalog};
use lumen_server::infra::config::{Config, ConfigLoad, ConfigLoader};
use lumen_server::infra::settings::SettingsSync;
use lumen_server::infra::telemetry::{init_tracing, spawn_event_logger};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(cli.config, cli.env_file)?;

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => run_server(&config, args).await,
        Command::Scan(args) => run_scan(&config, args).await,
        Command::User(command) => run_user(&config, command).await,
        Command::Settings(command) => run_settings(&config, command).await,
        Command::Db(DbCommand::Migrate) => {
            connect_catalog(&config).await?;
            info!("database migrations applied");
            Ok(())
        }
    }
}

fn load_runtime_config(
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = env_file {
        loader = loader.with_env_file(path);
    }
    let ConfigLoad { config, warnings } =
        loader.load().context("failed to load configuration")?;

    init_tracing();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration loaded");
    }
    for warning in &warnings.items {
        warn!("{warning}");
    }
    Ok(config)
}

async fn run_server(config: &Config, args: ServeArgs) -> anyhow::Result<()> {
    let app = AppContext::start(config, true).await?;
    let shutdown = CancellationToken::new();
    let logger = spawn_event_logger(&app.events, shutdown.child_token());

    info!(
        workers = app.settings.concurrent_workers,
        interval_secs = app.settings.periodic_scan_interval,
        cache_root = %config.scanner.cache_root.display(),
        "scanner started"
    );

    let stop_watcher = shutdown.child_token();
    let watcher = SettingsSync::new(
        app.catalog.clone(),
        app.system.control.clone(),
        config.schedule,
        app.settings,
    )
    .spawn(config.settings_refresh, stop_watcher.clone());

    if !args.no_initial_scan {
        match app.system.control.scan_all().await {
            Ok(report) => log_scan_report(&report),
            Err(err) => warn!(error = %err, "initial scan failed"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested; waiting for running album scans");

    stop_watcher.cancel();
    if let Err(err) = watcher.await {
        warn!(error = %err, "settings watcher failed during shutdown");
    }

    let dropped = app.system.shutdown().await;
    if !dropped.is_empty() {
        info!(dropped = dropped.len(), "queued album scans discarded");
    }
    shutdown.cancel();
    if let Err(err) = logger.await {
        warn!(error = %err, "event logger failed during shutdown");
    }
    Ok(())
}

async fn run_scan(config: &Config, args: ScanArgs) -> anyhow::Result<()> {
    let app = AppContext::start(config, false).await?;
    if app.settings.concurrent_workers == 0 {
        anyhow::bail!("scanning is paused (0 workers); raise it with `settings set --workers`");
    }
    let shutdown = CancellationToken::new();
    let logger = spawn_event_logger(&app.events, shutdown.child_token());

    let report = match args.user {
        Some(id) => app.system.control.scan_user(UserId(id)).await?,
        None => app.system.control.scan_all().await?,
    };
    log_scan_report(&report);

    let interrupted = CancellationToken::new();
    let on_signal = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let drained = app.system.queue.consume_backlog(&interrupted).await;
    let dropped = app.system.shutdown().await;
    shutdown.cancel();
    if let Err(err) = logger.await {
        warn!(error = %err, "event logger failed during shutdown");
    }

    match drained {
        Ok(()) => {
            info!("scan finished");
            Ok(())
        }
        Err(err) => {
            warn!(dropped = dropped.len(), "scan interrupted");
            Err(err.into())
        }
    }
}

async fn run_user(config: &Config, command: UserCommand) -> anyhow::Result<()> {
    let catalog = connect_catalog(config).await?;
    let mut tx = catalog.begin().await?;
    match command {
        UserCommand::Add { username, roots } => {
            let roots = roots
                .into_iter()
                .map(|root| {
                    std::path::absolute(&root)
                        .with_context(|| format!("invalid root path {}", root.display()))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            let user = tx.upsert_user(&username, &roots).await?;
            tx.commit().await?;
            println!("{}\t{}", user.id, user.username);
        }
        UserCommand::List => {
            for user in tx.list_users().await? {
                let roots: Vec<String> = user
                    .root_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                println!("{}\t{}\t{}", user.id, user.username, roots.join(", "));
            }
            tx.commit().await?;
        }
    }
    Ok(())
}

async fn run_settings(config: &Config, command: SettingsCommand) -> anyhow::Result<()> {
    let catalog = connect_catalog(config).await?;
    let mut tx = catalog.begin().await?;
    let current = tx.site_settings().await?;
    match command {
        SettingsCommand::Show => {
            tx.commit().await?;
            print_settings(&current);
        }
        SettingsCommand::Set { workers, interval } => {
            let updated = SiteSettings {
                concurrent_workers: match workers {
                    Some(workers) => i32::try_from(workers)
                        .with_context(|| format!("{workers} workers is too many"))?,
                    None => current.concurrent_workers,
                },
                periodic_scan_interval: match interval {
                    Some(interval) => i64::try_from(interval.as_secs())
                        .context("interval is too long")?,
                    None => current.periodic_scan_interval,
                },
            };
            tx.update_site_settings(updated).await?;
            tx.commit().await?;
            print_settings(&updated);
        }
    }
    Ok(())
}

fn print_settings(settings: &SiteSettings) {
    let interval = if settings.periodic_scan_interval == 0 {
        "disabled".to_string()
    } else {
        let secs = u64::try_from(settings.periodic_scan_interval).unwrap_or_default();
        humantime::format_duration(std::time::Duration::from_secs(secs)).to_string()
    };
    println!("workers\t{}", settings.concurrent_workers);
    println!("interval\t{interval}");
}

fn log_scan_report(report: &LibraryScanReport) {
    info!(
        albums = report.albums,
        queued = report.submitted.accepted,
        merged = report.submitted.merged,
        errors = report.errors.len(),
        "library discovery finished"
    );
    for err in &report.errors {
        warn!(error = %err, "discovery error");
    }
}
