use std::sync::Arc;

use anyhow::Context;
use lumen_core::database::{Catalog, PostgresCatalog};
use lumen_core::scan::{
    ExtensionClassifier, InProcScanEventBus, RealFs, ScanServices, ScanSystem,
};
use lumen_model::SiteSettings;
use tracing::info;

use crate::infra::config::Config;

/// Everything a command needs: the database and a running scanner.
#[derive(Debug)]
pub struct AppContext {
    pub catalog: Arc<PostgresCatalog>,
    pub events: Arc<InProcScanEventBus>,
    pub system: ScanSystem,
    /// Settings the queue was started with.
    pub settings: SiteSettings,
}

pub async fn connect_catalog(config: &Config) -> anyhow::Result<Arc<PostgresCatalog>> {
    let url = config.database_url()?;
    let catalog = PostgresCatalog::connect(url, config.database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    catalog
        .migrate()
        .await
        .context("failed to apply database migrations")?;
    Ok(Arc::new(catalog))
}

impl AppContext {
    /// Connect, migrate and start the scanner. `periodic` controls whether
    /// the periodic rescan runs; one-shot commands disable it.
    pub async fn start(config: &Config, periodic: bool) -> anyhow::Result<Self> {
        let catalog = connect_catalog(config).await?;

        tokio::fs::create_dir_all(&config.scanner.cache_root)
            .await
            .with_context(|| {
                format!(
                    "failed to create cache root {}",
                    config.scanner.cache_root.display()
                )
            })?;

        let persisted = {
            let mut tx = catalog.begin().await?;
            let settings = tx.site_settings().await?;
            tx.commit().await?;
            settings
        };
        let mut settings = config.schedule.apply(persisted);
        if !config.schedule.is_empty() {
            info!(
                workers = settings.concurrent_workers,
                interval_secs = settings.periodic_scan_interval,
                "scanner settings overridden by configuration"
            );
        }
        if !periodic {
            settings.periodic_scan_interval = 0;
        }

        let events = Arc::new(InProcScanEventBus::new(config.scanner.event_capacity));
        let services = ScanServices {
            fs: Arc::new(RealFs::new()),
            catalog: catalog.clone(),
            classifier: Arc::new(ExtensionClassifier::new()),
            events: events.clone(),
            cache_root: config.scanner.cache_root.clone(),
        };
        let system = ScanSystem::start(services, &config.scanner, &settings)
            .context("invalid scanner settings")?;

        Ok(Self {
            catalog,
            events,
            system,
            settings,
        })
    }
}
