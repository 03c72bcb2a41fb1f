use std::sync::Arc;

use chrono::TimeDelta;
use lumen_model::SiteSettings;

use crate::error::{Result, ScanError};
use crate::scan::config::ScannerConfig;
use crate::scan::control::{LibraryRescan, ScanControl};
use crate::scan::discovery::AlbumDiscovery;
use crate::scan::pipeline::{AlbumScanJob, AlbumScanProcessor, ScanPipeline, ScanStage};
use crate::scan::queue::{JobProcessor, JobQueue, PeriodicTrigger, QueueSettings};
use crate::scan::reconcile::Reconciler;
use crate::scan::services::ScanServices;
use crate::stages::default_stages;

/// A running scanner: queue, pipeline and control surface wired together.
#[derive(Debug)]
pub struct ScanSystem {
    pub services: ScanServices,
    pub pipeline: Arc<ScanPipeline>,
    pub queue: Arc<JobQueue<AlbumScanJob>>,
    pub control: Arc<ScanControl>,
}

impl ScanSystem {
    /// Start with the default stage list.
    pub fn start(
        services: ScanServices,
        config: &ScannerConfig,
        settings: &SiteSettings,
    ) -> Result<Self> {
        let stages = default_stages(config, Reconciler::new(services.clone()));
        Self::start_with_stages(services, config, stages, settings)
    }

    pub fn start_with_stages(
        services: ScanServices,
        config: &ScannerConfig,
        stages: Vec<Arc<dyn ScanStage>>,
        settings: &SiteSettings,
    ) -> Result<Self> {
        let reconciler = Reconciler::new(services.clone());
        let discovery = AlbumDiscovery::new(services.clone(), reconciler);
        let rescan = LibraryRescan::new(Arc::clone(&services.catalog), discovery)
            .with_ignore_file(config.ignore_file_name.clone());

        let pipeline = Arc::new(ScanPipeline::new(services.clone(), stages));
        let processor: Arc<dyn JobProcessor<AlbumScanJob>> =
            Arc::new(AlbumScanProcessor::new(Arc::clone(&pipeline)));
        let trigger: Arc<dyn PeriodicTrigger<AlbumScanJob>> = Arc::new(rescan.clone());

        let interval = TimeDelta::try_seconds(settings.periodic_scan_interval).ok_or_else(|| {
            ScanError::InvalidSetting(format!(
                "periodic scan interval of {}s is out of range",
                settings.periodic_scan_interval
            ))
        })?;
        let queue = Arc::new(
            JobQueue::builder(processor)
                .trigger(trigger)
                .events(Arc::clone(&services.events))
                .settings(QueueSettings {
                    workers: settings.concurrent_workers,
                    interval,
                })
                .start()?,
        );

        let control = Arc::new(ScanControl::new(
            Arc::clone(&services.catalog),
            rescan,
            Arc::clone(&queue),
        ));

        Ok(Self {
            services,
            pipeline,
            queue,
            control,
        })
    }

    /// Close the queue, returning the album scans that never started.
    pub async fn shutdown(&self) -> Vec<AlbumScanJob> {
        self.queue.close().await
    }
}
