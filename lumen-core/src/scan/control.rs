use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use lumen_model::{Album, SiteSettings, UserId};
use tracing::{info, warn};

use crate::database::Catalog;
use crate::error::{Result, ScanError};
use crate::scan::discovery::AlbumDiscovery;
use crate::scan::pipeline::AlbumScanJob;
use crate::scan::queue::{JobQueue, PeriodicTrigger, SubmitOutcome};
use crate::scan::traversal_cache::TraversalCache;

/// Result of a discovery pass over one or more users.
#[derive(Debug, Default)]
pub struct LibraryScan {
    pub albums: Vec<Album>,
    pub jobs: Vec<AlbumScanJob>,
    pub errors: Vec<ScanError>,
}

/// Summary returned by [`ScanControl::scan_all`] and
/// [`ScanControl::scan_user`].
#[derive(Debug, Default)]
pub struct LibraryScanReport {
    pub albums: usize,
    pub submitted: SubmitOutcome,
    pub errors: Vec<ScanError>,
}

/// Derives the full set of album jobs for the library.
///
/// This is also the periodic trigger: every tick re-derives every user's
/// jobs, and the queue drops those already queued or running.
#[derive(Clone)]
pub struct LibraryRescan {
    catalog: Arc<dyn Catalog>,
    discovery: AlbumDiscovery,
    ignore_file: Option<String>,
}

impl fmt::Debug for LibraryRescan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryRescan")
            .field("discovery", &self.discovery)
            .field("ignore_file", &self.ignore_file)
            .finish_non_exhaustive()
    }
}

impl LibraryRescan {
    pub fn new(catalog: Arc<dyn Catalog>, discovery: AlbumDiscovery) -> Self {
        Self {
            catalog,
            discovery,
            ignore_file: None,
        }
    }

    /// Skip directories excluded by ignore files of this name.
    pub fn with_ignore_file(mut self, file_name: impl Into<String>) -> Self {
        self.ignore_file = Some(file_name.into());
        self
    }

    fn traversal_cache(&self) -> Arc<TraversalCache> {
        Arc::new(match &self.ignore_file {
            Some(name) => TraversalCache::with_ignore_file(name.clone()),
            None => TraversalCache::new(),
        })
    }

    /// Discover every user's albums with one traversal cache for the pass.
    pub async fn discover_all(&self) -> Result<LibraryScan> {
        let users = {
            let mut tx = self.catalog.begin().await?;
            let users = tx.list_users().await?;
            tx.commit().await?;
            users
        };

        let cache = self.traversal_cache();
        let mut scan = LibraryScan::default();
        for user in &users {
            let report = self
                .discovery
                .find_albums_for_user(user, Arc::clone(&cache))
                .await;
            scan.jobs.extend(report.jobs(&cache));
            scan.albums.extend(report.albums);
            scan.errors.extend(report.errors);
        }
        Ok(scan)
    }

    pub async fn discover_user(&self, id: UserId) -> Result<LibraryScan> {
        let user = {
            let mut tx = self.catalog.begin().await?;
            let user = tx.get_user(id).await?;
            tx.commit().await?;
            user.ok_or_else(|| ScanError::NotFound(format!("user {id}")))?
        };

        let cache = self.traversal_cache();
        let report = self
            .discovery
            .find_albums_for_user(&user, Arc::clone(&cache))
            .await;
        Ok(LibraryScan {
            jobs: report.jobs(&cache),
            albums: report.albums,
            errors: report.errors,
        })
    }
}

#[async_trait]
impl PeriodicTrigger<AlbumScanJob> for LibraryRescan {
    async fn collect(&self) -> Result<Vec<AlbumScanJob>> {
        let scan = self.discover_all().await?;
        for err in &scan.errors {
            warn!(target: "scan::discovery", error = %err, "periodic discovery error");
        }
        Ok(scan.jobs)
    }
}

/// Administrative entry point: triggers scans and applies scanner settings
/// to the running queue.
pub struct ScanControl {
    catalog: Arc<dyn Catalog>,
    rescan: LibraryRescan,
    queue: Arc<JobQueue<AlbumScanJob>>,
}

impl fmt::Debug for ScanControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanControl")
            .field("rescan", &self.rescan)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl ScanControl {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        rescan: LibraryRescan,
        queue: Arc<JobQueue<AlbumScanJob>>,
    ) -> Self {
        Self {
            catalog,
            rescan,
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue<AlbumScanJob>> {
        &self.queue
    }

    /// Discover every user's library and queue a scan of each album.
    pub async fn scan_all(&self) -> Result<LibraryScanReport> {
        let scan = self.rescan.discover_all().await?;
        self.submit(scan)
    }

    /// Same as [`ScanControl::scan_all`] for a single user.
    pub async fn scan_user(&self, user: UserId) -> Result<LibraryScanReport> {
        let scan = self.rescan.discover_user(user).await?;
        self.submit(scan)
    }

    /// Apply settings to the running queue without persisting them. Both
    /// values are validated before either is applied.
    pub fn apply_settings(&self, settings: &SiteSettings) -> Result<()> {
        let interval = validate_settings(settings)?;
        self.queue.set_worker_count(settings.concurrent_workers)?;
        self.queue.set_interval(interval)?;
        Ok(())
    }

    /// Persist settings, then apply them.
    pub async fn update_settings(&self, settings: SiteSettings) -> Result<()> {
        validate_settings(&settings)?;
        let mut tx = self.catalog.begin().await?;
        tx.update_site_settings(settings).await?;
        tx.commit().await?;
        self.apply_settings(&settings)?;
        info!(
            target: "scan::queue",
            workers = settings.concurrent_workers,
            interval_secs = settings.periodic_scan_interval,
            "scanner settings updated"
        );
        Ok(())
    }

    fn submit(&self, scan: LibraryScan) -> Result<LibraryScanReport> {
        let submitted = self.queue.submit(scan.jobs)?;
        Ok(LibraryScanReport {
            albums: scan.albums.len(),
            submitted,
            errors: scan.errors,
        })
    }
}

fn validate_settings(settings: &SiteSettings) -> Result<TimeDelta> {
    if settings.concurrent_workers < 0 {
        return Err(ScanError::InvalidSetting(format!(
            "concurrent workers must not be negative, got {}",
            settings.concurrent_workers
        )));
    }
    if settings.periodic_scan_interval < 0 {
        return Err(ScanError::InvalidSetting(format!(
            "periodic scan interval must not be negative, got {}",
            settings.periodic_scan_interval
        )));
    }
    TimeDelta::try_seconds(settings.periodic_scan_interval).ok_or_else(|| {
        ScanError::InvalidSetting(format!(
            "periodic scan interval of {}s is out of range",
            settings.periodic_scan_interval
        ))
    })
}
