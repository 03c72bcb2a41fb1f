#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use lumen_core::database::{CatalogDump, InMemoryCatalog};
use lumen_core::scan::{
    AlbumDiscovery, AlbumScanJob, AlbumScanReport, DiscoveryReport, ExtensionClassifier,
    InMemoryFs, InProcScanEventBus, Reconciler, ScanPipeline, ScanServices, ScanStage,
    TraversalCache,
};
use lumen_core::stages::{CleanupStage, IgnoreFileStage, SidecarStage};
use lumen_model::User;
use tempfile::TempDir;

pub const IGNORE_FILE: &str = ".lumenignore";

/// In-memory library plus a real scratch directory for staging and the
/// artifact cache.
pub struct Harness {
    pub fs: InMemoryFs,
    pub catalog: Arc<InMemoryCatalog>,
    pub events: Arc<InProcScanEventBus>,
    pub services: ScanServices,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let scratch = tempfile::tempdir().expect("tempdir");
        let fs = InMemoryFs::new().with_staging_dir(scratch.path().join("staging"));
        let catalog = Arc::new(InMemoryCatalog::new());
        let events = Arc::new(InProcScanEventBus::new(256));
        let services = ScanServices {
            fs: Arc::new(fs.clone()),
            catalog: catalog.clone(),
            classifier: Arc::new(ExtensionClassifier::new()),
            events: events.clone(),
            cache_root: scratch.path().join("cache"),
        };
        Self {
            fs,
            catalog,
            events,
            services,
            scratch,
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.services.cache_root.clone()
    }

    pub async fn add_user(&self, username: &str, roots: &[&str]) -> User {
        use lumen_core::database::Catalog;

        let roots: Vec<PathBuf> = roots.iter().map(PathBuf::from).collect();
        let mut tx = self.catalog.begin().await.expect("begin");
        let user = tx.upsert_user(username, &roots).await.expect("upsert user");
        tx.commit().await.expect("commit");
        user
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.services.clone())
    }

    pub fn discovery(&self) -> AlbumDiscovery {
        AlbumDiscovery::new(self.services.clone(), self.reconciler())
    }

    /// Stage list without artifact rendering, which needs real image data.
    pub fn light_stages(&self) -> Vec<Arc<dyn ScanStage>> {
        vec![
            Arc::new(IgnoreFileStage::new(IGNORE_FILE)),
            Arc::new(SidecarStage::new()),
            Arc::new(CleanupStage::new(self.reconciler())),
        ]
    }

    pub fn pipeline(&self, stages: Vec<Arc<dyn ScanStage>>) -> ScanPipeline {
        ScanPipeline::new(self.services.clone(), stages)
    }

    pub async fn discover(&self, user: &User) -> (DiscoveryReport, Arc<TraversalCache>) {
        let cache = Arc::new(TraversalCache::with_ignore_file(IGNORE_FILE));
        let report = self
            .discovery()
            .find_albums_for_user(user, Arc::clone(&cache))
            .await;
        (report, cache)
    }

    /// Discover, then scan every album in turn.
    pub async fn scan(&self, pipeline: &ScanPipeline, user: &User) -> Vec<AlbumScanReport> {
        let (report, cache) = self.discover(user).await;
        let mut reports = Vec::new();
        for job in report.jobs(&cache) {
            reports.push(scan_job(pipeline, &job).await);
        }
        reports
    }

    pub async fn dump(&self) -> CatalogDump {
        self.catalog.dump().await
    }
}

pub async fn scan_job(pipeline: &ScanPipeline, job: &AlbumScanJob) -> AlbumScanReport {
    pipeline.scan_album(job).await.expect("album scan")
}

pub fn album_paths(dump: &CatalogDump) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = dump.albums.values().map(|a| a.path.clone()).collect();
    paths.sort();
    paths
}

pub fn media_paths(dump: &CatalogDump) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = dump.media.values().map(|m| m.path.clone()).collect();
    paths.sort();
    paths
}
