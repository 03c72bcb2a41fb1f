//! Per-album scan pipeline.
//!
//! A scan lists the album directory, registers every media file it finds
//! (one transaction per file), runs the processing hooks for each of them
//! (again one transaction per file) and finally hands the outcome to the
//! album-level hooks, which reconcile the catalog with what was found.

mod hooks;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lumen_model::{Album, AlbumId, Media, MediaKind, MediaUrl, NewMedia};
use tracing::{debug, info, warn};

pub use hooks::{AlbumContext, AlbumScanOutcome, MediaContext, ScanStage, StageDecision};

use crate::error::{Result, ScanError};
use crate::scan::events::ScanEvent;
use crate::scan::fs::{is_hidden, list_dir};
use crate::scan::hashing::path_hash;
use crate::scan::queue::{Job, JobKey, JobProcessor};
use crate::scan::services::ScanServices;
use crate::scan::traversal_cache::TraversalCache;

/// Scan of one album, keyed by album id.
#[derive(Clone)]
pub struct AlbumScanJob {
    pub album: Album,
    /// Cache of the discovery pass that produced this job.
    pub cache: Arc<TraversalCache>,
}

impl fmt::Debug for AlbumScanJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlbumScanJob")
            .field("album", &self.album.id)
            .field("path", &self.album.path)
            .finish()
    }
}

impl Job for AlbumScanJob {
    fn key(&self) -> JobKey {
        self.album.id.as_i64()
    }

    fn description(&self) -> String {
        format!("scan album {} ({})", self.album.id, self.album.path.display())
    }
}

/// A file that could not be registered or processed.
#[derive(Debug)]
pub struct MediaFailure {
    pub path: PathBuf,
    pub error: ScanError,
}

/// Summary of one album scan.
#[derive(Debug, Default)]
pub struct AlbumScanReport {
    pub album_id: Option<AlbumId>,
    pub found: usize,
    pub new: usize,
    pub changed: Vec<MediaUrl>,
    pub failures: Vec<MediaFailure>,
}

/// Runs the ordered stage list over one album.
pub struct ScanPipeline {
    services: ScanServices,
    stages: Vec<Arc<dyn ScanStage>>,
}

impl fmt::Debug for ScanPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<&'static str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("ScanPipeline")
            .field("services", &self.services)
            .field("stages", &stages)
            .finish()
    }
}

impl ScanPipeline {
    pub fn new(services: ScanServices, stages: Vec<Arc<dyn ScanStage>>) -> Self {
        Self { services, stages }
    }

    pub fn services(&self) -> &ScanServices {
        &self.services
    }

    pub async fn scan_album(&self, job: &AlbumScanJob) -> Result<AlbumScanReport> {
        let ctx = AlbumContext::new(
            job.album.clone(),
            Arc::clone(&job.cache),
            self.services.clone(),
        );
        let album_path = ctx.album.path.clone();
        debug!(target: "scan::pipeline", album = %ctx.album.id, path = %album_path.display(), "scanning album");

        for stage in &self.stages {
            stage
                .before_scan_album(&ctx)
                .await
                .map_err(|err| hooks::in_stage(stage.as_ref(), err))?;
        }

        let entries = list_dir(self.services.fs.as_ref(), &album_path).await?;

        let mut report = AlbumScanReport {
            album_id: Some(ctx.album.id),
            ..AlbumScanReport::default()
        };
        let mut outcome = AlbumScanOutcome::default();

        for entry in entries.into_iter().filter(|e| !is_hidden(e)) {
            let kind = match self.classify(&ctx, &entry).await {
                Ok(Some(kind)) => kind,
                Ok(None) => continue,
                Err(error) => {
                    warn!(target: "scan::pipeline", path = %entry.display(), error = %error, "skipping unreadable entry");
                    outcome.failed_paths.push(entry.clone());
                    report.failures.push(MediaFailure { path: entry, error });
                    continue;
                }
            };

            match self.register_media(&ctx, &entry, kind).await {
                Ok(Some((media, is_new))) => {
                    if is_new {
                        report.new += 1;
                    }
                    outcome.found.push(media);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(target: "scan::pipeline", path = %entry.display(), error = %error, "failed to register media");
                    outcome.failed_paths.push(entry.clone());
                    report.failures.push(MediaFailure { path: entry, error });
                }
            }
        }

        let total = outcome.found.len();
        for (index, media) in outcome.found.iter().enumerate() {
            match self.process_media(&ctx, media, index, total).await {
                Ok(changed) => outcome.changed.extend(changed),
                Err(error) => {
                    warn!(
                        target: "scan::pipeline",
                        media = %media.id,
                        path = %media.path.display(),
                        error = %error,
                        "failed to process media"
                    );
                    report.failures.push(MediaFailure {
                        path: media.path.clone(),
                        error,
                    });
                }
            }
        }

        for stage in &self.stages {
            stage
                .after_scan_album(&ctx, &outcome)
                .await
                .map_err(|err| hooks::in_stage(stage.as_ref(), err))?;
        }

        report.found = outcome.found.len();
        report.changed = outcome.changed;

        let event = ScanEvent::AlbumScanned {
            album_id: ctx.album.id,
            found: report.found,
            changed: report.changed.len(),
            failed: report.failures.len(),
        };
        if let Err(err) = self.services.events.publish(event).await {
            debug!(target: "scan::pipeline", error = %err, "failed to publish album event");
        }

        info!(
            target: "scan::pipeline",
            album = %ctx.album.id,
            found = report.found,
            new = report.new,
            changed = report.changed.len(),
            failed = report.failures.len(),
            "album scanned"
        );
        Ok(report)
    }

    async fn classify(&self, ctx: &AlbumContext, path: &Path) -> Result<Option<MediaKind>> {
        let metadata = self.services.fs.metadata(path).await?;
        if metadata.is_dir {
            return Ok(None);
        }
        ctx.cache
            .media_kind(
                self.services.fs.as_ref(),
                self.services.classifier.as_ref(),
                path,
            )
            .await
    }

    /// Look the file up by path hash, inserting it when unknown. Returns
    /// `None` when a stage skipped it.
    async fn register_media(
        &self,
        ctx: &AlbumContext,
        path: &Path,
        kind: MediaKind,
    ) -> Result<Option<(Media, bool)>> {
        for stage in &self.stages {
            let decision = stage
                .media_found(ctx, path, kind)
                .await
                .map_err(|err| hooks::in_stage(stage.as_ref(), err))?;
            if decision == StageDecision::Skip {
                debug!(target: "scan::pipeline", stage = stage.name(), path = %path.display(), "media skipped");
                return Ok(None);
            }
        }

        let mut tx = self.services.catalog.begin().await?;
        let hash = path_hash(path);
        let (media, is_new) = match tx.find_media_by_path_hash(&hash).await? {
            Some(existing) => (existing, false),
            None => {
                let date_shot = self
                    .services
                    .fs
                    .metadata(path)
                    .await?
                    .modified
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(Utc::now);
                let media = tx
                    .insert_media(NewMedia {
                        title: file_title(path),
                        path: path.to_path_buf(),
                        path_hash: hash,
                        album_id: ctx.album.id,
                        kind,
                        date_shot,
                    })
                    .await?;
                (media, true)
            }
        };

        for stage in &self.stages {
            stage
                .after_media_found(ctx, &mut *tx, &media, is_new)
                .await
                .map_err(|err| hooks::in_stage(stage.as_ref(), err))?;
        }
        tx.commit().await?;
        Ok(Some((media, is_new)))
    }

    async fn process_media(
        &self,
        ctx: &AlbumContext,
        media: &Media,
        index: usize,
        total: usize,
    ) -> Result<Vec<MediaUrl>> {
        let local_path = self.services.fs.stage(&media.path).await?;
        let mut tx = self.services.catalog.begin().await?;
        let mut media_ctx = MediaContext {
            album: ctx,
            tx: &mut *tx,
            media: media.clone(),
            local_path,
        };

        for stage in &self.stages {
            stage
                .before_process_media(&mut media_ctx)
                .await
                .map_err(|err| hooks::in_stage(stage.as_ref(), err))?;
        }

        let mut changed = Vec::new();
        for stage in &self.stages {
            let urls = stage
                .process_media(&mut media_ctx)
                .await
                .map_err(|err| hooks::in_stage(stage.as_ref(), err))?;
            changed.extend(urls);
        }

        for stage in &self.stages {
            stage
                .after_process_media(&mut media_ctx, &changed, index, total)
                .await
                .map_err(|err| hooks::in_stage(stage.as_ref(), err))?;
        }

        tx.commit().await?;
        Ok(changed)
    }
}

fn file_title(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Queue processor that runs album jobs through a [`ScanPipeline`].
#[derive(Debug)]
pub struct AlbumScanProcessor {
    pipeline: Arc<ScanPipeline>,
}

impl AlbumScanProcessor {
    pub fn new(pipeline: Arc<ScanPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobProcessor<AlbumScanJob> for AlbumScanProcessor {
    async fn process(&self, job: AlbumScanJob) -> Result<()> {
        self.pipeline.scan_album(&job).await.map(|_| ())
    }
}
