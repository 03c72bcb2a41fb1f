use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lumen_model::{Album, Media, MediaKind, MediaUrl};
use parking_lot::Mutex;

use crate::database::CatalogTx;
use crate::error::{Result, ScanError};
use crate::scan::services::ScanServices;
use crate::scan::traversal_cache::TraversalCache;

/// Whether a found file continues through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDecision {
    Continue,
    Skip,
}

/// Outcome handed to [`ScanStage::after_scan_album`].
#[derive(Debug, Clone, Default)]
pub struct AlbumScanOutcome {
    /// Artifacts created or replaced during this scan.
    pub changed: Vec<MediaUrl>,
    /// Media present on disk and registered this scan.
    pub found: Vec<Media>,
    /// Files that could not be registered; their rows must be kept.
    pub failed_paths: Vec<PathBuf>,
}

/// State of one album scan, shared by every hook invocation for it.
pub struct AlbumContext {
    pub album: Album,
    pub cache: Arc<TraversalCache>,
    pub services: ScanServices,
    scratch: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for AlbumContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlbumContext")
            .field("album", &self.album)
            .field("cache", &self.cache)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl AlbumContext {
    pub fn new(album: Album, cache: Arc<TraversalCache>, services: ScanServices) -> Self {
        Self {
            album,
            cache,
            services,
            scratch: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the cached artifacts of `media`.
    pub fn media_cache_dir(&self, media: &Media) -> PathBuf {
        self.services.media_cache_dir(self.album.id, media.id)
    }

    /// Attach per-album state for a stage. Stages are shared between
    /// concurrently scanned albums, so anything a stage carries from one
    /// hook to the next belongs here.
    pub fn put<T: Any + Send + Sync>(&self, value: T) {
        self.scratch.lock().insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = self.scratch.lock().get(&TypeId::of::<T>()).cloned()?;
        value.downcast::<T>().ok()
    }
}

/// Per-media state passed to the processing hooks. All writes go through
/// `tx`, which commits once every stage has run.
pub struct MediaContext<'a> {
    pub album: &'a AlbumContext,
    pub tx: &'a mut dyn CatalogTx,
    pub media: Media,
    /// Local copy of the media file.
    pub local_path: PathBuf,
}

impl fmt::Debug for MediaContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaContext")
            .field("album", &self.album.album.id)
            .field("media", &self.media)
            .field("local_path", &self.local_path)
            .finish_non_exhaustive()
    }
}

impl MediaContext<'_> {
    pub fn cache_dir(&self) -> PathBuf {
        self.album.media_cache_dir(&self.media)
    }
}

/// A pluggable unit of scan processing.
///
/// Every hook defaults to a no-op, so a stage only implements the points it
/// cares about. Stages run in the order the pipeline was built with.
#[async_trait]
pub trait ScanStage: Send + Sync {
    /// Label used in logs and errors.
    fn name(&self) -> &'static str;

    /// Runs before the album directory is listed. An error aborts the album.
    async fn before_scan_album(&self, _ctx: &AlbumContext) -> Result<()> {
        Ok(())
    }

    /// Decide whether a media file is registered at all.
    async fn media_found(
        &self,
        _ctx: &AlbumContext,
        _path: &Path,
        _kind: MediaKind,
    ) -> Result<StageDecision> {
        Ok(StageDecision::Continue)
    }

    /// Runs inside the registration transaction.
    async fn after_media_found(
        &self,
        _ctx: &AlbumContext,
        _tx: &mut dyn CatalogTx,
        _media: &Media,
        _is_new: bool,
    ) -> Result<()> {
        Ok(())
    }

    async fn before_process_media(&self, _ctx: &mut MediaContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Produce artifacts; returns the rows that were created or replaced.
    async fn process_media(&self, _ctx: &mut MediaContext<'_>) -> Result<Vec<MediaUrl>> {
        Ok(Vec::new())
    }

    /// `index` is zero based; `changed` is what every stage produced for
    /// this media.
    async fn after_process_media(
        &self,
        _ctx: &mut MediaContext<'_>,
        _changed: &[MediaUrl],
        _index: usize,
        _total: usize,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs after every media was processed. An error fails the album job.
    async fn after_scan_album(&self, _ctx: &AlbumContext, _outcome: &AlbumScanOutcome) -> Result<()> {
        Ok(())
    }
}

/// Attribute an error to the stage that raised it.
pub(crate) fn in_stage(stage: &dyn ScanStage, err: ScanError) -> ScanError {
    match err {
        err @ ScanError::Stage { .. } => err,
        other => ScanError::stage(stage.name(), other.to_string()),
    }
}
