use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::scan::pipeline::{AlbumContext, AlbumScanOutcome, ScanStage};
use crate::scan::reconcile::Reconciler;

/// Removes media rows (and their cache directories) for files that are no
/// longer in the album directory.
#[derive(Debug, Clone)]
pub struct CleanupStage {
    reconciler: Reconciler,
}

impl CleanupStage {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl ScanStage for CleanupStage {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    async fn after_scan_album(&self, ctx: &AlbumContext, outcome: &AlbumScanOutcome) -> Result<()> {
        let report = self
            .reconciler
            .cleanup_media(ctx.album.id, &outcome.found, &outcome.failed_paths)
            .await?;
        for err in &report.errors {
            warn!(target: "scan::reconcile", album = %ctx.album.id, error = %err, "cache cleanup incomplete");
        }
        Ok(())
    }
}
