//! Built-in scan stages and the default stage order.

mod artifacts;
mod cleanup;
mod ignore;
mod progress;
mod sidecar;

use std::sync::Arc;

pub use artifacts::{ArtifactStage, HIGH_RES_NAME, THUMBNAIL_NAME};
pub use cleanup::CleanupStage;
pub use ignore::IgnoreFileStage;
pub use progress::ProgressStage;
pub use sidecar::SidecarStage;

use crate::scan::config::ScannerConfig;
use crate::scan::pipeline::ScanStage;
use crate::scan::reconcile::Reconciler;

/// Ignore files, sidecars, artifacts, progress, cleanup; in that order.
pub fn default_stages(config: &ScannerConfig, reconciler: Reconciler) -> Vec<Arc<dyn ScanStage>> {
    vec![
        Arc::new(IgnoreFileStage::new(config.ignore_file_name.clone())),
        Arc::new(SidecarStage::new()),
        Arc::new(ArtifactStage::new(config.thumbnail_size, config.jpeg_quality)),
        Arc::new(ProgressStage::new(config.progress_throttle())),
        Arc::new(CleanupStage::new(reconciler)),
    ]
}
