use std::path::Path;

use async_trait::async_trait;
use lumen_model::MediaKind;
use tracing::debug;

use crate::error::Result;
use crate::scan::ignore::IgnoreSet;
use crate::scan::pipeline::{AlbumContext, ScanStage, StageDecision};

/// Skips media matched by ignore files in the album directory or any of
/// its ancestors. See [`crate::scan::ignore`] for the pattern syntax.
#[derive(Debug, Clone)]
pub struct IgnoreFileStage {
    file_name: String,
}

impl IgnoreFileStage {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

#[async_trait]
impl ScanStage for IgnoreFileStage {
    fn name(&self) -> &'static str {
        "ignore_file"
    }

    async fn before_scan_album(&self, ctx: &AlbumContext) -> Result<()> {
        let ignores =
            IgnoreSet::load(ctx.services.fs.as_ref(), &ctx.album.path, &self.file_name).await?;
        if !ignores.is_empty() {
            debug!(target: "scan::stage", album = %ctx.album.id, "ignore rules loaded");
        }
        ctx.put(ignores);
        Ok(())
    }

    async fn media_found(
        &self,
        ctx: &AlbumContext,
        path: &Path,
        _kind: MediaKind,
    ) -> Result<StageDecision> {
        let ignored = ctx
            .get::<IgnoreSet>()
            .is_some_and(|ignores| ignores.is_ignored(path));
        Ok(if ignored {
            StageDecision::Skip
        } else {
            StageDecision::Continue
        })
    }
}
