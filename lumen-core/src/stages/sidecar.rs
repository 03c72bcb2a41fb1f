use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lumen_model::MediaKind;
use tracing::{debug, info};

use crate::error::{Result, ScanError};
use crate::scan::fs::FileSystem;
use crate::scan::hashing::digest;
use crate::scan::pipeline::{MediaContext, ScanStage};

const SIDECAR_EXTENSION: &str = "xmp";

/// Invalidates a photo's cached artifacts when its `.xmp` sidecar changes.
///
/// Both `photo.nef.xmp` and `photo.xmp` are recognised, in that order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarStage;

impl SidecarStage {
    pub fn new() -> Self {
        Self
    }
}

fn sidecar_candidates(media: &Path) -> [PathBuf; 2] {
    let mut appended = media.as_os_str().to_owned();
    appended.push(".");
    appended.push(SIDECAR_EXTENSION);
    [PathBuf::from(appended), media.with_extension(SIDECAR_EXTENSION)]
}

async fn sidecar_hash(fs: &dyn FileSystem, media: &Path) -> Result<Option<String>> {
    for candidate in sidecar_candidates(media) {
        if fs.path_exists(&candidate).await {
            let bytes = fs.read(&candidate).await?;
            return Ok(Some(digest(&bytes)));
        }
    }
    Ok(None)
}

#[async_trait]
impl ScanStage for SidecarStage {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    async fn before_process_media(&self, ctx: &mut MediaContext<'_>) -> Result<()> {
        if ctx.media.kind != MediaKind::Photo {
            return Ok(());
        }
        let current = sidecar_hash(ctx.album.services.fs.as_ref(), &ctx.media.path).await?;
        if current == ctx.media.sidecar_hash {
            return Ok(());
        }

        let removed = ctx.tx.delete_media_urls(ctx.media.id).await?;
        let cache_dir = ctx.cache_dir();
        match tokio::fs::remove_dir_all(&cache_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(ScanError::filesystem(cache_dir, err)),
        }
        ctx.tx
            .set_sidecar_hash(ctx.media.id, current.as_deref())
            .await?;

        if ctx.media.sidecar_hash.is_some() || removed > 0 {
            info!(
                target: "scan::stage",
                media = %ctx.media.id,
                removed,
                "sidecar changed, artifacts invalidated"
            );
        } else {
            debug!(target: "scan::stage", media = %ctx.media.id, "recorded sidecar hash");
        }
        ctx.media.sidecar_hash = current;
        Ok(())
    }
}
