use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use lumen_model::{Album, AlbumId, Media, MediaId, User};
use tracing::{debug, info, warn};

use crate::error::{Result, ScanError};
use crate::scan::services::ScanServices;

/// What a reconciliation pass removed, and the cleanup steps that failed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub deleted_media: Vec<MediaId>,
    pub deleted_albums: Vec<AlbumId>,
    /// Cache directories that could not be removed.
    pub errors: Vec<ScanError>,
}

/// Brings the catalog (and the artifact cache) back in line with the
/// filesystem after a scan.
///
/// Row deletion is transactional. Cache directory removal is best effort
/// per directory, and a directory that is already gone counts as removed.
#[derive(Clone)]
pub struct Reconciler {
    services: ScanServices,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("cache_root", &self.services.cache_root)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(services: ScanServices) -> Self {
        Self { services }
    }

    /// Delete every media row of `album` that is not in `found`, except
    /// rows whose path is in `spared_paths` (files that failed to scan this
    /// time), then drop their cache directories.
    pub async fn cleanup_media(
        &self,
        album: AlbumId,
        found: &[Media],
        spared_paths: &[PathBuf],
    ) -> Result<ReconcileReport> {
        let keep: HashSet<MediaId> = found.iter().map(|m| m.id).collect();
        let spared: HashSet<&Path> = spared_paths.iter().map(PathBuf::as_path).collect();

        let mut tx = self.services.catalog.begin().await?;
        let stale: Vec<MediaId> = tx
            .media_in_album(album)
            .await?
            .into_iter()
            .filter(|m| !keep.contains(&m.id) && !spared.contains(m.path.as_path()))
            .map(|m| m.id)
            .collect();
        if !stale.is_empty() {
            tx.delete_media(&stale).await?;
        }
        tx.commit().await?;

        let mut errors = Vec::new();
        for media in &stale {
            let dir = self.services.media_cache_dir(album, *media);
            if let Err(err) = remove_cache_dir(&dir).await {
                errors.push(err);
            }
        }
        let report = ReconcileReport {
            deleted_media: stale,
            errors,
            ..ReconcileReport::default()
        };

        if !report.deleted_media.is_empty() {
            info!(
                target: "scan::reconcile",
                album = %album,
                deleted = report.deleted_media.len(),
                "removed media no longer on disk"
            );
        }
        Ok(report)
    }

    /// Drop `user`'s ownership of every album not in `scanned` and delete
    /// albums left without owners. Albums below `spared_paths` (directories
    /// that could not be read this pass) are left alone.
    pub async fn delete_stale_albums(
        &self,
        scanned: &[Album],
        user: &User,
        spared_paths: &[PathBuf],
    ) -> Result<ReconcileReport> {
        let keep: HashSet<AlbumId> = scanned.iter().map(|a| a.id).collect();

        let mut tx = self.services.catalog.begin().await?;
        let stale: Vec<AlbumId> = tx
            .albums_owned_by(user.id)
            .await?
            .into_iter()
            .filter(|a| !keep.contains(&a.id))
            .filter(|a| !spared_paths.iter().any(|spared| a.path.starts_with(spared)))
            .map(|a| a.id)
            .collect();
        for album in &stale {
            tx.remove_album_owner(*album, user.id).await?;
        }
        let deleted = if stale.is_empty() {
            Vec::new()
        } else {
            tx.delete_ownerless_albums(&stale).await?
        };
        tx.commit().await?;

        if !stale.is_empty() {
            debug!(
                target: "scan::reconcile",
                user = %user.id,
                disowned = stale.len(),
                deleted = deleted.len(),
                "reconciled stale albums"
            );
        }

        let mut errors = Vec::new();
        for album in &deleted {
            if let Err(err) = remove_cache_dir(&self.services.album_cache_dir(*album)).await {
                errors.push(err);
            }
        }
        Ok(ReconcileReport {
            deleted_albums: deleted,
            errors,
            ..ReconcileReport::default()
        })
    }
}

async fn remove_cache_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            warn!(target: "scan::reconcile", path = %dir.display(), error = %err, "failed to remove cache directory");
            Err(ScanError::filesystem(dir, err))
        }
    }
}
