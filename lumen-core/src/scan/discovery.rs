use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lumen_model::{Album, AlbumId, NewAlbum, User};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, ScanError};
use crate::scan::events::ScanEvent;
use crate::scan::fs::{is_hidden, is_symlink_dir, list_dir};
use crate::scan::hashing::path_hash;
use crate::scan::pipeline::AlbumScanJob;
use crate::scan::reconcile::Reconciler;
use crate::scan::services::ScanServices;
use crate::scan::traversal_cache::TraversalCache;

/// Albums found for one user, plus every error met on the way. Discovery
/// never stops at the first failure.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub albums: Vec<Album>,
    pub errors: Vec<ScanError>,
}

impl DiscoveryReport {
    /// One scan job per album, all sharing the pass's traversal cache.
    pub fn jobs(&self, cache: &Arc<TraversalCache>) -> Vec<AlbumScanJob> {
        self.albums
            .iter()
            .map(|album| AlbumScanJob {
                album: album.clone(),
                cache: Arc::clone(cache),
            })
            .collect()
    }
}

/// Walks a user's library roots and materializes one album per directory
/// whose subtree holds media.
#[derive(Debug, Clone)]
pub struct AlbumDiscovery {
    services: ScanServices,
    reconciler: Reconciler,
}

impl AlbumDiscovery {
    pub fn new(services: ScanServices, reconciler: Reconciler) -> Self {
        Self {
            services,
            reconciler,
        }
    }

    pub async fn find_albums_for_user(
        &self,
        user: &User,
        cache: Arc<TraversalCache>,
    ) -> DiscoveryReport {
        let fs = self.services.fs.as_ref();
        let classifier = self.services.classifier.as_ref();

        let mut report = DiscoveryReport::default();
        let mut unreadable: Vec<PathBuf> = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        // (directory, directory with symlinks resolved, parent album)
        let mut queue: VecDeque<(PathBuf, PathBuf, Option<AlbumId>)> = VecDeque::new();
        for root in &user.root_paths {
            let real = fs.canonicalize(root).await.unwrap_or_else(|_| root.clone());
            queue.push_back((root.clone(), real, None));
        }

        while let Some((dir, real, parent)) = queue.pop_front() {
            // Symlinked directories are followed, but each real directory
            // is visited once.
            if !visited.insert(real.clone()) {
                trace!(target: "scan::discovery", path = %dir.display(), "already visited");
                continue;
            }

            let entries = match list_dir(fs, &dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(target: "scan::discovery", path = %dir.display(), error = %err, "cannot read directory");
                    unreadable.push(dir);
                    report.errors.push(err);
                    continue;
                }
            };

            if !cache.subtree_has_media(fs, classifier, &dir).await {
                trace!(target: "scan::discovery", path = %dir.display(), "no media below directory");
                continue;
            }

            let album = match self.ensure_album(user, &dir, parent).await {
                Ok(album) => album,
                Err(err) => {
                    warn!(target: "scan::discovery", path = %dir.display(), error = %err, "failed to record album");
                    unreadable.push(dir);
                    report.errors.push(err);
                    continue;
                }
            };

            for entry in entries.into_iter().filter(|e| !is_hidden(e)) {
                match fs.metadata(&entry).await {
                    Ok(metadata) if metadata.is_dir => {
                        if !cache.subtree_has_media(fs, classifier, &entry).await {
                            continue;
                        }
                        let entry_real = if is_symlink_dir(&metadata) {
                            fs.canonicalize(&entry).await.unwrap_or_else(|_| entry.clone())
                        } else {
                            match entry.file_name() {
                                Some(name) => real.join(name),
                                None => entry.clone(),
                            }
                        };
                        queue.push_back((entry, entry_real, Some(album.id)));
                    }
                    Ok(_) => {}
                    Err(err) => {
                        debug!(target: "scan::discovery", path = %entry.display(), error = %err, "cannot stat entry");
                    }
                }
            }

            report.albums.push(album);
        }

        match self
            .reconciler
            .delete_stale_albums(&report.albums, user, &unreadable)
            .await
        {
            Ok(reconciled) => report.errors.extend(reconciled.errors),
            Err(err) => {
                warn!(target: "scan::discovery", user = %user.id, error = %err, "failed to remove stale albums");
                report.errors.push(err);
            }
        }

        let event = ScanEvent::DiscoveryCompleted {
            user_id: user.id,
            albums: report.albums.len(),
            errors: report.errors.len(),
        };
        if let Err(err) = self.services.events.publish(event).await {
            debug!(target: "scan::discovery", error = %err, "failed to publish discovery event");
        }

        info!(
            target: "scan::discovery",
            user = %user.id,
            albums = report.albums.len(),
            errors = report.errors.len(),
            "discovery finished"
        );
        report
    }

    async fn ensure_album(&self, user: &User, dir: &Path, parent: Option<AlbumId>) -> Result<Album> {
        let hash = path_hash(dir);
        let mut tx = self.services.catalog.begin().await?;
        let album = match tx.find_album_by_path_hash(&hash).await? {
            Some(album) => album,
            None => {
                let album = tx
                    .insert_album(NewAlbum {
                        title: album_title(dir),
                        path: dir.to_path_buf(),
                        path_hash: hash,
                        parent_album: parent,
                    })
                    .await?;
                debug!(target: "scan::discovery", album = %album.id, path = %dir.display(), "new album");
                album
            }
        };
        tx.add_album_owner(album.id, user.id).await?;
        tx.commit().await?;
        Ok(album)
    }
}

fn album_title(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}
