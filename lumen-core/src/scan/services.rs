use std::any::type_name_of_val;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lumen_model::{AlbumId, MediaId};

use crate::database::Catalog;
use crate::scan::classify::MediaClassifier;
use crate::scan::events::ScanEventPublisher;
use crate::scan::fs::FileSystem;

/// Collaborators shared by discovery, the pipeline, the stages and the
/// reconciler.
#[derive(Clone)]
pub struct ScanServices {
    pub fs: Arc<dyn FileSystem>,
    pub catalog: Arc<dyn Catalog>,
    pub classifier: Arc<dyn MediaClassifier>,
    pub events: Arc<dyn ScanEventPublisher>,
    pub cache_root: PathBuf,
}

impl fmt::Debug for ScanServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanServices")
            .field("fs", &type_name_of_val(self.fs.as_ref()))
            .field("catalog", &type_name_of_val(self.catalog.as_ref()))
            .field("classifier", &type_name_of_val(self.classifier.as_ref()))
            .field("events", &type_name_of_val(self.events.as_ref()))
            .field("cache_root", &self.cache_root)
            .finish()
    }
}

impl ScanServices {
    pub fn album_cache_dir(&self, album: AlbumId) -> PathBuf {
        album_cache_dir(&self.cache_root, album)
    }

    pub fn media_cache_dir(&self, album: AlbumId, media: MediaId) -> PathBuf {
        album_cache_dir(&self.cache_root, album).join(media.to_string())
    }
}

fn album_cache_dir(root: &Path, album: AlbumId) -> PathBuf {
    root.join(album.to_string())
}
