use std::path::{Path, PathBuf};

use crate::ids::AlbumId;

/// A directory indexed as a library unit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Album {
    pub id: AlbumId,
    pub title: String,
    pub path: PathBuf,
    /// Hex digest of `path`; unique across all albums.
    pub path_hash: String,
    pub parent_album: Option<AlbumId>,
}

impl Album {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.parent_album.is_none()
    }
}

/// Insert payload for an album discovered for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlbum {
    pub title: String,
    pub path: PathBuf,
    pub path_hash: String,
    pub parent_album: Option<AlbumId>,
}
