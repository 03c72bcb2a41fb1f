use std::path::PathBuf;

use async_trait::async_trait;
use lumen_model::{
    Album, AlbumId, Media, MediaId, MediaUrl, NewAlbum, NewMedia, NewMediaUrl, SiteSettings, User,
    UserId,
};

use crate::error::Result;

/// Transaction provider for the catalog.
///
/// Every unit of scan work (one directory during discovery, one file during
/// an album scan) runs inside its own transaction obtained here.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>>;
}

/// An open catalog transaction.
///
/// Dropping a transaction without calling [`CatalogTx::commit`] rolls it
/// back. Stages hold one behind `&mut` inside [`MediaContext`], which is
/// borrowed across awaits, hence `Sync`.
///
/// [`MediaContext`]: crate::scan::pipeline::MediaContext
#[async_trait]
pub trait CatalogTx: Send + Sync {
    // Users
    async fn list_users(&mut self) -> Result<Vec<User>>;
    async fn get_user(&mut self, id: UserId) -> Result<Option<User>>;
    /// Create the user or replace the root paths of an existing one.
    async fn upsert_user(&mut self, username: &str, root_paths: &[PathBuf]) -> Result<User>;

    // Albums
    async fn get_album(&mut self, id: AlbumId) -> Result<Option<Album>>;
    async fn find_album_by_path_hash(&mut self, path_hash: &str) -> Result<Option<Album>>;
    async fn insert_album(&mut self, album: NewAlbum) -> Result<Album>;
    /// Idempotent.
    async fn add_album_owner(&mut self, album: AlbumId, user: UserId) -> Result<()>;
    async fn remove_album_owner(&mut self, album: AlbumId, user: UserId) -> Result<()>;
    async fn albums_owned_by(&mut self, user: UserId) -> Result<Vec<Album>>;
    /// Delete the candidates that have neither owners nor child albums,
    /// deepest first and repeated until nothing changes, so a chain of
    /// candidates goes bottom-up. The parent of a deleted album becomes a
    /// candidate too. Returns every id removed. Media and artifacts of a
    /// deleted album go with it; child albums never do.
    async fn delete_ownerless_albums(&mut self, candidates: &[AlbumId]) -> Result<Vec<AlbumId>>;

    // Media
    async fn find_media_by_path_hash(&mut self, path_hash: &str) -> Result<Option<Media>>;
    async fn insert_media(&mut self, media: NewMedia) -> Result<Media>;
    async fn media_in_album(&mut self, album: AlbumId) -> Result<Vec<Media>>;
    async fn delete_media(&mut self, ids: &[MediaId]) -> Result<u64>;
    async fn set_sidecar_hash(&mut self, media: MediaId, hash: Option<&str>) -> Result<()>;

    // Artifacts
    async fn media_urls(&mut self, media: MediaId) -> Result<Vec<MediaUrl>>;
    async fn upsert_media_url(&mut self, url: NewMediaUrl) -> Result<MediaUrl>;
    async fn delete_media_urls(&mut self, media: MediaId) -> Result<u64>;

    // Settings
    async fn site_settings(&mut self) -> Result<SiteSettings>;
    async fn update_site_settings(&mut self, settings: SiteSettings) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}
