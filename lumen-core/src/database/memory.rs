use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use lumen_model::{
    Album, AlbumId, Media, MediaId, MediaUrl, MediaUrlId, NewAlbum, NewMedia, NewMediaUrl,
    SiteSettings, User, UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::ports::{Catalog, CatalogTx};
use crate::error::{Result, ScanError};

/// Whole-catalog state held by [`InMemoryCatalog`].
#[derive(Clone, Debug, Default)]
pub struct CatalogDump {
    pub users: BTreeMap<UserId, User>,
    pub albums: BTreeMap<AlbumId, Album>,
    pub owners: BTreeSet<(UserId, AlbumId)>,
    pub media: BTreeMap<MediaId, Media>,
    pub media_urls: BTreeMap<MediaUrlId, MediaUrl>,
    pub settings: SiteSettings,
    next_id: i64,
}

impl CatalogDump {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn has_children(&self, id: AlbumId) -> bool {
        self.albums.values().any(|a| a.parent_album == Some(id))
    }

    fn remove_media_rows(&mut self, ids: &BTreeSet<MediaId>) -> u64 {
        let before = self.media.len();
        self.media.retain(|id, _| !ids.contains(id));
        self.media_urls.retain(|_, url| !ids.contains(&url.media_id));
        (before - self.media.len()) as u64
    }

    fn remove_album(&mut self, id: AlbumId) {
        let media: BTreeSet<MediaId> = self
            .media
            .values()
            .filter(|m| m.album_id == id)
            .map(|m| m.id)
            .collect();
        self.remove_media_rows(&media);
        self.owners.retain(|(_, album)| *album != id);
        self.albums.remove(&id);
    }
}

/// Catalog kept entirely in memory.
///
/// Transactions are serialized: `begin` waits for the previous transaction
/// to finish, and an uncommitted transaction restores the snapshot taken
/// when it began.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<CatalogDump>>,
}

impl fmt::Debug for InMemoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Ok(state) => f
                .debug_struct("InMemoryCatalog")
                .field("users", &state.users.len())
                .field("albums", &state.albums.len())
                .field("media", &state.media.len())
                .field("media_urls", &state.media_urls.len())
                .finish(),
            Err(_) => f
                .debug_struct("InMemoryCatalog")
                .field("state", &"<locked>")
                .finish(),
        }
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub async fn dump(&self) -> CatalogDump {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            snapshot: Some(snapshot),
        }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<CatalogDump>,
    snapshot: Option<CatalogDump>,
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

fn unique_violation(what: &str, key: &str) -> ScanError {
    ScanError::Internal(format!("duplicate {what} for key {key}"))
}

#[async_trait]
impl CatalogTx for InMemoryTx {
    async fn list_users(&mut self) -> Result<Vec<User>> {
        Ok(self.guard.users.values().cloned().collect())
    }

    async fn get_user(&mut self, id: UserId) -> Result<Option<User>> {
        Ok(self.guard.users.get(&id).cloned())
    }

    async fn upsert_user(&mut self, username: &str, root_paths: &[PathBuf]) -> Result<User> {
        let state = &mut *self.guard;
        if let Some(user) = state.users.values_mut().find(|u| u.username == username) {
            user.root_paths = root_paths.to_vec();
            return Ok(user.clone());
        }
        let user = User {
            id: UserId(state.next_id()),
            username: username.to_string(),
            root_paths: root_paths.to_vec(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_album(&mut self, id: AlbumId) -> Result<Option<Album>> {
        Ok(self.guard.albums.get(&id).cloned())
    }

    async fn find_album_by_path_hash(&mut self, path_hash: &str) -> Result<Option<Album>> {
        Ok(self
            .guard
            .albums
            .values()
            .find(|a| a.path_hash == path_hash)
            .cloned())
    }

    async fn insert_album(&mut self, album: NewAlbum) -> Result<Album> {
        let state = &mut *self.guard;
        if state.albums.values().any(|a| a.path_hash == album.path_hash) {
            return Err(unique_violation("album", &album.path_hash));
        }
        if let Some(parent) = album.parent_album
            && !state.albums.contains_key(&parent)
        {
            return Err(ScanError::NotFound(format!("parent album {parent}")));
        }
        let album = Album {
            id: AlbumId(state.next_id()),
            title: album.title,
            path: album.path,
            path_hash: album.path_hash,
            parent_album: album.parent_album,
        };
        state.albums.insert(album.id, album.clone());
        Ok(album)
    }

    async fn add_album_owner(&mut self, album: AlbumId, user: UserId) -> Result<()> {
        let state = &mut *self.guard;
        if !state.albums.contains_key(&album) {
            return Err(ScanError::NotFound(format!("album {album}")));
        }
        if !state.users.contains_key(&user) {
            return Err(ScanError::NotFound(format!("user {user}")));
        }
        state.owners.insert((user, album));
        Ok(())
    }

    async fn remove_album_owner(&mut self, album: AlbumId, user: UserId) -> Result<()> {
        self.guard.owners.remove(&(user, album));
        Ok(())
    }

    async fn albums_owned_by(&mut self, user: UserId) -> Result<Vec<Album>> {
        let state = &*self.guard;
        Ok(state
            .owners
            .iter()
            .filter(|(owner, _)| *owner == user)
            .filter_map(|(_, album)| state.albums.get(album).cloned())
            .collect())
    }

    async fn delete_ownerless_albums(&mut self, candidates: &[AlbumId]) -> Result<Vec<AlbumId>> {
        let state = &mut *self.guard;
        let depth_first = |albums: &mut Vec<Album>| {
            albums.sort_by_key(|album| (Reverse(album.path.components().count()), album.id));
            albums.dedup_by_key(|album| album.id);
        };
        let mut pending: Vec<Album> = candidates
            .iter()
            .filter_map(|id| state.albums.get(id).cloned())
            .collect();
        depth_first(&mut pending);

        let mut deleted = Vec::new();
        while let Some(index) = pending.iter().position(|album| {
            !state.has_children(album.id)
                && !state.owners.iter().any(|(_, owned)| *owned == album.id)
        }) {
            let album = pending.remove(index);
            state.remove_album(album.id);
            deleted.push(album.id);
            // An emptied parent without owners goes too.
            if let Some(parent) = album.parent_album.and_then(|id| state.albums.get(&id).cloned()) {
                pending.push(parent);
                depth_first(&mut pending);
            }
        }
        Ok(deleted)
    }

    async fn find_media_by_path_hash(&mut self, path_hash: &str) -> Result<Option<Media>> {
        Ok(self
            .guard
            .media
            .values()
            .find(|m| m.path_hash == path_hash)
            .cloned())
    }

    async fn insert_media(&mut self, media: NewMedia) -> Result<Media> {
        let state = &mut *self.guard;
        if state.media.values().any(|m| m.path_hash == media.path_hash) {
            return Err(unique_violation("media", &media.path_hash));
        }
        if !state.albums.contains_key(&media.album_id) {
            return Err(ScanError::NotFound(format!("album {}", media.album_id)));
        }
        let media = Media {
            id: MediaId(state.next_id()),
            title: media.title,
            path: media.path,
            path_hash: media.path_hash,
            album_id: media.album_id,
            kind: media.kind,
            date_shot: media.date_shot,
            sidecar_hash: None,
        };
        state.media.insert(media.id, media.clone());
        Ok(media)
    }

    async fn media_in_album(&mut self, album: AlbumId) -> Result<Vec<Media>> {
        Ok(self
            .guard
            .media
            .values()
            .filter(|m| m.album_id == album)
            .cloned()
            .collect())
    }

    async fn delete_media(&mut self, ids: &[MediaId]) -> Result<u64> {
        let ids: BTreeSet<MediaId> = ids.iter().copied().collect();
        Ok(self.guard.remove_media_rows(&ids))
    }

    async fn set_sidecar_hash(&mut self, media: MediaId, hash: Option<&str>) -> Result<()> {
        let row = self
            .guard
            .media
            .get_mut(&media)
            .ok_or_else(|| ScanError::NotFound(format!("media {media}")))?;
        row.sidecar_hash = hash.map(str::to_string);
        Ok(())
    }

    async fn media_urls(&mut self, media: MediaId) -> Result<Vec<MediaUrl>> {
        Ok(self
            .guard
            .media_urls
            .values()
            .filter(|u| u.media_id == media)
            .cloned()
            .collect())
    }

    async fn upsert_media_url(&mut self, url: NewMediaUrl) -> Result<MediaUrl> {
        let state = &mut *self.guard;
        if !state.media.contains_key(&url.media_id) {
            return Err(ScanError::NotFound(format!("media {}", url.media_id)));
        }
        let existing = state
            .media_urls
            .values()
            .find(|u| u.media_id == url.media_id && u.purpose == url.purpose)
            .map(|u| u.id);
        let id = match existing {
            Some(id) => id,
            None => MediaUrlId(state.next_id()),
        };
        let row = MediaUrl {
            id,
            media_id: url.media_id,
            purpose: url.purpose,
            media_name: url.media_name,
            width: url.width,
            height: url.height,
            content_type: url.content_type,
            file_size: url.file_size,
        };
        state.media_urls.insert(id, row.clone());
        Ok(row)
    }

    async fn delete_media_urls(&mut self, media: MediaId) -> Result<u64> {
        let state = &mut *self.guard;
        let before = state.media_urls.len();
        state.media_urls.retain(|_, u| u.media_id != media);
        Ok((before - state.media_urls.len()) as u64)
    }

    async fn site_settings(&mut self) -> Result<SiteSettings> {
        Ok(self.guard.settings)
    }

    async fn update_site_settings(&mut self, settings: SiteSettings) -> Result<()> {
        self.guard.settings = settings;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Drop restores the snapshot.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lumen_model::MediaKind;

    async fn seed_album(catalog: &InMemoryCatalog) -> (UserId, Album) {
        let mut tx = catalog.begin().await.expect("begin");
        let user = tx
            .upsert_user("alice", &[PathBuf::from("/photos")])
            .await
            .expect("user");
        let album = tx
            .insert_album(NewAlbum {
                title: "photos".into(),
                path: PathBuf::from("/photos"),
                path_hash: "h-photos".into(),
                parent_album: None,
            })
            .await
            .expect("album");
        tx.add_album_owner(album.id, user.id).await.expect("owner");
        tx.commit().await.expect("commit");
        (user.id, album)
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let catalog = InMemoryCatalog::new();
        let (_, album) = seed_album(&catalog).await;

        {
            let mut tx = catalog.begin().await.expect("begin");
            tx.insert_media(NewMedia {
                title: "a.jpg".into(),
                path: PathBuf::from("/photos/a.jpg"),
                path_hash: "h-a".into(),
                album_id: album.id,
                kind: MediaKind::Photo,
                date_shot: Utc::now(),
            })
            .await
            .expect("insert");
        }

        let dump = catalog.dump().await;
        assert!(dump.media.is_empty(), "uncommitted insert must not survive");
        assert_eq!(dump.albums.len(), 1);
    }

    #[tokio::test]
    async fn media_url_upsert_keeps_one_row_per_purpose() {
        let catalog = InMemoryCatalog::new();
        let (_, album) = seed_album(&catalog).await;
        let mut tx = catalog.begin().await.expect("begin");
        let media = tx
            .insert_media(NewMedia {
                title: "a.jpg".into(),
                path: PathBuf::from("/photos/a.jpg"),
                path_hash: "h-a".into(),
                album_id: album.id,
                kind: MediaKind::Photo,
                date_shot: Utc::now(),
            })
            .await
            .expect("insert");

        for width in [100, 200] {
            tx.upsert_media_url(NewMediaUrl {
                media_id: media.id,
                purpose: lumen_model::MediaPurpose::Thumbnail,
                media_name: "thumb.jpg".into(),
                width,
                height: 50,
                content_type: "image/jpeg".into(),
                file_size: 10,
            })
            .await
            .expect("upsert");
        }
        let urls = tx.media_urls(media.id).await.expect("urls");
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].width, 200);
    }

    #[tokio::test]
    async fn ownerless_albums_are_deleted_bottom_up_with_their_media() {
        let catalog = InMemoryCatalog::new();
        let (user, root) = seed_album(&catalog).await;

        let mut tx = catalog.begin().await.expect("begin");
        let child = tx
            .insert_album(NewAlbum {
                title: "child".into(),
                path: PathBuf::from("/photos/child"),
                path_hash: "h-child".into(),
                parent_album: Some(root.id),
            })
            .await
            .expect("child");
        tx.insert_media(NewMedia {
            title: "b.jpg".into(),
            path: PathBuf::from("/photos/child/b.jpg"),
            path_hash: "h-b".into(),
            album_id: child.id,
            kind: MediaKind::Photo,
            date_shot: Utc::now(),
        })
        .await
        .expect("media");
        tx.remove_album_owner(root.id, user).await.expect("disown");
        let deleted = tx
            .delete_ownerless_albums(&[root.id, child.id])
            .await
            .expect("delete");
        tx.commit().await.expect("commit");

        assert_eq!(deleted, vec![child.id, root.id]);
        let dump = catalog.dump().await;
        assert!(dump.albums.is_empty());
        assert!(dump.media.is_empty());
    }

    #[tokio::test]
    async fn albums_with_children_or_owners_survive() {
        let catalog = InMemoryCatalog::new();
        let (user, root) = seed_album(&catalog).await;

        let mut tx = catalog.begin().await.expect("begin");
        let child = tx
            .insert_album(NewAlbum {
                title: "child".into(),
                path: PathBuf::from("/photos/child"),
                path_hash: "h-child".into(),
                parent_album: Some(root.id),
            })
            .await
            .expect("child");
        let other = tx.upsert_user("bob", &[]).await.expect("bob");
        tx.add_album_owner(child.id, other.id).await.expect("owner");
        tx.remove_album_owner(root.id, user).await.expect("disown");
        let deleted = tx
            .delete_ownerless_albums(&[root.id, child.id])
            .await
            .expect("delete");
        tx.commit().await.expect("commit");

        assert!(deleted.is_empty());
        let dump = catalog.dump().await;
        assert_eq!(dump.albums.len(), 2);
        assert!(dump.owners.contains(&(other.id, child.id)));
    }
}
