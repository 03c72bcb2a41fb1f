use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lumen_model::{
    Album, AlbumId, Media, MediaId, MediaKind, MediaPurpose, MediaUrl, MediaUrlId, NewAlbum,
    NewMedia, NewMediaUrl, SiteSettings, User, UserId,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::info;

use super::ports::{Catalog, CatalogTx};
use crate::error::{Result, ScanError};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL-backed catalog.
#[derive(Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl fmt::Debug for PostgresCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresCatalog")
            .field("pool_size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresCatalog {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        info!(target: "catalog", "database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

impl fmt::Debug for PostgresTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTx").finish_non_exhaustive()
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    username: String,
    root_paths: Vec<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            username: row.username,
            root_paths: row.root_paths.into_iter().map(PathBuf::from).collect(),
        }
    }
}

#[derive(FromRow)]
struct AlbumRow {
    id: i64,
    title: String,
    path: String,
    path_hash: String,
    parent_album_id: Option<i64>,
}

impl From<AlbumRow> for Album {
    fn from(row: AlbumRow) -> Self {
        Album {
            id: AlbumId(row.id),
            title: row.title,
            path: PathBuf::from(row.path),
            path_hash: row.path_hash,
            parent_album: row.parent_album_id.map(AlbumId),
        }
    }
}

#[derive(FromRow)]
struct MediaRow {
    id: i64,
    title: String,
    path: String,
    path_hash: String,
    album_id: i64,
    kind: String,
    date_shot: DateTime<Utc>,
    sidecar_hash: Option<String>,
}

impl TryFrom<MediaRow> for Media {
    type Error = ScanError;

    fn try_from(row: MediaRow) -> Result<Self> {
        let kind = MediaKind::from_str(&row.kind)
            .map_err(|e| ScanError::Internal(format!("media {}: {e}", row.id)))?;
        Ok(Media {
            id: MediaId(row.id),
            title: row.title,
            path: PathBuf::from(row.path),
            path_hash: row.path_hash,
            album_id: AlbumId(row.album_id),
            kind,
            date_shot: row.date_shot,
            sidecar_hash: row.sidecar_hash,
        })
    }
}

#[derive(FromRow)]
struct MediaUrlRow {
    id: i64,
    media_id: i64,
    purpose: String,
    media_name: String,
    width: i32,
    height: i32,
    content_type: String,
    file_size: i64,
}

impl TryFrom<MediaUrlRow> for MediaUrl {
    type Error = ScanError;

    fn try_from(row: MediaUrlRow) -> Result<Self> {
        let purpose = MediaPurpose::from_str(&row.purpose)
            .map_err(|e| ScanError::Internal(format!("media_url {}: {e}", row.id)))?;
        Ok(MediaUrl {
            id: MediaUrlId(row.id),
            media_id: MediaId(row.media_id),
            purpose,
            media_name: row.media_name,
            width: row.width.max(0) as u32,
            height: row.height.max(0) as u32,
            content_type: row.content_type,
            file_size: row.file_size.max(0) as u64,
        })
    }
}

fn path_text(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

const ALBUM_COLUMNS: &str = "id, title, path, path_hash, parent_album_id";
const MEDIA_COLUMNS: &str = "id, title, path, path_hash, album_id, kind, date_shot, sidecar_hash";
const MEDIA_URL_COLUMNS: &str =
    "id, media_id, purpose, media_name, width, height, content_type, file_size";

#[async_trait]
impl CatalogTx for PostgresTx {
    async fn list_users(&mut self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, root_paths FROM users ORDER BY id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn get_user(&mut self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, root_paths FROM users WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(User::from))
    }

    async fn upsert_user(&mut self, username: &str, root_paths: &[PathBuf]) -> Result<User> {
        let roots: Vec<String> = root_paths.iter().map(|p| path_text(p)).collect();
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (username, root_paths)
            VALUES ($1, $2)
            ON CONFLICT (username) DO UPDATE SET root_paths = EXCLUDED.root_paths
            RETURNING id, username, root_paths
            "#,
        )
        .bind(username)
        .bind(&roots)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn get_album(&mut self, id: AlbumId) -> Result<Option<Album>> {
        let row = sqlx::query_as::<_, AlbumRow>(&format!(
            "SELECT {ALBUM_COLUMNS} FROM albums WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Album::from))
    }

    async fn find_album_by_path_hash(&mut self, path_hash: &str) -> Result<Option<Album>> {
        let row = sqlx::query_as::<_, AlbumRow>(&format!(
            "SELECT {ALBUM_COLUMNS} FROM albums WHERE path_hash = $1"
        ))
        .bind(path_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Album::from))
    }

    async fn insert_album(&mut self, album: NewAlbum) -> Result<Album> {
        let row = sqlx::query_as::<_, AlbumRow>(&format!(
            r#"
            INSERT INTO albums (title, path, path_hash, parent_album_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {ALBUM_COLUMNS}
            "#
        ))
        .bind(&album.title)
        .bind(path_text(&album.path))
        .bind(&album.path_hash)
        .bind(album.parent_album.map(|id| id.0))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn add_album_owner(&mut self, album: AlbumId, user: UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_albums (user_id, album_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user.0)
        .bind(album.0)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn remove_album_owner(&mut self, album: AlbumId, user: UserId) -> Result<()> {
        sqlx::query("DELETE FROM user_albums WHERE user_id = $1 AND album_id = $2")
            .bind(user.0)
            .bind(album.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn albums_owned_by(&mut self, user: UserId) -> Result<Vec<Album>> {
        let rows = sqlx::query_as::<_, AlbumRow>(
            r#"
            SELECT a.id, a.title, a.path, a.path_hash, a.parent_album_id
            FROM albums a
            JOIN user_albums ua ON ua.album_id = a.id
            WHERE ua.user_id = $1
            ORDER BY a.id
            "#,
        )
        .bind(user.0)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Album::from).collect())
    }

    async fn delete_ownerless_albums(&mut self, candidates: &[AlbumId]) -> Result<Vec<AlbumId>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<i64> = candidates.iter().map(|id| id.0).collect();
        let mut deleted = Vec::new();
        // Each round removes the current leaves; their parents become
        // candidates for the next one.
        loop {
            let round: Vec<(i64, Option<i64>)> = sqlx::query_as(
                r#"
                DELETE FROM albums a
                WHERE a.id = ANY($1)
                  AND NOT EXISTS (SELECT 1 FROM user_albums ua WHERE ua.album_id = a.id)
                  AND NOT EXISTS (SELECT 1 FROM albums c WHERE c.parent_album_id = a.id)
                RETURNING a.id, a.parent_album_id
                "#,
            )
            .bind(&ids)
            .fetch_all(&mut *self.tx)
            .await?;
            if round.is_empty() {
                break;
            }
            for (id, parent) in round {
                deleted.push(AlbumId(id));
                if let Some(parent) = parent
                    && !ids.contains(&parent)
                {
                    ids.push(parent);
                }
            }
        }
        Ok(deleted)
    }

    async fn find_media_by_path_hash(&mut self, path_hash: &str) -> Result<Option<Media>> {
        let row = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE path_hash = $1"
        ))
        .bind(path_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Media::try_from).transpose()
    }

    async fn insert_media(&mut self, media: NewMedia) -> Result<Media> {
        let row = sqlx::query_as::<_, MediaRow>(&format!(
            r#"
            INSERT INTO media (title, path, path_hash, album_id, kind, date_shot)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {MEDIA_COLUMNS}
            "#
        ))
        .bind(&media.title)
        .bind(path_text(&media.path))
        .bind(&media.path_hash)
        .bind(media.album_id.0)
        .bind(media.kind.as_str())
        .bind(media.date_shot)
        .fetch_one(&mut *self.tx)
        .await?;
        row.try_into()
    }

    async fn media_in_album(&mut self, album: AlbumId) -> Result<Vec<Media>> {
        let rows = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE album_id = $1 ORDER BY id"
        ))
        .bind(album.0)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(Media::try_from).collect()
    }

    async fn delete_media(&mut self, ids: &[MediaId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query("DELETE FROM media WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_sidecar_hash(&mut self, media: MediaId, hash: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE media SET sidecar_hash = $2 WHERE id = $1")
            .bind(media.0)
            .bind(hash)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn media_urls(&mut self, media: MediaId) -> Result<Vec<MediaUrl>> {
        let rows = sqlx::query_as::<_, MediaUrlRow>(&format!(
            "SELECT {MEDIA_URL_COLUMNS} FROM media_urls WHERE media_id = $1 ORDER BY id"
        ))
        .bind(media.0)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(MediaUrl::try_from).collect()
    }

    async fn upsert_media_url(&mut self, url: NewMediaUrl) -> Result<MediaUrl> {
        let row = sqlx::query_as::<_, MediaUrlRow>(&format!(
            r#"
            INSERT INTO media_urls (media_id, purpose, media_name, width, height, content_type, file_size)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (media_id, purpose) DO UPDATE SET
                media_name = EXCLUDED.media_name,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                content_type = EXCLUDED.content_type,
                file_size = EXCLUDED.file_size
            RETURNING {MEDIA_URL_COLUMNS}
            "#
        ))
        .bind(url.media_id.0)
        .bind(url.purpose.as_str())
        .bind(&url.media_name)
        .bind(i32::try_from(url.width).unwrap_or(i32::MAX))
        .bind(i32::try_from(url.height).unwrap_or(i32::MAX))
        .bind(&url.content_type)
        .bind(i64::try_from(url.file_size).unwrap_or(i64::MAX))
        .fetch_one(&mut *self.tx)
        .await?;
        row.try_into()
    }

    async fn delete_media_urls(&mut self, media: MediaId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM media_urls WHERE media_id = $1")
            .bind(media.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn site_settings(&mut self) -> Result<SiteSettings> {
        let row: Option<(i32, i64)> = sqlx::query_as(
            "SELECT concurrent_workers, periodic_scan_interval_secs FROM site_settings WHERE id = 1",
        )
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row
            .map(|(workers, interval)| SiteSettings {
                concurrent_workers: workers,
                periodic_scan_interval: interval,
            })
            .unwrap_or_default())
    }

    async fn update_site_settings(&mut self, settings: SiteSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO site_settings (id, concurrent_workers, periodic_scan_interval_secs)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE SET
                concurrent_workers = EXCLUDED.concurrent_workers,
                periodic_scan_interval_secs = EXCLUDED.periodic_scan_interval_secs
            "#,
        )
        .bind(settings.concurrent_workers)
        .bind(settings.periodic_scan_interval)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
