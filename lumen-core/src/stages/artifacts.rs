use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat, ImageReader};
use lumen_model::{MediaKind, MediaPurpose, MediaUrl, NewMediaUrl};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Result, ScanError};
use crate::scan::classify::content_type_for;
use crate::scan::pipeline::{MediaContext, ScanStage};

pub const THUMBNAIL_NAME: &str = "thumbnail.jpg";
pub const HIGH_RES_NAME: &str = "high_res.jpg";

/// Generates the derived artifacts of a media file.
///
/// Photos browsers can display get an `Original` row pointing at the file
/// itself, other decodable photos a full-size `HighRes` JPEG, and every
/// decodable photo a bounded `Thumbnail` JPEG. Videos get an `Original`
/// row only. Formats without a decoder (camera RAW) are left alone.
#[derive(Debug, Clone)]
pub struct ArtifactStage {
    thumbnail_size: u32,
    jpeg_quality: u8,
}

impl ArtifactStage {
    pub fn new(thumbnail_size: u32, jpeg_quality: u8) -> Self {
        Self {
            thumbnail_size: thumbnail_size.max(1),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }
}

struct RenderRequest {
    source: PathBuf,
    cache_dir: PathBuf,
    thumbnail_size: u32,
    quality: u8,
    high_res: bool,
    thumbnail: bool,
}

struct Artifact {
    name: &'static str,
    width: u32,
    height: u32,
    file_size: u64,
}

struct Rendered {
    width: u32,
    height: u32,
    high_res: Option<Artifact>,
    thumbnail: Option<Artifact>,
}

fn is_web_format(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif
    )
}

/// Whether a usable artifact for `purpose` already exists. Cached
/// artifacts also need their file.
async fn is_present(existing: &[MediaUrl], purpose: MediaPurpose, cache_dir: &Path) -> bool {
    let Some(url) = existing.iter().find(|url| url.purpose == purpose) else {
        return false;
    };
    if !purpose.is_cached() {
        return true;
    }
    tokio::fs::try_exists(cache_dir.join(&url.media_name))
        .await
        .unwrap_or(false)
}

fn write_jpeg(image: &DynamicImage, path: &Path, quality: u8) -> Result<(u32, u32, u64)> {
    let rgb = image.to_rgb8();
    let tmp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4().simple()));
    {
        let file = File::create(&tmp_path).map_err(|e| ScanError::filesystem(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8.into())?;
        writer
            .flush()
            .map_err(|e| ScanError::filesystem(&tmp_path, e))?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| ScanError::filesystem(path, e))?;
    let file_size = std::fs::metadata(path)
        .map_err(|e| ScanError::filesystem(path, e))?
        .len();
    Ok((rgb.width(), rgb.height(), file_size))
}

fn render(request: RenderRequest) -> Result<Rendered> {
    if !request.high_res && !request.thumbnail {
        let (width, height) = image::image_dimensions(&request.source)?;
        return Ok(Rendered {
            width,
            height,
            high_res: None,
            thumbnail: None,
        });
    }

    let image = ImageReader::open(&request.source)
        .map_err(|e| ScanError::filesystem(&request.source, e))?
        .with_guessed_format()
        .map_err(|e| ScanError::filesystem(&request.source, e))?
        .decode()?;
    std::fs::create_dir_all(&request.cache_dir)
        .map_err(|e| ScanError::filesystem(&request.cache_dir, e))?;

    let high_res = if request.high_res {
        let (width, height, file_size) = write_jpeg(
            &image,
            &request.cache_dir.join(HIGH_RES_NAME),
            request.quality,
        )?;
        Some(Artifact {
            name: HIGH_RES_NAME,
            width,
            height,
            file_size,
        })
    } else {
        None
    };

    let thumbnail = if request.thumbnail {
        let bound = request.thumbnail_size;
        let scaled = if image.width() > bound || image.height() > bound {
            image.thumbnail(bound, bound)
        } else {
            image.clone()
        };
        let (width, height, file_size) = write_jpeg(
            &scaled,
            &request.cache_dir.join(THUMBNAIL_NAME),
            request.quality,
        )?;
        Some(Artifact {
            name: THUMBNAIL_NAME,
            width,
            height,
            file_size,
        })
    } else {
        None
    };

    Ok(Rendered {
        width: image.width(),
        height: image.height(),
        high_res,
        thumbnail,
    })
}

fn cached_url(media: &MediaContext<'_>, purpose: MediaPurpose, artifact: Artifact) -> NewMediaUrl {
    NewMediaUrl {
        media_id: media.media.id,
        purpose,
        media_name: artifact.name.to_string(),
        width: artifact.width,
        height: artifact.height,
        content_type: "image/jpeg".to_string(),
        file_size: artifact.file_size,
    }
}

impl ArtifactStage {
    async fn original_url(
        &self,
        ctx: &MediaContext<'_>,
        width: u32,
        height: u32,
    ) -> Result<NewMediaUrl> {
        let metadata = ctx.album.services.fs.metadata(&ctx.media.path).await?;
        Ok(NewMediaUrl {
            media_id: ctx.media.id,
            purpose: MediaPurpose::Original,
            media_name: ctx.media.title.clone(),
            width,
            height,
            content_type: content_type_for(&ctx.media.path).to_string(),
            file_size: metadata.len,
        })
    }

    async fn video_artifacts(
        &self,
        ctx: &mut MediaContext<'_>,
        existing: &[MediaUrl],
    ) -> Result<Vec<MediaUrl>> {
        if is_present(existing, MediaPurpose::Original, &ctx.cache_dir()).await {
            return Ok(Vec::new());
        }
        let url = self.original_url(ctx, 0, 0).await?;
        Ok(vec![ctx.tx.upsert_media_url(url).await?])
    }

    async fn photo_artifacts(
        &self,
        ctx: &mut MediaContext<'_>,
        existing: &[MediaUrl],
    ) -> Result<Vec<MediaUrl>> {
        let format = match ImageFormat::from_path(&ctx.local_path) {
            Ok(format) if format.reading_enabled() => format,
            _ => {
                trace!(target: "scan::stage", path = %ctx.media.path.display(), "no decoder for photo format");
                return Ok(Vec::new());
            }
        };

        let cache_dir = ctx.cache_dir();
        let web = is_web_format(format);
        let full = if web {
            MediaPurpose::Original
        } else {
            MediaPurpose::HighRes
        };
        let need_full = !is_present(existing, full, &cache_dir).await;
        let need_thumbnail = !is_present(existing, MediaPurpose::Thumbnail, &cache_dir).await;
        if !need_full && !need_thumbnail {
            return Ok(Vec::new());
        }

        let request = RenderRequest {
            source: ctx.local_path.clone(),
            cache_dir,
            thumbnail_size: self.thumbnail_size,
            quality: self.jpeg_quality,
            high_res: need_full && !web,
            thumbnail: need_thumbnail,
        };
        let rendered = tokio::task::spawn_blocking(move || render(request))
            .await
            .map_err(|err| ScanError::Internal(format!("render task failed: {err}")))??;

        let mut rows = Vec::new();
        if need_full && web {
            rows.push(
                self.original_url(ctx, rendered.width, rendered.height)
                    .await?,
            );
        }
        if let Some(artifact) = rendered.high_res {
            rows.push(cached_url(ctx, MediaPurpose::HighRes, artifact));
        }
        if let Some(artifact) = rendered.thumbnail {
            rows.push(cached_url(ctx, MediaPurpose::Thumbnail, artifact));
        }

        let mut changed = Vec::with_capacity(rows.len());
        for row in rows {
            changed.push(ctx.tx.upsert_media_url(row).await?);
        }
        debug!(
            target: "scan::stage",
            media = %ctx.media.id,
            artifacts = changed.len(),
            "artifacts generated"
        );
        Ok(changed)
    }
}

#[async_trait]
impl ScanStage for ArtifactStage {
    fn name(&self) -> &'static str {
        "artifacts"
    }

    async fn process_media(&self, ctx: &mut MediaContext<'_>) -> Result<Vec<MediaUrl>> {
        let existing = ctx.tx.media_urls(ctx.media.id).await?;
        match ctx.media.kind {
            MediaKind::Photo => self.photo_artifacts(ctx, &existing).await,
            MediaKind::Video => self.video_artifacts(ctx, &existing).await,
        }
    }
}
