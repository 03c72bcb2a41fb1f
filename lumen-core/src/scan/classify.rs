use std::path::Path;

use async_trait::async_trait;
use lumen_model::MediaKind;

use crate::error::Result;
use crate::scan::fs::FileSystem;

/// Decides whether a file is indexable media.
#[async_trait]
pub trait MediaClassifier: Send + Sync {
    /// `Ok(None)` for files that are not media.
    async fn classify(&self, fs: &dyn FileSystem, path: &Path) -> Result<Option<MediaKind>>;
}

/// Classifies files by their (case-insensitive) extension.
#[derive(Debug, Clone)]
pub struct ExtensionClassifier {
    /// Formats browsers display directly
    pub web_image_extensions: Vec<String>,
    /// Other photo formats, including camera RAW
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

fn owned(exts: &[&str]) -> Vec<String> {
    exts.iter().map(|e| e.to_string()).collect()
}

impl Default for ExtensionClassifier {
    fn default() -> Self {
        Self {
            web_image_extensions: owned(&["jpg", "jpeg", "png", "webp", "gif"]),
            image_extensions: owned(&[
                "bmp", "tif", "tiff", "heic", "heif", "avif", "cr2", "cr3", "nef", "nrw", "arw",
                "srf", "sr2", "orf", "rw2", "raf", "dng", "pef", "srw", "x3f", "3fr", "erf",
                "mrw", "kdc", "dcr",
            ]),
            video_extensions: owned(&[
                "mp4", "mkv", "avi", "mov", "webm", "wmv", "m4v", "mpg", "mpeg", "3gp", "ogv",
                "mts", "m2ts",
            ]),
        }
    }
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

impl ExtensionClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind_of(&self, path: &Path) -> Option<MediaKind> {
        let ext = extension_lower(path)?;
        if self.web_image_extensions.contains(&ext) || self.image_extensions.contains(&ext) {
            Some(MediaKind::Photo)
        } else if self.video_extensions.contains(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Whether the file can be served to browsers as-is.
    pub fn is_web_image(&self, path: &Path) -> bool {
        extension_lower(path).is_some_and(|ext| self.web_image_extensions.contains(&ext))
    }
}

#[async_trait]
impl MediaClassifier for ExtensionClassifier {
    async fn classify(&self, fs: &dyn FileSystem, path: &Path) -> Result<Option<MediaKind>> {
        let Some(kind) = self.kind_of(path) else {
            return Ok(None);
        };
        // A directory named `holiday.jpg` is still a directory.
        let metadata = fs.metadata(path).await?;
        Ok(metadata.is_file.then_some(kind))
    }
}

/// MIME type for a media file, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match extension_lower(path).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        Some("heic" | "heif") => "image/heif",
        Some("avif") => "image/avif",
        Some("mp4" | "m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("ogv") => "video/ogg",
        Some("mpg" | "mpeg") => "video/mpeg",
        _ => "application/octet-stream",
    }
}
