use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::ids::{AlbumId, MediaId, MediaUrlId};

/// Kind of a supported media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(MediaKind::Photo),
            "video" => Ok(MediaKind::Video),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Returned when a stored enum discriminant does not match any variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant `{}`", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// One indexed file belonging to an album.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Media {
    pub id: MediaId,
    pub title: String,
    pub path: PathBuf,
    pub path_hash: String,
    pub album_id: AlbumId,
    pub kind: MediaKind,
    pub date_shot: DateTime<Utc>,
    /// Digest of the side-car file (e.g. an `.xmp` next to a RAW) the
    /// cached artifacts were derived with.
    pub sidecar_hash: Option<String>,
}

/// Insert payload for a media file discovered for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMedia {
    pub title: String,
    pub path: PathBuf,
    pub path_hash: String,
    pub album_id: AlbumId,
    pub kind: MediaKind,
    pub date_shot: DateTime<Utc>,
}

/// What a derived artifact is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MediaPurpose {
    Thumbnail,
    HighRes,
    Original,
    VideoWeb,
    VideoThumbnail,
}

impl MediaPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaPurpose::Thumbnail => "thumbnail",
            MediaPurpose::HighRes => "high_res",
            MediaPurpose::Original => "original",
            MediaPurpose::VideoWeb => "video_web",
            MediaPurpose::VideoThumbnail => "video_thumbnail",
        }
    }

    /// Whether the artifact is a file generated into the cache directory
    /// rather than a pointer at the original.
    pub fn is_cached(&self) -> bool {
        !matches!(self, MediaPurpose::Original)
    }
}

impl fmt::Display for MediaPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaPurpose {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbnail" => Ok(MediaPurpose::Thumbnail),
            "high_res" => Ok(MediaPurpose::HighRes),
            "original" => Ok(MediaPurpose::Original),
            "video_web" => Ok(MediaPurpose::VideoWeb),
            "video_thumbnail" => Ok(MediaPurpose::VideoThumbnail),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A derived, purpose-tagged artifact of a [`Media`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaUrl {
    pub id: MediaUrlId,
    pub media_id: MediaId,
    pub purpose: MediaPurpose,
    /// File name inside the media's cache directory, or the original file
    /// name for passthrough artifacts.
    pub media_name: String,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    pub file_size: u64,
}

/// Upsert payload; `(media_id, purpose)` identifies the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMediaUrl {
    pub media_id: MediaId,
    pub purpose: MediaPurpose,
    pub media_name: String,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    pub file_size: u64,
}
