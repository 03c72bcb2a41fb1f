//! Core data model definitions shared across Lumen crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod album;
pub mod ids;
pub mod media;
pub mod settings;
pub mod user;

// Intentionally curated re-exports for downstream consumers.
pub use album::{Album, NewAlbum};
pub use ids::{AlbumId, MediaId, MediaUrlId, UserId};
pub use media::{Media, MediaKind, MediaPurpose, MediaUrl, NewMedia, NewMediaUrl, UnknownVariant};
pub use settings::SiteSettings;
pub use user::User;
