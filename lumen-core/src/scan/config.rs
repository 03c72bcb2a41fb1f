use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Knobs for the scan pipeline and its built-in stages.
///
/// Worker count and rescan interval are not here: they live in the
/// persisted site settings and can change at runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Root of the artifact cache. Layout is `<root>/<album_id>/<media_id>/`.
    pub cache_root: PathBuf,
    /// Longest edge, in pixels, of generated thumbnails.
    pub thumbnail_size: u32,
    /// JPEG quality (1-100) for generated thumbnails and high-res copies.
    pub jpeg_quality: u8,
    /// Minimum time between two progress events of the same album, in
    /// milliseconds. The last event of an album is always sent.
    pub progress_throttle_ms: u64,
    /// Name of the per-directory ignore file.
    pub ignore_file_name: String,
    /// Capacity of the in-process event channel.
    pub event_capacity: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("media_cache"),
            thumbnail_size: 1024,
            jpeg_quality: 80,
            progress_throttle_ms: 500,
            ignore_file_name: ".lumenignore".to_string(),
            event_capacity: 1024,
        }
    }
}

impl ScannerConfig {
    pub fn progress_throttle(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.progress_throttle_ms)
    }
}
