/// Persisted, runtime-mutable scanner settings.
///
/// Values are kept signed because they round-trip through the database and
/// operator input; the scheduler rejects negatives when they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiteSettings {
    pub concurrent_workers: i32,
    /// Seconds between periodic full-library scans; `0` disables them.
    pub periodic_scan_interval: i64,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            concurrent_workers: 3,
            periodic_scan_interval: 0,
        }
    }
}
