//! Scan orchestration.
//!
//! Discovery walks each user's library roots and records one album per
//! directory that holds media. Every album becomes an [`AlbumScanJob`] on the
//! [`JobQueue`], whose workers run it through the [`ScanPipeline`]. The
//! [`Reconciler`] removes whatever discovery and the pipeline no longer see
//! on disk.

pub mod classify;
pub mod config;
pub mod control;
pub mod discovery;
pub mod events;
pub mod fs;
pub mod hashing;
pub mod ignore;
pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod services;
pub mod system;
pub mod traversal_cache;

pub use classify::{ExtensionClassifier, MediaClassifier};
pub use config::ScannerConfig;
pub use control::{LibraryRescan, LibraryScan, LibraryScanReport, ScanControl};
pub use discovery::{AlbumDiscovery, DiscoveryReport};
pub use events::{InProcScanEventBus, ScanEvent, ScanEventPublisher, ScanNotification};
pub use fs::{FileSystem, FsMetadata, InMemoryFs, RealFs, is_symlink_dir};
pub use hashing::path_hash;
pub use ignore::{IgnoreRules, IgnoreSet};
pub use pipeline::{
    AlbumContext, AlbumScanJob, AlbumScanOutcome, AlbumScanProcessor, AlbumScanReport,
    MediaContext, MediaFailure, ScanPipeline, ScanStage, StageDecision,
};
pub use queue::{Job, JobKey, JobProcessor, JobQueue, PeriodicTrigger, QueueSettings, SubmitOutcome};
pub use reconcile::{ReconcileReport, Reconciler};
pub use services::ScanServices;
pub use system::ScanSystem;
pub use traversal_cache::TraversalCache;
