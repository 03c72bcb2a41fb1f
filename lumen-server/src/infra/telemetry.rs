use std::sync::Arc;

use lumen_core::scan::{InProcScanEventBus, ScanEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Quiet defaults with per-album summaries. Override via RUST_LOG.
                "info,scan::queue=info,scan::discovery=info,scan::pipeline=info,scan::stage=warn,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Mirror scan events into the log until `shutdown` fires.
pub fn spawn_event_logger(
    bus: &Arc<InProcScanEventBus>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let notification = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => received,
            };
            match notification {
                Ok(notification) => match notification.event {
                    ScanEvent::DiscoveryCompleted {
                        user_id,
                        albums,
                        errors,
                    } => {
                        info!(target: "scan::events", user = %user_id, albums, errors, "discovery completed")
                    }
                    ScanEvent::AlbumScanned {
                        album_id,
                        found,
                        changed,
                        failed,
                    } => {
                        debug!(target: "scan::events", album = %album_id, found, changed, failed, "album scanned")
                    }
                    ScanEvent::MediaProgress {
                        album_id,
                        processed,
                        total,
                    } => {
                        debug!(target: "scan::events", album = %album_id, processed, total, "progress")
                    }
                    ScanEvent::JobFailed {
                        key,
                        description,
                        error,
                    } => {
                        warn!(target: "scan::events", key, job = %description, error = %error, "scan job failed")
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!(target: "scan::events", skipped, "event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
