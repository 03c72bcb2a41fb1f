use std::time::Duration;

use async_trait::async_trait;
use lumen_model::MediaUrl;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::scan::events::ScanEvent;
use crate::scan::pipeline::{AlbumContext, MediaContext, ScanStage};

/// Publishes [`ScanEvent::MediaProgress`], at most once per throttle
/// window per album. The final media of an album is always reported.
#[derive(Debug, Clone)]
pub struct ProgressStage {
    throttle: Duration,
}

impl ProgressStage {
    pub fn new(throttle: Duration) -> Self {
        Self { throttle }
    }
}

#[derive(Debug, Default)]
struct LastPublished(Mutex<Option<Instant>>);

#[async_trait]
impl ScanStage for ProgressStage {
    fn name(&self) -> &'static str {
        "progress"
    }

    async fn before_scan_album(&self, ctx: &AlbumContext) -> Result<()> {
        ctx.put(LastPublished::default());
        Ok(())
    }

    async fn after_process_media(
        &self,
        ctx: &mut MediaContext<'_>,
        _changed: &[MediaUrl],
        index: usize,
        total: usize,
    ) -> Result<()> {
        let processed = index + 1;
        let now = Instant::now();
        let due = match ctx.album.get::<LastPublished>() {
            Some(last) => {
                let mut last = last.0.lock();
                let due = processed >= total
                    || last.is_none_or(|at| now.duration_since(at) >= self.throttle);
                if due {
                    *last = Some(now);
                }
                due
            }
            None => true,
        };
        if !due {
            return Ok(());
        }

        let event = ScanEvent::MediaProgress {
            album_id: ctx.album.album.id,
            processed,
            total,
        };
        if let Err(err) = ctx.album.services.events.publish(event).await {
            debug!(target: "scan::stage", error = %err, "failed to publish progress");
        }
        Ok(())
    }
}
