use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lumen_model::{AlbumId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::scan::queue::JobKey;

/// Notifications emitted while scanning. Observers must not rely on
/// receiving every event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanEvent {
    DiscoveryCompleted {
        user_id: UserId,
        albums: usize,
        errors: usize,
    },
    AlbumScanned {
        album_id: AlbumId,
        found: usize,
        changed: usize,
        failed: usize,
    },
    MediaProgress {
        album_id: AlbumId,
        processed: usize,
        total: usize,
    },
    JobFailed {
        key: JobKey,
        description: String,
        error: String,
    },
}

/// Envelope delivered to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanNotification {
    pub id: Uuid,
    pub emitted_at: DateTime<Utc>,
    pub event: ScanEvent,
}

impl ScanNotification {
    pub fn new(event: ScanEvent) -> Self {
        Self {
            id: Uuid::now_v7(),
            emitted_at: Utc::now(),
            event,
        }
    }
}

/// Fire-and-forget sink for [`ScanEvent`]s.
#[async_trait]
pub trait ScanEventPublisher: Send + Sync {
    async fn publish(&self, event: ScanEvent) -> Result<()>;
}

/// Lightweight in-process event bus. Sending never blocks; receivers that
/// fall behind lose the oldest events.
#[derive(Debug, Clone)]
pub struct InProcScanEventBus {
    sender: broadcast::Sender<ScanNotification>,
}

impl InProcScanEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanNotification> {
        self.sender.subscribe()
    }
}

impl Default for InProcScanEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ScanEventPublisher for InProcScanEventBus {
    async fn publish(&self, event: ScanEvent) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(ScanNotification::new(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_serialize_with_tagged_events() {
        let notification = ScanNotification::new(ScanEvent::DiscoveryCompleted {
            user_id: UserId(7),
            albums: 3,
            errors: 0,
        });
        let json = serde_json::to_value(&notification).expect("serialize");
        assert_eq!(
            json["event"],
            serde_json::json!({
                "DiscoveryCompleted": { "user_id": 7, "albums": 3, "errors": 0 }
            })
        );

        let back: ScanNotification = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.id, notification.id);
        assert_eq!(back.event, notification.event);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_succeeds() {
        let bus = InProcScanEventBus::new(4);
        bus.publish(ScanEvent::MediaProgress {
            album_id: AlbumId(1),
            processed: 1,
            total: 2,
        })
        .await
        .expect("publish");
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_oldest_events() {
        let bus = InProcScanEventBus::new(2);
        let mut rx = bus.subscribe();
        for processed in 1..=3 {
            bus.publish(ScanEvent::MediaProgress {
                album_id: AlbumId(1),
                processed,
                total: 3,
            })
            .await
            .expect("publish");
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        let next = rx.recv().await.expect("event");
        assert_eq!(
            next.event,
            ScanEvent::MediaProgress {
                album_id: AlbumId(1),
                processed: 2,
                total: 3
            }
        );
    }
}
