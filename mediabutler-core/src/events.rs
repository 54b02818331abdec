//! Outbound event contract and the in-process bus behind it.
//!
//! Events are queued on a store scope and handed to the sink only after the
//! scope commits, so subscribers never observe state that was rolled back.
//! Delivery is at-least-once and fire-and-forget; handlers must tolerate
//! redelivery.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use mediabutler_model::{BatchJobId, FileHash};

/// Event kinds published to the push channel. Names on the wire follow the
/// `noun.verb` contract used by the HTTP adapter.
#[derive(Clone, Debug, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    #[serde(rename = "scan.started")]
    ScanStarted {
        folder: String,
        at: DateTime<Utc>,
    },
    #[serde(rename = "scan.found")]
    ScanFound { count: usize },
    #[serde(rename = "scan.completed")]
    ScanCompleted {
        total: usize,
        new: usize,
        existing: usize,
        duration_ms: i64,
    },
    #[serde(rename = "file.discovered")]
    FileDiscovered { hash: FileHash },
    #[serde(rename = "classification.completed")]
    ClassificationCompleted {
        hash: FileHash,
        category: String,
        confidence: f64,
    },
    #[serde(rename = "batch.started")]
    BatchStarted { job_id: BatchJobId, total: usize },
    #[serde(rename = "batch.progress")]
    BatchProgress {
        job_id: BatchJobId,
        completed: usize,
        failed: usize,
        current: Option<FileHash>,
    },
    #[serde(rename = "batch.completed")]
    BatchCompleted {
        job_id: BatchJobId,
        success: usize,
        failed: usize,
        duration_ms: i64,
    },
    #[serde(rename = "error.move_failed")]
    MoveFailed {
        hash: FileHash,
        reason: String,
        retry_count: u32,
    },
    #[serde(rename = "error.classification_failed")]
    ClassificationFailed { hash: FileHash, reason: String },
}

/// Outbound push channel seam. Implementations must not block the pipeline;
/// a slow or absent subscriber is not an error.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

/// Lightweight in-process event bus that fans domain events out to
/// subscribers inside the daemon (and, through the adapter, to the push
/// transport). Lagging receivers drop events rather than applying
/// backpressure to the pipeline.
pub struct InProcEventBus {
    sender: broadcast::Sender<DomainEvent>,
    capacity: usize,
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[async_trait]
impl EventSink for InProcEventBus {
    async fn publish(&self, event: DomainEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(event);
    }
}

/// Sink that drops everything; used in tests and headless tools.
#[derive(Debug, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, _event: DomainEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers_in_order() {
        let bus = InProcEventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ScanFound { count: 2 }).await;
        bus.publish(DomainEvent::ScanCompleted {
            total: 2,
            new: 1,
            existing: 1,
            duration_ms: 10,
        })
        .await;

        assert_eq!(rx.recv().await.unwrap(), DomainEvent::ScanFound { count: 2 });
        assert!(matches!(
            rx.recv().await.unwrap(),
            DomainEvent::ScanCompleted { total: 2, .. }
        ));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = InProcEventBus::new(4);
        bus.publish(DomainEvent::ScanFound { count: 0 }).await;
    }

    #[test]
    fn wire_names_follow_the_contract() {
        let event = DomainEvent::ScanFound { count: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "scan.found");
    }
}
