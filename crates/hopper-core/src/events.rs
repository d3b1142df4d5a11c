use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Decided,
    Retrieving,
    Retrieved,
    Expanding,
    Expanded,
    AgentStep,
    Generating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub request_id: Uuid,
    pub user_id: String,
    pub stage: PipelineStage,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        request_id: Uuid,
        user_id: &str,
        stage: PipelineStage,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            request_id,
            user_id: user_id.to_string(),
            stage,
            detail,
            at: Utc::now(),
        }
    }
}

/// Fan-out of progress events to any number of subscribers.
///
/// Publishing never blocks the pipeline: a subscriber whose queue is full
/// misses the event, and subscribers that hung up are pruned.
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<ProgressEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(tx);
        rx
    }

    pub fn publish(&self, event: ProgressEvent) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(stage = ?event.stage, "Subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stage: PipelineStage) -> ProgressEvent {
        ProgressEvent::new(Uuid::new_v4(), "alice", stage, serde_json::Value::Null)
    }

    #[tokio::test]
    async fn full_subscriber_does_not_block_publisher() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe();

        bus.publish(event(PipelineStage::Received));
        bus.publish(event(PipelineStage::Decided));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stage, PipelineStage::Received);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = EventBus::new(4);
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        drop(rx);

        bus.publish(event(PipelineStage::Completed));
        assert_eq!(bus.subscriber_count(), 1);
    }
}
