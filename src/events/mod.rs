//! Fan-out of finished capture records to live subscribers.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::capture::CaptureRecord;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast channel shared by the proxy side and the WebSocket handlers.
/// Publishing never blocks and never fails; a subscriber that falls behind
/// sees a lag error on its receiver and skips ahead.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<CaptureRecord>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, record: Arc<CaptureRecord>) {
        // A send with no subscribers is not an error worth surfacing.
        let _ = self.tx.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CaptureRecord>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
