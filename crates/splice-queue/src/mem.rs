//! In-memory queue used by tests and single-process development setups.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::{JoinQueue, QueueError};

/// A `JoinQueue` over an in-process channel.
pub struct MemQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        MemQueue {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl Default for MemQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JoinQueue for MemQueue {
    async fn publish(&self, request_id: &str) -> Result<(), QueueError> {
        self.tx
            .send(request_id.to_string())
            .map_err(|e| QueueError::Publish(e.to_string()))
    }

    async fn pull_one(&self) -> Result<String, QueueError> {
        self.rx.lock().await.recv().await.ok_or(QueueError::Closed)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
