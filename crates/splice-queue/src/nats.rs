//! NATS-backed queue.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::{JoinQueue, QueueError};

/// A `JoinQueue` over a core NATS subject. The subscription is created on
/// first pull so a publish-only broker never subscribes.
pub struct NatsQueue {
    client: async_nats::Client,
    subject: String,
    subscriber: Mutex<Option<async_nats::Subscriber>>,
}

impl NatsQueue {
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self {
        NatsQueue {
            client,
            subject: subject.into(),
            subscriber: Mutex::new(None),
        }
    }

    pub async fn connect(url: &str, subject: impl Into<String>) -> Result<Self, QueueError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        Ok(Self::new(client, subject))
    }
}

#[async_trait]
impl JoinQueue for NatsQueue {
    async fn publish(&self, request_id: &str) -> Result<(), QueueError> {
        self.client
            .publish(self.subject.clone(), request_id.as_bytes().to_vec().into())
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        tracing::info!(subject = %self.subject, request_id = %request_id, "published join request");
        Ok(())
    }

    async fn pull_one(&self) -> Result<String, QueueError> {
        let mut guard = self.subscriber.lock().await;
        if guard.is_none() {
            // Queue-group subscription so multiple joiners shard the topic.
            let sub = self
                .client
                .queue_subscribe(self.subject.clone(), "spliced".to_string())
                .await
                .map_err(|e| QueueError::Pull(e.to_string()))?;
            *guard = Some(sub);
        }
        let sub = guard.as_mut().ok_or(QueueError::Closed)?;
        let msg = sub.next().await.ok_or(QueueError::Closed)?;
        String::from_utf8(msg.payload.to_vec())
            .map_err(|e| QueueError::Payload(e.to_string()))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        match self.client.connection_state() {
            async_nats::connection::State::Connected => Ok(()),
            state => Err(QueueError::Pull(format!("connection state {state:?}"))),
        }
    }
}
