//! The work-item queue between broker and joiners.
//!
//! Messages are the raw RequestID bytes on a single subject. Joiners pull at
//! most one message at a time and acknowledge on receipt: once a request is
//! claimed, its lifecycle is owned by the store, not by queue redelivery.

mod mem;
mod nats;

pub use mem::MemQueue;
pub use nats::NatsQueue;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("pull failed: {0}")]
    Pull(String),
    #[error("subscription closed")]
    Closed,
    #[error("message payload is not a request id: {0}")]
    Payload(String),
}

/// Publish/subscribe seam for join work items.
#[async_trait]
pub trait JoinQueue: Send + Sync {
    /// Publishes a RequestID for some joiner to claim.
    async fn publish(&self, request_id: &str) -> Result<(), QueueError>;

    /// Waits for a single message and returns its RequestID. At most one
    /// message is in flight per caller.
    async fn pull_one(&self) -> Result<String, QueueError>;

    /// Liveness probe for health reporting.
    async fn ping(&self) -> Result<(), QueueError>;
}
