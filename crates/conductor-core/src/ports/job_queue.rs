//! JobQueue port - delivers job messages to workers
//!
//! The queue owns redelivery. A worker either acks a delivery (done, or
//! deliberately dropped) or requeues it (run again later).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::envelope::JobMessage;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("queue backend failed: {0}")]
    Backend(String),
}

/// A received message. The worker owns it and must `ack` or `requeue`.
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &JobMessage;

    /// How many times this message has been handed out, starting at 1.
    fn attempt(&self) -> u32;

    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    async fn requeue(self: Box<Self>, reason: String) -> Result<(), QueueError>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, message: JobMessage) -> Result<(), QueueError>;

    /// Wait for the next message. `None` once the queue is closed and drained.
    async fn receive(&self) -> Option<Box<dyn Delivery>>;
}
