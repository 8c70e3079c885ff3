//! Settlement queue: hand-off from payment settlement to notification.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::SettlementMessage;

pub mod memory;
pub mod nats;

pub use memory::MemoryQueue;
pub use nats::NatsQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue connection error: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait SettlementPublisher: Send + Sync {
    async fn publish(&self, message: &SettlementMessage) -> Result<(), QueueError>;

    /// Parks a message that will never be processed, with the reason.
    async fn dead_letter(&self, payload: &[u8], reason: &str) -> Result<(), QueueError>;
}

/// One received message. Exactly one of `ack`/`nack` must be called.
#[async_trait]
pub trait Delivery: Send {
    fn payload(&self) -> &[u8];

    /// 1 on first delivery.
    fn attempt(&self) -> u32;

    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// Asks for redelivery after `delay`.
    async fn nack(self: Box<Self>, delay: Duration) -> Result<(), QueueError>;
}

#[async_trait]
pub trait SettlementConsumer: Send {
    /// `None` once the source is exhausted or closed.
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, QueueError>>;
}
