//! In-process queue used by tests and by local runs without NATS.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Delivery, QueueError, SettlementConsumer, SettlementPublisher};
use crate::domain::SettlementMessage;

#[derive(Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<(Vec<u8>, u32)>,
    published: Vec<SettlementMessage>,
    dead_letters: Vec<(Vec<u8>, String)>,
    acked: usize,
    nack_delays: Vec<Duration>,
    fail_publish: bool,
}

impl MemoryQueue {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every later `publish` fail until switched off.
    pub fn fail_publish(&self, fail: bool) { self.lock().fail_publish = fail; }

    /// Enqueues raw bytes as if a producer had sent them.
    pub fn push_raw(&self, payload: impl Into<Vec<u8>>) { self.lock().pending.push_back((payload.into(), 1)); }

    pub fn published(&self) -> Vec<SettlementMessage> { self.lock().published.clone() }
    pub fn dead_letters(&self) -> Vec<(Vec<u8>, String)> { self.lock().dead_letters.clone() }
    pub fn acked(&self) -> usize { self.lock().acked }
    pub fn nack_delays(&self) -> Vec<Duration> { self.lock().nack_delays.clone() }
    pub fn pending(&self) -> usize { self.lock().pending.len() }
}

#[async_trait]
impl SettlementPublisher for MemoryQueue {
    async fn publish(&self, message: &SettlementMessage) -> Result<(), QueueError> {
        let payload = message.to_bytes()?;
        let mut state = self.lock();
        if state.fail_publish {
            return Err(QueueError::Publish("queue unavailable".into()));
        }
        state.published.push(message.clone());
        state.pending.push_back((payload, 1));
        Ok(())
    }

    async fn dead_letter(&self, payload: &[u8], reason: &str) -> Result<(), QueueError> {
        self.lock().dead_letters.push((payload.to_vec(), reason.to_string()));
        Ok(())
    }
}

#[async_trait]
impl SettlementConsumer for MemoryQueue {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, QueueError>> {
        let (payload, attempt) = self.lock().pending.pop_front()?;
        Some(Ok(Box::new(MemoryDelivery { queue: self.clone(), payload, attempt })))
    }
}

struct MemoryDelivery {
    queue: MemoryQueue,
    payload: Vec<u8>,
    attempt: u32,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] { &self.payload }
    fn attempt(&self) -> u32 { self.attempt }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.queue.lock().acked += 1;
        Ok(())
    }

    async fn nack(self: Box<Self>, delay: Duration) -> Result<(), QueueError> {
        let Self { queue, payload, attempt } = *self;
        let mut state = queue.lock();
        state.nack_delays.push(delay);
        state.pending.push_back((payload, attempt + 1));
        Ok(())
    }
}
