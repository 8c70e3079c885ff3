//! Notification dispatcher: consumes settlement messages and sends the
//! order confirmation email.
//!
//! Failures are retried with exponential backoff up to
//! [`RetryPolicy::max_attempts`]; after that the message is parked on the
//! dead-letter subject and acknowledged so it stops redelivering.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::SettlementMessage;
use crate::mail::{order_confirmation, MailError, Mailer};
use crate::queue::{Delivery, QueueError, SettlementConsumer, SettlementPublisher};
use crate::store::{CustomerDirectory, OrderRepository, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(60) }
    }
}

impl RetryPolicy {
    /// `min(base * 2^(attempt-1), max)` for the attempt that just failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent).min(self.max_delay)
    }

    /// [`Self::delay_for`] plus up to 10% random jitter, still capped.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let spread = delay.as_millis() as u64 / 10;
        let jitter = if spread == 0 { 0 } else { rand::thread_rng().gen_range(0..=spread) };
        (delay + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("order {0} not found")]
    OrderMissing(Uuid),

    #[error("customer {0} not found")]
    CustomerMissing(Uuid),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Message type this dispatcher does not handle; acknowledged.
    Skipped,
    Retried { attempt: u32, delay: Duration },
    DeadLettered { reason: String },
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    orders: Arc<dyn OrderRepository>,
    customers: Arc<dyn CustomerDirectory>,
    mailer: Arc<dyn Mailer>,
    dead_letters: Arc<dyn SettlementPublisher>,
    retry: RetryPolicy,
}

impl NotificationDispatcher {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        customers: Arc<dyn CustomerDirectory>,
        mailer: Arc<dyn Mailer>,
        dead_letters: Arc<dyn SettlementPublisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self { orders, customers, mailer, dead_letters, retry }
    }

    /// Consumes until the queue closes or `shutdown` flips.
    pub async fn run<C: SettlementConsumer>(&self, mut consumer: C, mut shutdown: watch::Receiver<bool>) {
        info!("notification dispatcher started");
        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => break,
                next = consumer.next() => next,
            };
            match next {
                Some(Ok(delivery)) => {
                    if let Err(e) = self.dispatch(delivery).await {
                        error!(error = %e, "settlement message could not be acknowledged");
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "settlement queue receive failed");
                    tokio::time::sleep(self.retry.base_delay).await;
                }
                None => break,
            }
        }
        info!("notification dispatcher stopped");
    }

    #[instrument(skip_all, fields(attempt = delivery.attempt()))]
    pub async fn dispatch(&self, delivery: Box<dyn Delivery>) -> Result<DispatchOutcome, QueueError> {
        let attempt = delivery.attempt();
        let message = match SettlementMessage::parse(delivery.payload()) {
            Ok(message) => message,
            Err(e) => return self.park(delivery, format!("malformed settlement message: {e}")).await,
        };
        let SettlementMessage::PaymentSuccess { order_id, .. } = message else {
            debug!("message type not handled");
            delivery.ack().await?;
            return Ok(DispatchOutcome::Skipped);
        };

        match self.notify(order_id).await {
            Ok(()) => {
                delivery.ack().await?;
                info!(%order_id, "order confirmation sent");
                Ok(DispatchOutcome::Sent)
            }
            Err(e) if attempt >= self.retry.max_attempts => {
                self.park(delivery, format!("order {order_id}: {e} after {attempt} attempts")).await
            }
            Err(e) => {
                let delay = self.retry.jittered(attempt);
                warn!(%order_id, error = %e, retry_in_ms = delay.as_millis() as u64, "order confirmation failed");
                delivery.nack(delay).await?;
                Ok(DispatchOutcome::Retried { attempt, delay })
            }
        }
    }

    async fn notify(&self, order_id: Uuid) -> Result<(), NotifyError> {
        let order = self.orders.find_order(order_id).await?.ok_or(NotifyError::OrderMissing(order_id))?;
        let customer = self.customers.find_customer(order.user_id).await?
            .ok_or(NotifyError::CustomerMissing(order.user_id))?;
        self.mailer.send(&order_confirmation(&order, &customer)).await?;
        Ok(())
    }

    async fn park(&self, delivery: Box<dyn Delivery>, reason: String) -> Result<DispatchOutcome, QueueError> {
        error!(%reason, "settlement message dead-lettered");
        let payload = delivery.payload().to_vec();
        self.dead_letters.dead_letter(&payload, &reason).await?;
        delivery.ack().await?;
        Ok(DispatchOutcome::DeadLettered { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy { max_attempts: 5, base_delay: Duration::from_millis(1000), max_delay: Duration::from_millis(60_000) }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(7), Duration::from_secs(60));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent_and_cap() {
        let p = policy();
        for _ in 0..100 {
            let d = p.jittered(3);
            assert!(d >= Duration::from_secs(4) && d <= Duration::from_millis(4400));
            assert_eq!(p.jittered(10), Duration::from_secs(60));
        }
    }
}
