//! NATS JetStream queue. Settlement messages live in an age-limited stream
//! consumed by a durable pull consumer with explicit acks; dead letters get
//! their own stream and are kept until someone removes them.

use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, AckKind};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use tracing::info;

use super::{Delivery, QueueError, SettlementConsumer, SettlementPublisher};
use crate::domain::SettlementMessage;

pub const CONSUMER_NAME: &str = "order-notifications";
pub const DEAD_LETTER_REASON_HEADER: &str = "Dead-Letter-Reason";

#[derive(Clone, Debug)]
pub struct QueueTopology {
    pub stream: String,
    pub subject: String,
    /// Acknowledged or not, settlement messages older than this are dropped.
    pub max_age: Duration,
    pub dead_letter_stream: String,
    pub dead_letter_subject: String,
}

impl QueueTopology {
    fn settlement_stream(&self) -> jetstream::stream::Config {
        jetstream::stream::Config {
            name: self.stream.clone(),
            subjects: vec![self.subject.clone()],
            max_age: self.max_age,
            ..Default::default()
        }
    }

    fn dead_letter_stream(&self) -> jetstream::stream::Config {
        jetstream::stream::Config {
            name: self.dead_letter_stream.clone(),
            subjects: vec![self.dead_letter_subject.clone()],
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct NatsQueue {
    jetstream: jetstream::Context,
    topology: QueueTopology,
}

impl NatsQueue {
    /// Ensures both streams exist before anything is published to them.
    pub async fn connect(client: async_nats::Client, topology: QueueTopology) -> Result<Self, QueueError> {
        let jetstream = jetstream::new(client);
        for config in [topology.settlement_stream(), topology.dead_letter_stream()] {
            jetstream
                .get_or_create_stream(config)
                .await
                .map_err(|e| QueueError::Connection(e.to_string()))?;
        }
        info!(
            stream = %topology.stream,
            subject = %topology.subject,
            max_age_secs = topology.max_age.as_secs(),
            dead_letter_stream = %topology.dead_letter_stream,
            "settlement streams ready"
        );
        Ok(Self { jetstream, topology })
    }

    pub async fn consumer(&self) -> Result<NatsConsumer, QueueError> {
        let stream = self.jetstream.get_stream(&self.topology.stream).await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let consumer = stream
            .get_or_create_consumer(CONSUMER_NAME, pull::Config {
                durable_name: Some(CONSUMER_NAME.to_string()),
                ack_policy: AckPolicy::Explicit,
                filter_subject: self.topology.subject.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let messages = consumer.messages().await.map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(NatsConsumer { messages: messages.map(|m| m.map_err(|e| e.to_string())).boxed() })
    }

    async fn publish_bytes(&self, subject: &str, payload: Vec<u8>, headers: Option<async_nats::HeaderMap>) -> Result<(), QueueError> {
        let ack = match headers {
            Some(headers) => self.jetstream.publish_with_headers(subject.to_string(), headers, payload.into()).await,
            None => self.jetstream.publish(subject.to_string(), payload.into()).await,
        };
        // The first await sends, the second waits for the stream to persist it.
        ack.map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SettlementPublisher for NatsQueue {
    async fn publish(&self, message: &SettlementMessage) -> Result<(), QueueError> {
        self.publish_bytes(&self.topology.subject, message.to_bytes()?, None).await
    }

    async fn dead_letter(&self, payload: &[u8], reason: &str) -> Result<(), QueueError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(DEAD_LETTER_REASON_HEADER, reason);
        self.publish_bytes(&self.topology.dead_letter_subject, payload.to_vec(), Some(headers)).await
    }
}

pub struct NatsConsumer {
    messages: BoxStream<'static, Result<jetstream::Message, String>>,
}

#[async_trait]
impl SettlementConsumer for NatsConsumer {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, QueueError>> {
        let message = self.messages.next().await?;
        Some(message.map(|inner| Box::new(NatsDelivery { inner }) as Box<dyn Delivery>).map_err(QueueError::Connection))
    }
}

struct NatsDelivery {
    inner: jetstream::Message,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn payload(&self) -> &[u8] { &self.inner.payload }

    fn attempt(&self) -> u32 {
        self.inner.info().map(|info| u32::try_from(info.delivered).unwrap_or(u32::MAX)).unwrap_or(1)
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.inner.ack().await.map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn nack(self: Box<Self>, delay: Duration) -> Result<(), QueueError> {
        self.inner.ack_with(AckKind::Nak(Some(delay))).await.map_err(|e| QueueError::Ack(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> QueueTopology {
        QueueTopology {
            stream: "ORDER_SETTLEMENTS".into(),
            subject: "orders.payment_success".into(),
            max_age: Duration::from_secs(7 * 24 * 3600),
            dead_letter_stream: "ORDER_SETTLEMENTS_DEAD".into(),
            dead_letter_subject: "orders.payment_success.dead".into(),
        }
    }

    #[test]
    fn test_settlement_stream_expires_and_dead_letters_do_not() {
        let topology = topology();
        let settlement = topology.settlement_stream();
        assert_eq!(settlement.subjects, vec!["orders.payment_success".to_string()]);
        assert_eq!(settlement.max_age, Duration::from_secs(604_800));

        let dead = topology.dead_letter_stream();
        assert_eq!(dead.name, "ORDER_SETTLEMENTS_DEAD");
        assert_eq!(dead.subjects, vec!["orders.payment_success.dead".to_string()]);
        assert_eq!(dead.max_age, Duration::ZERO);
    }
}
