//! Payment gateway boundary: intent creation/confirmation and signed
//! settlement events.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{PaymentMetadata, PaymentStatus};

pub mod mock;
pub mod stripe;
pub mod webhook;

pub use mock::MockGateway;
pub use stripe::StripeGateway;
pub use webhook::{GatewayEvent, SignatureVerifier};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway timed out")]
    Timeout,

    #[error("gateway request failed: {0}")]
    Transport(String),

    #[error("gateway rejected request: {0}")]
    Rejected(String),

    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

#[derive(Clone, Debug)]
pub struct IntentRequest {
    /// Amount in minor units.
    pub amount: i64,
    pub currency: String,
    pub metadata: PaymentMetadata,
    /// Sent as the gateway's idempotency key so a retried HTTP call never
    /// creates a second intent for the same attempt.
    pub idempotency_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: PaymentStatus,
    pub amount: i64,
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, request: IntentRequest) -> Result<GatewayIntent, GatewayError>;

    /// Confirms an intent, optionally with a test payment method such as `pm_card_visa`.
    async fn confirm_intent(&self, intent_id: &str, payment_method: Option<&str>) -> Result<GatewayIntent, GatewayError>;
}

/// Maps gateway intent states onto the local payment lifecycle.
pub fn status_from_gateway(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Succeeded,
        "canceled" => PaymentStatus::Canceled,
        _ => PaymentStatus::Pending,
    }
}
