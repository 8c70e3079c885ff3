//! Payment Aggregate
//!
//! One record per payment-intent attempt. An order may collect several over
//! retries but at most one ever reaches `Succeeded`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::aggregates::order::Order;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub gateway_intent_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Succeeded, Failed, Canceled }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Succeeded and canceled intents never change again; a failed one can
    /// still be retried with another payment method.
    pub fn is_final(&self) -> bool { matches!(self, Self::Succeeded | Self::Canceled) }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("Unknown payment status '{other}'")),
        }
    }
}

impl Payment {
    pub fn pending(id: Uuid, order: &Order, gateway_intent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id, order_id: order.id, user_id: order.user_id, gateway_intent_id: gateway_intent_id.into(),
            amount: order.total_price, currency: order.currency.clone(), status: PaymentStatus::Pending,
            created_at: now, updated_at: now,
        }
    }
}

/// Correlation data attached to every gateway intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentMetadata {
    pub order_id: Uuid,
    pub user_id: Uuid,
}

impl PaymentMetadata {
    pub const VERSION: u32 = 1;
    pub const ORDER_ID: &'static str = "orderId";
    pub const USER_ID: &'static str = "userId";
    pub const METADATA_VERSION: &'static str = "metadataVersion";

    pub fn for_order(order: &Order) -> Self { Self { order_id: order.id, user_id: order.user_id } }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            (Self::ORDER_ID.to_string(), self.order_id.to_string()),
            (Self::USER_ID.to_string(), self.user_id.to_string()),
            (Self::METADATA_VERSION.to_string(), Self::VERSION.to_string()),
        ]
    }

    /// Reads metadata echoed back by the gateway. Intents created before
    /// versioning carry no version key and are read as version 1.
    pub fn from_gateway(map: &HashMap<String, String>) -> Result<Self, MetadataError> {
        if let Some(v) = map.get(Self::METADATA_VERSION) {
            if v.parse::<u32>().ok() != Some(Self::VERSION) { return Err(MetadataError::UnsupportedVersion(v.clone())); }
        }
        let field = |key: &'static str| -> Result<Uuid, MetadataError> {
            let raw = map.get(key).ok_or(MetadataError::Missing(key))?;
            Uuid::parse_str(raw).map_err(|_| MetadataError::Invalid(key))
        };
        Ok(Self { order_id: field(Self::ORDER_ID)?, user_id: field(Self::USER_ID)? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata key '{0}' missing")]
    Missing(&'static str),
    #[error("metadata key '{0}' is not a valid id")]
    Invalid(&'static str),
    #[error("unsupported metadata version {0}")]
    UnsupportedVersion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip_through_gateway_map() {
        let meta = PaymentMetadata { order_id: Uuid::new_v4(), user_id: Uuid::new_v4() };
        let map: HashMap<String, String> = meta.to_pairs().into_iter().collect();
        assert_eq!(PaymentMetadata::from_gateway(&map).unwrap(), meta);
    }

    #[test]
    fn test_metadata_rejects_missing_and_future_versions() {
        let mut map = HashMap::new();
        map.insert("userId".to_string(), Uuid::new_v4().to_string());
        assert_eq!(PaymentMetadata::from_gateway(&map), Err(MetadataError::Missing("orderId")));
        map.insert("orderId".to_string(), "not-a-uuid".to_string());
        assert_eq!(PaymentMetadata::from_gateway(&map), Err(MetadataError::Invalid("orderId")));
        map.insert("orderId".to_string(), Uuid::new_v4().to_string());
        map.insert("metadataVersion".to_string(), "2".to_string());
        assert!(matches!(PaymentMetadata::from_gateway(&map), Err(MetadataError::UnsupportedVersion(_))));
    }

    #[test]
    fn test_final_states() {
        assert!(PaymentStatus::Succeeded.is_final());
        assert!(PaymentStatus::Canceled.is_final());
        assert!(!PaymentStatus::Failed.is_final());
        assert_eq!("canceled".parse::<PaymentStatus>().unwrap(), PaymentStatus::Canceled);
    }
}
