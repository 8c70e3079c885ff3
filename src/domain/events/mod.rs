//! Messages handed from settlement to notification
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One message per settled order, published to the settlement queue.
///
/// Wire form: `{"type":"PAYMENT_SUCCESS","orderId":"...","userId":"..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementMessage {
    #[serde(rename_all = "camelCase")]
    PaymentSuccess { order_id: Uuid, user_id: Uuid },
    /// Any type this consumer does not handle.
    #[serde(other)]
    Other,
}

impl SettlementMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> { serde_json::to_vec(self) }
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> { serde_json::from_slice(raw) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let order_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let msg = SettlementMessage::PaymentSuccess { order_id, user_id };
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "PAYMENT_SUCCESS");
        assert_eq!(json["orderId"], order_id.to_string());
        assert_eq!(json["userId"], user_id.to_string());
    }

    #[test]
    fn test_unknown_type_is_other() {
        let msg = SettlementMessage::parse(br#"{"type":"ORDER_SHIPPED","orderId":"x"}"#).unwrap();
        assert_eq!(msg, SettlementMessage::Other);
        assert!(SettlementMessage::parse(b"not json").is_err());
    }
}
