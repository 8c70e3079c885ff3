//! Signed settlement events.
//!
//! Header format: `t=<unix seconds>,v1=<hex HMAC-SHA256 of "<t>.<raw body>">`.
//! Several `v1` entries may be present while the shared secret is rotated.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
    #[error("timestamp outside tolerance")]
    Stale,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self { secret: secret.into(), tolerance_secs }
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => timestamp = Some(t),
                Some(("v1", v)) => signatures.push(v),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() { return Err(SignatureError::Malformed); }

        let matched = signatures.iter().any(|sig| {
            let (Ok(expected), Some(mac)) = (hex::decode(sig), self.mac(timestamp, payload)) else { return false };
            // constant-time
            mac.verify_slice(&expected).is_ok()
        });
        if !matched { return Err(SignatureError::Mismatch); }

        let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
        if (now - ts).abs() > self.tolerance_secs { return Err(SignatureError::Stale); }
        Ok(())
    }

    /// Produces a header the way the gateway signs deliveries.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let mac = self.mac(&timestamp.to_string(), payload).ok_or(SignatureError::Malformed)?;
        Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self, timestamp: &str, payload: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Some(mac)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventData { pub object: IntentObject }

#[derive(Clone, Debug, Deserialize)]
pub struct IntentObject {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
pub const PAYMENT_CANCELED: &str = "payment_intent.canceled";

impl GatewayEvent {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> { serde_json::from_slice(raw) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    #[test]
    fn test_valid_signature() {
        let verifier = SignatureVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = verifier.sign(payload, 1_700_000_000).unwrap();
        assert_eq!(verifier.verify_at(payload, &header, 1_700_000_010), Ok(()));
    }

    #[test]
    fn test_wrong_secret_and_modified_payload() {
        let verifier = SignatureVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let other = SignatureVerifier::new("wrong_secret", DEFAULT_TOLERANCE_SECS);
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = other.sign(payload, 1_700_000_000).unwrap();
        assert_eq!(verifier.verify_at(payload, &header, 1_700_000_000), Err(SignatureError::Mismatch));

        let header = verifier.sign(payload, 1_700_000_000).unwrap();
        let tampered = br#"{"type":"payment_intent.succeeded","hacked":true}"#;
        assert_eq!(verifier.verify_at(tampered, &header, 1_700_000_000), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_old_timestamp_rejected() {
        let verifier = SignatureVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let payload = b"{}";
        let header = verifier.sign(payload, 1_700_000_000).unwrap();
        assert_eq!(verifier.verify_at(payload, &header, 1_700_000_600), Err(SignatureError::Stale));
    }

    #[test]
    fn test_malformed_headers() {
        let verifier = SignatureVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        assert_eq!(verifier.verify_at(b"{}", "", 0), Err(SignatureError::Malformed));
        assert_eq!(verifier.verify_at(b"{}", "t=123", 0), Err(SignatureError::Malformed));
        assert_eq!(verifier.verify_at(b"{}", "v1=abcd", 0), Err(SignatureError::Malformed));
        assert_eq!(verifier.verify_at(b"{}", "t=123,v1=zz", 123), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_rotated_secret_second_signature_matches() {
        let verifier = SignatureVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS);
        let payload = b"{}";
        let good = verifier.sign(payload, 1_700_000_000).unwrap();
        let good_sig = good.split_once("v1=").unwrap().1;
        let header = format!("t=1700000000,v1={},v1={good_sig}", "00".repeat(32));
        assert_eq!(verifier.verify_at(payload, &header, 1_700_000_000), Ok(()));
    }

    #[test]
    fn test_parse_event() {
        let raw = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","amount":5400,"currency":"usd","metadata":{"orderId":"a","userId":"b"}}}}"#;
        let event = GatewayEvent::parse(raw).unwrap();
        assert_eq!(event.kind, PAYMENT_SUCCEEDED);
        assert_eq!(event.data.object.id, "pi_1");
        assert_eq!(event.data.object.metadata.get("orderId").map(String::as_str), Some("a"));
    }
}
