//! Stripe integration via REST API (no SDK dependency)

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{status_from_gateway, GatewayError, GatewayIntent, IntentRequest, PaymentGateway};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
    status: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse { error: ErrorBody }

#[derive(Debug, Deserialize)]
struct ErrorBody { message: Option<String>, code: Option<String> }

impl From<IntentResponse> for GatewayIntent {
    fn from(r: IntentResponse) -> Self {
        Self { status: status_from_gateway(&r.status), id: r.id, client_secret: r.client_secret, amount: r.amount, currency: r.currency }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() { Self::Timeout } else { Self::Transport(e.to_string()) }
    }
}

impl StripeGateway {
    /// Every call is bounded by `timeout`.
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, api_base: api_base.into().trim_end_matches('/').to_string(), secret_key: secret_key.into() })
    }

    async fn post_form(&self, path: &str, form: &[(String, String)], idempotency_key: Option<&str>) -> Result<GatewayIntent, GatewayError> {
        let mut request = self.client
            .post(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<IntentResponse>().await.map_err(|e| GatewayError::Protocol(e.to_string()))?.into());
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .map(|e| format!("{} ({})", e.error.message.unwrap_or_default(), e.error.code.unwrap_or_default()))
            .unwrap_or(body);
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(GatewayError::Transport(format!("{status}: {message}")))
        } else {
            Err(GatewayError::Rejected(format!("{status}: {message}")))
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, request: IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let mut form = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        form.extend(request.metadata.to_pairs().into_iter().map(|(k, v)| (format!("metadata[{k}]"), v)));
        self.post_form("/v1/payment_intents", &form, Some(&request.idempotency_key)).await
    }

    async fn confirm_intent(&self, intent_id: &str, payment_method: Option<&str>) -> Result<GatewayIntent, GatewayError> {
        let form: Vec<(String, String)> = payment_method
            .map(|pm| vec![("payment_method".to_string(), pm.to_string())])
            .unwrap_or_default();
        self.post_form(&format!("/v1/payment_intents/{intent_id}/confirm"), &form, None).await
    }
}
