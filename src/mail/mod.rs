//! Outbound mail: the order confirmation template and the transports.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::domain::Order;
use crate::store::Customer;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport timed out")]
    Timeout,

    #[error("mail transport failed: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Fixed "order paid" confirmation.
pub fn order_confirmation(order: &Order, customer: &Customer) -> Email {
    let lines: String = order.items.iter()
        .map(|l| format!("  {} x {} @ {} = {}\n", l.quantity, l.name, l.unit_price, l.line_total()))
        .collect();
    let text = format!(
        "Hi {name},\n\n\
         Thank you for your order. Your payment has been received.\n\n\
         Order: {id}\n\
         {lines}\n\
         Items:    {items}\n\
         Tax:      {tax}\n\
         Shipping: {shipping}\n\
         Total:    {total}\n\n\
         Shipping to: {address}, {city} {postal}, {country}\n",
        name = customer.name,
        id = order.id,
        items = order.items_price,
        tax = order.tax_price,
        shipping = order.shipping_price,
        total = order.total(),
        address = order.shipping_address.address,
        city = order.shipping_address.city,
        postal = order.shipping_address.postal_code,
        country = order.shipping_address.country,
    );
    Email { to: customer.email.clone(), subject: format!("Order confirmation #{}", order.id), text }
}

/// Posts mail to an HTTP relay. Without a relay URL it only logs.
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpMailer {
    pub fn new(api_url: Option<String>, api_key: Option<String>, from: impl Into<String>, timeout: Duration) -> Result<Self, MailError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(Self { client, api_url, api_key, from: from.into() })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let Some(url) = &self.api_url else {
            info!(to = %email.to, subject = %email.subject, "mail relay not configured, email logged only");
            return Ok(());
        };
        let mut request = self.client.post(url).json(&RelayRequest {
            from: &self.from, to: &email.to, subject: &email.subject, text: &email.text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() { MailError::Timeout } else { MailError::Transport(e.to_string()) }
        })?;
        if !response.status().is_success() {
            return Err(MailError::Transport(format!("relay answered {}", response.status())));
        }
        info!(to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}

/// Keeps every email it is given; can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    state: Arc<Mutex<RecordingState>>,
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<Email>,
    failures_left: usize,
}

impl RecordingMailer {
    pub fn new() -> Self { Self::default() }

    /// The next `n` sends fail.
    pub fn fail_times(&self, n: usize) { self.lock().failures_left = n; }

    pub fn sent(&self) -> Vec<Email> { self.lock().sent.clone() }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let mut state = self.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(MailError::Transport("connection refused".into()));
        }
        state.sent.push(email.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderLine, PricingPolicy, ShippingAddress};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[test]
    fn test_confirmation_lists_lines_and_total() {
        let user_id = Uuid::new_v4();
        let line = OrderLine {
            product_id: Uuid::new_v4(), name: "Desk Lamp".into(), sku: "LAMP-1".into(),
            unit_price: Decimal::new(20, 0), quantity: 2, image: None,
        };
        let address = ShippingAddress { address: "1 Main St".into(), city: "Springfield".into(), postal_code: "12345".into(), country: "US".into() };
        let order = Order::place(user_id, vec![line], address, "card", "usd", &PricingPolicy::default()).unwrap();
        let customer = Customer { id: user_id, name: "Ada".into(), email: "ada@example.com".into() };

        let email = order_confirmation(&order, &customer);
        assert_eq!(email.to, "ada@example.com");
        assert!(email.subject.contains(&order.id.to_string()));
        assert!(email.text.starts_with("Hi Ada,"));
        assert!(email.text.contains("2 x Desk Lamp"));
        assert!(email.text.contains("Total:    54"));
        assert!(email.text.contains("Springfield 12345, US"));
    }

    #[tokio::test]
    async fn test_recording_mailer_fails_then_recovers() {
        let mailer = RecordingMailer::new();
        mailer.fail_times(1);
        let email = Email { to: "a@b.c".into(), subject: "s".into(), text: "t".into() };
        assert!(mailer.send(&email).await.is_err());
        assert!(mailer.send(&email).await.is_ok());
        assert_eq!(mailer.sent(), vec![email]);
    }
}
