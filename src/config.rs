use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{DeliveryPolicy, PricingPolicy};
use crate::gateway::stripe::DEFAULT_API_BASE;
use crate::gateway::webhook::DEFAULT_TOLERANCE_SECS;
use crate::queue::nats::QueueTopology;
use crate::services::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Service configuration.
///
/// | Variable | Default |
/// |----------|---------|
/// | DATABASE_URL | required |
/// | DATABASE_MAX_CONNECTIONS | 10 |
/// | PORT | 8083 |
/// | NATS_URL | unset (queue disabled) |
/// | SETTLEMENT_SUBJECT | orders.payment_success |
/// | SETTLEMENT_STREAM | ORDER_SETTLEMENTS |
/// | SETTLEMENT_MAX_AGE_HOURS | 168 |
/// | DEAD_LETTER_STREAM | ORDER_SETTLEMENTS_DEAD |
/// | DEAD_LETTER_SUBJECT | orders.payment_success.dead |
/// | STRIPE_SECRET_KEY | required |
/// | STRIPE_WEBHOOK_SECRET | required |
/// | STRIPE_API_BASE | https://api.stripe.com |
/// | GATEWAY_TIMEOUT_MS | 10000 |
/// | MAIL_API_URL / MAIL_API_KEY | unset (mail logged only) |
/// | MAIL_FROM | orders@localhost |
/// | MAIL_TIMEOUT_MS | 10000 |
/// | CURRENCY | usd |
/// | TAX_RATE | 0.10 |
/// | SHIPPING_FLAT_FEE | 10 |
/// | FREE_SHIPPING_THRESHOLD | 100 |
/// | ALLOW_UNPAID_DELIVERY | true |
/// | NOTIFY_MAX_ATTEMPTS | 5 |
/// | NOTIFY_BACKOFF_BASE_MS | 1000 |
/// | NOTIFY_BACKOFF_MAX_MS | 60000 |
/// | WEBHOOK_TOLERANCE_SECS | 300 |
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub queue: QueueTopology,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub gateway_timeout: Duration,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,
    pub mail_timeout: Duration,
    pub currency: String,
    pub pricing: PricingPolicy,
    pub delivery: DeliveryPolicy,
    pub retry: RetryPolicy,
    pub webhook_tolerance_secs: i64,
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };
        let pricing = PricingPolicy {
            tax_rate: env.parse("TAX_RATE", Decimal::new(10, 2))?,
            shipping_flat_fee: env.parse("SHIPPING_FLAT_FEE", Decimal::new(10, 0))?,
            free_shipping_threshold: env.parse("FREE_SHIPPING_THRESHOLD", Decimal::new(100, 0))?,
        };
        if pricing.tax_rate.is_sign_negative() {
            return Err(ConfigError::Invalid { key: "TAX_RATE", value: pricing.tax_rate.to_string() });
        }
        let max_attempts: u32 = env.parse("NOTIFY_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid { key: "NOTIFY_MAX_ATTEMPTS", value: "0".into() });
        }
        // Zero would mean unlimited retention in JetStream.
        let max_age_hours: u64 = env.parse("SETTLEMENT_MAX_AGE_HOURS", 168)?;
        if max_age_hours == 0 {
            return Err(ConfigError::Invalid { key: "SETTLEMENT_MAX_AGE_HOURS", value: "0".into() });
        }

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            database_max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10)?,
            port: env.parse("PORT", 8083)?,
            nats_url: env.optional("NATS_URL"),
            queue: QueueTopology {
                stream: env.string("SETTLEMENT_STREAM", "ORDER_SETTLEMENTS"),
                subject: env.string("SETTLEMENT_SUBJECT", "orders.payment_success"),
                max_age: Duration::from_secs(max_age_hours.saturating_mul(3600)),
                dead_letter_stream: env.string("DEAD_LETTER_STREAM", "ORDER_SETTLEMENTS_DEAD"),
                dead_letter_subject: env.string("DEAD_LETTER_SUBJECT", "orders.payment_success.dead"),
            },
            stripe_secret_key: env.required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: env.required("STRIPE_WEBHOOK_SECRET")?,
            stripe_api_base: env.string("STRIPE_API_BASE", DEFAULT_API_BASE),
            gateway_timeout: Duration::from_millis(env.parse("GATEWAY_TIMEOUT_MS", 10_000)?),
            mail_api_url: env.optional("MAIL_API_URL"),
            mail_api_key: env.optional("MAIL_API_KEY"),
            mail_from: env.string("MAIL_FROM", "orders@localhost"),
            mail_timeout: Duration::from_millis(env.parse("MAIL_TIMEOUT_MS", 10_000)?),
            currency: env.string("CURRENCY", "usd").to_lowercase(),
            pricing,
            delivery: if env.parse("ALLOW_UNPAID_DELIVERY", true)? { DeliveryPolicy::AllowUnpaid } else { DeliveryPolicy::PaidOnly },
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(env.parse("NOTIFY_BACKOFF_BASE_MS", 1_000)?),
                max_delay: Duration::from_millis(env.parse("NOTIFY_BACKOFF_MAX_MS", 60_000)?),
            },
            webhook_tolerance_secs: env.parse("WEBHOOK_TOLERANCE_SECS", DEFAULT_TOLERANCE_SECS)?,
        })
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let mut map: HashMap<String, String> = [
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("STRIPE_SECRET_KEY", "sk_test_123"),
            ("STRIPE_WEBHOOK_SECRET", "whsec_123"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8083);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.nats_url, None);
        assert_eq!(config.queue.subject, "orders.payment_success");
        assert_eq!(config.queue.max_age, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.queue.dead_letter_stream, "ORDER_SETTLEMENTS_DEAD");
        assert_eq!(config.pricing, PricingPolicy::default());
        assert_eq!(config.delivery, DeliveryPolicy::AllowUnpaid);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.webhook_tolerance_secs, 300);
        assert_eq!(config.currency, "usd");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("ALLOW_UNPAID_DELIVERY", "false"),
            ("TAX_RATE", "0.2"),
            ("CURRENCY", "EUR"),
            ("NATS_URL", "nats://localhost:4222"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.delivery, DeliveryPolicy::PaidOnly);
        assert_eq!(config.pricing.tax_rate, Decimal::new(2, 1));
        assert_eq!(config.currency, "eur");
        assert_eq!(config.nats_url.as_deref(), Some("nats://localhost:4222"));
    }

    #[test]
    fn test_invalid_and_missing_values() {
        assert_eq!(
            Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err(),
            ConfigError::Invalid { key: "PORT", value: "eighty".into() }
        );
        assert!(matches!(
            Config::from_lookup(lookup(&[("NOTIFY_MAX_ATTEMPTS", "0")])),
            Err(ConfigError::Invalid { key: "NOTIFY_MAX_ATTEMPTS", .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("SETTLEMENT_MAX_AGE_HOURS", "0")])),
            Err(ConfigError::Invalid { key: "SETTLEMENT_MAX_AGE_HOURS", .. })
        ));
        assert_eq!(
            Config::from_lookup(lookup(&[("STRIPE_SECRET_KEY", " ")])).unwrap_err(),
            ConfigError::Missing("STRIPE_SECRET_KEY")
        );
    }
}
