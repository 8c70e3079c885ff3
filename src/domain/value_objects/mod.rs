//! Value Objects for orders and payments

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_lowercase() } }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }

    /// Amount in the currency's minor unit (cents), as payment gateways expect it.
    pub fn minor_units(&self) -> Result<i64, MoneyError> {
        (round_cents(self.amount) * Decimal::ONE_HUNDRED).to_i64().ok_or(MoneyError::Overflow)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", round_cents(self.amount), self.currency.to_uppercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum MoneyError { Overflow }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Amount out of range") }
}

/// Rounds half away from zero to two decimal places (9.505 -> 9.51).
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Pricing rules applied once when an order is placed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    pub shipping_flat_fee: Decimal,
    /// Orders whose items price is strictly above this ship free.
    pub free_shipping_threshold: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(10, 2),
            shipping_flat_fee: Decimal::new(10, 0),
            free_shipping_threshold: Decimal::new(100, 0),
        }
    }
}

impl PricingPolicy {
    pub fn tax_for(&self, items_price: Decimal) -> Decimal { round_cents(self.tax_rate * items_price) }

    pub fn shipping_for(&self, items_price: Decimal) -> Decimal {
        if items_price > self.free_shipping_threshold { Decimal::ZERO } else { self.shipping_flat_fee }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_cents_half_up() {
        assert_eq!(round_cents(Decimal::new(9505, 3)), Decimal::new(951, 2));
        assert_eq!(round_cents(Decimal::new(95, 1)), Decimal::new(950, 2));
    }

    #[test]
    fn test_minor_units() {
        let m = Money::new(Decimal::new(11450, 2), "USD");
        assert_eq!(m.minor_units().unwrap(), 11450);
        assert_eq!(m.currency(), "usd");
    }

    #[test]
    fn test_shipping_threshold_is_strict() {
        let policy = PricingPolicy::default();
        assert_eq!(policy.shipping_for(Decimal::new(100, 0)), Decimal::new(10, 0));
        assert_eq!(policy.shipping_for(Decimal::new(10001, 2)), Decimal::ZERO);
    }
}
