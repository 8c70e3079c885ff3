//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::domain::actor::Actor;
use crate::domain::value_objects::{Money, PricingPolicy};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderLine>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
    pub currency: String,
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Price and name snapshot taken when the order is placed. Later catalog
/// edits never reach it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: Uuid,
    pub name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub image: Option<String>,
}

impl OrderLine {
    pub fn line_total(&self) -> Decimal { self.unit_price * Decimal::from(self.quantity) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 200))]
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 1, max = 100))]
    pub country: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Paid, Delivered, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

/// Totals computed once at creation and never recomputed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderTotals {
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
}

impl OrderTotals {
    pub fn compute(lines: &[OrderLine], policy: &PricingPolicy) -> Self {
        let items_price: Decimal = lines.iter().map(OrderLine::line_total).sum();
        let tax_price = policy.tax_for(items_price);
        let shipping_price = policy.shipping_for(items_price);
        Self { items_price, tax_price, shipping_price, total_price: items_price + tax_price + shipping_price }
    }
}

/// Which source states `markDelivered` accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Pending or Paid may be delivered (cash-on-delivery and manual fulfilment).
    #[default]
    AllowUnpaid,
    PaidOnly,
}

impl DeliveryPolicy {
    pub fn accepted_sources(&self) -> &'static [OrderStatus] {
        match self {
            Self::AllowUnpaid => &[OrderStatus::Pending, OrderStatus::Paid],
            Self::PaidOnly => &[OrderStatus::Paid],
        }
    }
}

/// States a cancellation may start from.
pub const CANCELLABLE: &[OrderStatus] = &[OrderStatus::Pending, OrderStatus::Paid];

impl Order {
    pub fn place(
        user_id: Uuid,
        items: Vec<OrderLine>,
        shipping_address: ShippingAddress,
        payment_method: impl Into<String>,
        currency: &str,
        policy: &PricingPolicy,
    ) -> Result<Self, OrderError> {
        if items.is_empty() { return Err(OrderError::NoItems); }
        if let Some(line) = items.iter().find(|l| l.quantity == 0) {
            return Err(OrderError::ZeroQuantity(line.product_id));
        }
        let totals = OrderTotals::compute(&items, policy);
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), user_id, items, shipping_address, payment_method: payment_method.into(),
            currency: currency.to_lowercase(),
            items_price: totals.items_price, tax_price: totals.tax_price,
            shipping_price: totals.shipping_price, total_price: totals.total_price,
            status: OrderStatus::Pending, paid_at: None, delivered_at: None, cancelled_at: None,
            created_at: now, updated_at: now,
        })
    }

    pub fn total(&self) -> Money { Money::new(self.total_price, &self.currency) }

    pub fn is_visible_to(&self, actor: &Actor) -> bool { actor.is_privileged() || actor.id == self.user_id }

    /// Applies `to` if the current status is one of `from`. Returns the prior
    /// status on success; stores call this while holding their row lock.
    pub fn transition(&mut self, from: &[OrderStatus], to: OrderStatus, at: DateTime<Utc>) -> Option<OrderStatus> {
        let previous = self.status;
        if !from.contains(&previous) { return None; }
        self.status = to;
        match to {
            OrderStatus::Paid => self.paid_at = Some(at),
            OrderStatus::Delivered => self.delivered_at = Some(at),
            OrderStatus::Cancelled => self.cancelled_at = Some(at),
            OrderStatus::Pending => {}
        }
        self.updated_at = at;
        Some(previous)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError { NoItems, ZeroQuantity(Uuid), UnknownStatus(String) }
impl std::error::Error for OrderError {}
impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoItems => write!(f, "Order has no items"),
            Self::ZeroQuantity(id) => write!(f, "Quantity for product {id} must be at least 1"),
            Self::UnknownStatus(s) => write!(f, "Unknown order status '{s}'"),
        }
    }
}
