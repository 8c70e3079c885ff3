//! Product as seen by the order engine
//!
//! The catalog owns products; orders only read a snapshot of them and adjust
//! stock through the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::order::OrderLine;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub price: Decimal,
    pub image: Option<String>,
    pub stock: i64,
}

impl Product {
    pub fn snapshot_line(&self, quantity: u32) -> OrderLine {
        OrderLine {
            product_id: self.id, name: self.name.clone(), sku: self.sku.clone(),
            unit_price: self.price, quantity, image: self.image.clone(),
        }
    }
}

/// Result of reading stock ahead of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockCheck { Available, Insufficient { available: i64 } }

/// Before/after view of one atomic stock adjustment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StockMovement { pub previous: i64, pub current: i64 }

impl StockMovement {
    /// Units actually moved, which for a floored decrement can be less than requested.
    pub fn applied(&self) -> i64 { (self.previous - self.current).abs() }
}

/// Floor-at-zero subtraction used by every ledger implementation.
pub fn floored_decrement(stock: i64, quantity: i64) -> i64 { (stock - quantity).max(0) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_never_negative() {
        let mut stock = 5;
        for q in [3, 3, 10] {
            stock = floored_decrement(stock, q);
            assert!(stock >= 0);
        }
        assert_eq!(stock, 0);
    }

    #[test]
    fn test_movement_applied() {
        assert_eq!(StockMovement { previous: 2, current: 0 }.applied(), 2);
        assert_eq!(StockMovement { previous: 5, current: 8 }.applied(), 3);
    }
}
