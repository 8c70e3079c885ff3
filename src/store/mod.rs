//! Storage capabilities used by the services.
//!
//! Every compound operation here is atomic at the storage layer: a caller
//! never observes an order that is `Paid` without its stock debited, and two
//! concurrent callers never both win the same transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Order, OrderAnalytics, OrderStatus, Payment, PaymentStatus, Product, StockCheck, StockMovement};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Stored record is invalid: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read-only view of the catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
}

/// Atomic inventory adjustments. The only writer of `Product::stock`.
#[async_trait]
pub trait StockLedger: Send + Sync {
    async fn available(&self, product_id: Uuid) -> Result<i64, StoreError>;

    /// Subtracts `quantity`, flooring at zero, in one atomic step.
    async fn decrement(&self, product_id: Uuid, quantity: i64) -> Result<StockMovement, StoreError>;

    async fn increment(&self, product_id: Uuid, quantity: i64) -> Result<StockMovement, StoreError>;

    /// Read-only availability check. Reserves nothing.
    async fn reserve_check(&self, product_id: Uuid, quantity: i64) -> Result<StockCheck, StoreError> {
        let available = self.available(product_id).await?;
        Ok(if available >= quantity { StockCheck::Available } else { StockCheck::Insufficient { available } })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PaidTransition {
    Paid(Order),
    /// Status was not `Pending`; nothing was written.
    NotPending(OrderStatus),
    /// A line could not be debited in full; nothing was written.
    Shortfall { product_id: Uuid, available: i64 },
    Missing,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CancelTransition {
    Cancelled { order: Order, restocked: bool },
    NotCancellable(OrderStatus),
    Missing,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusTransition {
    Applied(Order),
    Rejected(OrderStatus),
    Missing,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;
    async fn list_all(&self) -> Result<Vec<Order>, StoreError>;

    /// `Pending → Paid` together with a guarded debit of every line.
    async fn mark_paid(&self, id: Uuid, at: DateTime<Utc>) -> Result<PaidTransition, StoreError>;

    /// `Pending|Paid → Cancelled`, restocking every line when it was `Paid`.
    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> Result<CancelTransition, StoreError>;

    async fn mark_delivered(&self, id: Uuid, from: &[OrderStatus], at: DateTime<Utc>) -> Result<StatusTransition, StoreError>;

    async fn analytics(&self, now: DateTime<Utc>) -> Result<OrderAnalytics, StoreError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum PaymentTransition {
    Updated(Payment),
    /// Already in the requested status.
    Unchanged(Payment),
    /// Current status is final.
    Rejected(Payment),
    /// Another payment for the same order already succeeded.
    SucceededElsewhere(Payment),
    Missing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentKey<'a> { Id(Uuid), Intent(&'a str) }

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;
    async fn find_payment(&self, key: PaymentKey<'_>) -> Result<Option<Payment>, StoreError>;
    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError>;
    async fn set_status(&self, key: PaymentKey<'_>, status: PaymentStatus, at: DateTime<Utc>) -> Result<PaymentTransition, StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Customer { pub id: Uuid, pub name: String, pub email: String }

/// Contact details owned by the user service.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError>;
}

/// Whether a payment in `current` may move to `next`.
pub fn payment_transition_allowed(current: PaymentStatus, next: PaymentStatus) -> bool {
    !current.is_final() && current != next
}
