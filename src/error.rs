use thiserror::Error;
use uuid::Uuid;

use crate::domain::{OrderError, OrderStatus, PaymentStatus};
use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("Order already paid")]
    AlreadyPaid,

    #[error("Cannot {action} an order that is {status}")]
    InvalidState { status: OrderStatus, action: &'static str },

    #[error("Another payment for order {0} already succeeded")]
    PaymentAlreadySucceeded(Uuid),

    #[error("Cannot mark a {status} payment {requested}")]
    PaymentFinalized { status: PaymentStatus, requested: PaymentStatus },
}

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("Insufficient stock for product {product_id}: {available} available")]
    InsufficientStock { product_id: Uuid, available: i64 },

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for EcommerceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ProductNotFound(id) => Self::NotFound(format!("Product {id}")),
            other => Self::Storage(other),
        }
    }
}

impl From<OrderError> for EcommerceError {
    fn from(e: OrderError) -> Self { Self::Validation(e.to_string()) }
}

impl EcommerceError {
    pub fn order_not_found(id: Uuid) -> Self { Self::NotFound(format!("Order {id}")) }
    pub fn payment_not_found(id: impl std::fmt::Display) -> Self { Self::NotFound(format!("Payment {id}")) }

    pub fn invalid_state(status: OrderStatus, action: &'static str) -> Self {
        Self::Conflict(ConflictError::InvalidState { status, action })
    }

    pub fn is_already_paid(&self) -> bool { matches!(self, Self::Conflict(ConflictError::AlreadyPaid)) }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
