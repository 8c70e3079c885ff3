//! Storefront Orders
//!
//! Order lifecycle with stock and payment reconciliation.
//!
//! ## Features
//! - Order placement with stock validation and price computation
//! - Pay-once state machine with atomic stock debit and restock
//! - Payment intents and signed, idempotent settlement webhooks
//! - Queued order confirmation emails with retry and dead-lettering
//! - Order analytics

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod mail;
pub mod queue;
pub mod services;
pub mod store;

pub use config::{Config, ConfigError};
pub use error::{ConflictError, EcommerceError, Result};
