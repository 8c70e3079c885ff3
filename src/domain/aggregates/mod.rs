//! Aggregates module
pub mod order;
pub mod payment;
pub mod product;

pub use order::{Order, OrderError, OrderLine, OrderStatus, OrderTotals, ShippingAddress, DeliveryPolicy, CANCELLABLE};
pub use payment::{Payment, PaymentMetadata, PaymentStatus, MetadataError};
pub use product::{Product, StockCheck, StockMovement};
