pub mod notifications;
pub mod orders;
pub mod payments;

pub use notifications::{DispatchOutcome, NotificationDispatcher, RetryPolicy};
pub use orders::{NewOrder, NewOrderLine, OrderService};
pub use payments::{IntentIssued, PaymentService, SettlementOutcome};
