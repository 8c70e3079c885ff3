//! Order engine domain: aggregates, value objects and messages
pub mod actor;
pub mod aggregates;
pub mod analytics;
pub mod events;
pub mod value_objects;

pub use actor::{Actor, Role};
pub use aggregates::*;
pub use analytics::{MonthlyRevenue, OrderAnalytics};
pub use events::SettlementMessage;
pub use value_objects::{Money, PricingPolicy};
