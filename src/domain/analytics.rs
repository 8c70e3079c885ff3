//! Dashboard aggregates over orders

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::aggregates::{Order, OrderStatus};

/// Months covered by the revenue rollup, current month included.
pub const TRAILING_MONTHS: u32 = 6;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAnalytics {
    pub total: i64,
    pub pending: i64,
    pub paid: i64,
    pub delivered: i64,
    pub cancelled: i64,
    pub total_revenue: Decimal,
    pub revenue_by_month: Vec<MonthlyRevenue>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyRevenue {
    /// `YYYY-MM`
    pub month: String,
    pub revenue: Decimal,
    pub orders: i64,
}

/// Revenue counts orders that were paid and not later cancelled.
pub fn counts_as_revenue(status: OrderStatus, paid_at: Option<DateTime<Utc>>) -> bool {
    paid_at.is_some() && status != OrderStatus::Cancelled
}

pub fn month_key(at: DateTime<Utc>) -> String { format!("{:04}-{:02}", at.year(), at.month()) }

/// First day (as `(year, month)`) of the rollup window ending at `now`.
pub fn window_start(now: DateTime<Utc>) -> (i32, u32) {
    let index = now.year() * 12 + now.month0() as i32 - (TRAILING_MONTHS as i32 - 1);
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

/// Zero-filled month keys of the window, oldest first.
pub fn window_months(now: DateTime<Utc>) -> Vec<String> {
    let (year, month) = window_start(now);
    let start = year * 12 + month as i32 - 1;
    (0..TRAILING_MONTHS as i32)
        .map(|i| {
            let index = start + i;
            format!("{:04}-{:02}", index.div_euclid(12), index.rem_euclid(12) + 1)
        })
        .collect()
}

/// Lays sparse per-month sums over the full window.
pub fn fill_months(now: DateTime<Utc>, sums: &BTreeMap<String, (Decimal, i64)>) -> Vec<MonthlyRevenue> {
    window_months(now)
        .into_iter()
        .map(|month| {
            let (revenue, orders) = sums.get(&month).copied().unwrap_or((Decimal::ZERO, 0));
            MonthlyRevenue { month, revenue, orders }
        })
        .collect()
}

impl OrderAnalytics {
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>, now: DateTime<Utc>) -> Self {
        let mut out = Self::default();
        let window: Vec<String> = window_months(now);
        let mut sums: BTreeMap<String, (Decimal, i64)> = BTreeMap::new();
        for order in orders {
            out.total += 1;
            match order.status {
                OrderStatus::Pending => out.pending += 1,
                OrderStatus::Paid => out.paid += 1,
                OrderStatus::Delivered => out.delivered += 1,
                OrderStatus::Cancelled => out.cancelled += 1,
            }
            if !counts_as_revenue(order.status, order.paid_at) { continue; }
            out.total_revenue += order.total_price;
            if let Some(paid_at) = order.paid_at {
                let key = month_key(paid_at);
                if window.contains(&key) {
                    let entry = sums.entry(key).or_insert((Decimal::ZERO, 0));
                    entry.0 += order.total_price;
                    entry.1 += 1;
                }
            }
        }
        out.revenue_by_month = fill_months(now, &sums);
        out
    }
}
