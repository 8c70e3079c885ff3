//! PostgreSQL store.
//!
//! Stock adjustments are single `UPDATE ... RETURNING` statements so the row
//! lock is the only coordination. Order transitions are conditional updates
//! whose affected-row count decides the winner.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, PgConnection, PgPool};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use super::{
    payment_transition_allowed, CancelTransition, Customer, CustomerDirectory, OrderRepository, PaidTransition,
    PaymentKey, PaymentRepository, PaymentTransition, ProductCatalog, StatusTransition, StockLedger, StoreError,
};
use crate::domain::analytics::{fill_months, window_start};
use crate::domain::{
    Order, OrderAnalytics, OrderError, OrderLine, OrderStatus, Payment, PaymentStatus, Product, ShippingAddress,
    StockMovement,
};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    items: Json<Vec<OrderLine>>,
    shipping_address: Json<ShippingAddress>,
    payment_method: String,
    currency: String,
    items_price: Decimal,
    tax_price: Decimal,
    shipping_price: Decimal,
    total_price: Decimal,
    status: String,
    paid_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;
    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: r.id, user_id: r.user_id, items: r.items.0, shipping_address: r.shipping_address.0,
            payment_method: r.payment_method, currency: r.currency,
            items_price: r.items_price, tax_price: r.tax_price, shipping_price: r.shipping_price, total_price: r.total_price,
            status: parse_order_status(&r.status)?,
            paid_at: r.paid_at, delivered_at: r.delivered_at, cancelled_at: r.cancelled_at,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CancelledRow {
    previous_status: String,
    #[sqlx(flatten)]
    order: OrderRow,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    user_id: Uuid,
    gateway_intent_id: String,
    amount: Decimal,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;
    fn try_from(r: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: r.id, order_id: r.order_id, user_id: r.user_id, gateway_intent_id: r.gateway_intent_id,
            amount: r.amount, currency: r.currency, status: r.status.parse().map_err(StoreError::Corrupt)?,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

fn parse_order_status(s: &str) -> Result<OrderStatus, StoreError> {
    s.parse().map_err(|e: OrderError| StoreError::Corrupt(e.to_string()))
}

fn orders_from(rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
    rows.into_iter().map(Order::try_from).collect()
}

async fn current_status(conn: &mut PgConnection, id: Uuid) -> Result<Option<OrderStatus>, StoreError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT status FROM orders WHERE id = $1")
        .bind(id).fetch_optional(&mut *conn).await?;
    row.map(|(s,)| parse_order_status(&s)).transpose()
}

async fn stock_on(conn: &mut PgConnection, product_id: Uuid) -> Result<i64, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT stock FROM products WHERE id = $1")
        .bind(product_id).fetch_optional(&mut *conn).await?;
    row.map(|(s,)| s).ok_or(StoreError::ProductNotFound(product_id))
}

async fn decrement_on(conn: &mut PgConnection, product_id: Uuid, quantity: i64) -> Result<StockMovement, StoreError> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        "WITH prev AS (SELECT id, stock FROM products WHERE id = $1 FOR UPDATE) \
         UPDATE products p SET stock = GREATEST(prev.stock - $2, 0), updated_at = NOW() \
         FROM prev WHERE p.id = prev.id RETURNING prev.stock, p.stock",
    )
    .bind(product_id).bind(quantity).fetch_optional(&mut *conn).await?;
    let (previous, current) = row.ok_or(StoreError::ProductNotFound(product_id))?;
    Ok(StockMovement { previous, current })
}

async fn increment_on(conn: &mut PgConnection, product_id: Uuid, quantity: i64) -> Result<StockMovement, StoreError> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1 RETURNING stock - $2, stock",
    )
    .bind(product_id).bind(quantity).fetch_optional(&mut *conn).await?;
    let (previous, current) = row.ok_or(StoreError::ProductNotFound(product_id))?;
    Ok(StockMovement { previous, current })
}

/// Debits exactly `quantity` or nothing. `Ok(Some(available))` reports a shortfall.
async fn debit_exact_on(conn: &mut PgConnection, product_id: Uuid, quantity: i64) -> Result<Option<i64>, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as(
        "UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2 RETURNING stock",
    )
    .bind(product_id).bind(quantity).fetch_optional(&mut *conn).await?;
    match row {
        Some(_) => Ok(None),
        None => stock_on(conn, product_id).await.map(Some),
    }
}

#[async_trait]
impl ProductCatalog for PgStore {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(sqlx::query_as::<_, Product>("SELECT id, name, sku, price, image, stock FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?)
    }
}

#[async_trait]
impl StockLedger for PgStore {
    async fn available(&self, product_id: Uuid) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        stock_on(&mut conn, product_id).await
    }

    async fn decrement(&self, product_id: Uuid, quantity: i64) -> Result<StockMovement, StoreError> {
        let mut conn = self.pool.acquire().await?;
        decrement_on(&mut conn, product_id, quantity).await
    }

    async fn increment(&self, product_id: Uuid, quantity: i64) -> Result<StockMovement, StoreError> {
        let mut conn = self.pool.acquire().await?;
        increment_on(&mut conn, product_id, quantity).await
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn insert_order(&self, o: &Order) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO orders (id, user_id, items, shipping_address, payment_method, currency, items_price, tax_price, shipping_price, total_price, status, paid_at, delivered_at, cancelled_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)")
            .bind(o.id).bind(o.user_id).bind(Json(&o.items)).bind(Json(&o.shipping_address)).bind(&o.payment_method).bind(&o.currency)
            .bind(o.items_price).bind(o.tax_price).bind(o.shipping_price).bind(o.total_price).bind(o.status.as_str())
            .bind(o.paid_at).bind(o.delivered_at).bind(o.cancelled_at).bind(o.created_at).bind(o.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?.map(Order::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        orders_from(sqlx::query_as("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id).fetch_all(&self.pool).await?)
    }

    async fn list_all(&self) -> Result<Vec<Order>, StoreError> {
        orders_from(sqlx::query_as("SELECT * FROM orders ORDER BY created_at DESC").fetch_all(&self.pool).await?)
    }

    async fn mark_paid(&self, id: Uuid, at: DateTime<Utc>) -> Result<PaidTransition, StoreError> {
        let mut tx = self.pool.begin().await?;
        let claimed: Option<OrderRow> = sqlx::query_as(
            "UPDATE orders SET status = 'paid', paid_at = $2, updated_at = $2 WHERE id = $1 AND status = 'pending' RETURNING *",
        )
        .bind(id).bind(at).fetch_optional(&mut *tx).await?;

        let Some(row) = claimed else {
            let status = current_status(&mut tx, id).await?;
            tx.rollback().await?;
            return Ok(status.map_or(PaidTransition::Missing, PaidTransition::NotPending));
        };
        let order = Order::try_from(row)?;
        for line in &order.items {
            if let Some(available) = debit_exact_on(&mut tx, line.product_id, i64::from(line.quantity)).await? {
                tx.rollback().await?;
                debug!(order_id = %id, product_id = %line.product_id, available, "debit short, payment transition rolled back");
                return Ok(PaidTransition::Shortfall { product_id: line.product_id, available });
            }
        }
        tx.commit().await?;
        Ok(PaidTransition::Paid(order))
    }

    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> Result<CancelTransition, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<CancelledRow> = sqlx::query_as(
            "WITH prev AS (SELECT id, status FROM orders WHERE id = $1 FOR UPDATE) \
             UPDATE orders o SET status = 'cancelled', cancelled_at = $2, updated_at = $2 \
             FROM prev WHERE o.id = prev.id AND prev.status IN ('pending', 'paid') \
             RETURNING prev.status AS previous_status, o.*",
        )
        .bind(id).bind(at).fetch_optional(&mut *tx).await?;

        let Some(row) = row else {
            let status = current_status(&mut tx, id).await?;
            tx.rollback().await?;
            return Ok(status.map_or(CancelTransition::Missing, CancelTransition::NotCancellable));
        };
        let restocked = parse_order_status(&row.previous_status)? == OrderStatus::Paid;
        let order = Order::try_from(row.order)?;
        if restocked {
            for line in &order.items {
                increment_on(&mut tx, line.product_id, i64::from(line.quantity)).await?;
            }
        }
        tx.commit().await?;
        Ok(CancelTransition::Cancelled { order, restocked })
    }

    async fn mark_delivered(&self, id: Uuid, from: &[OrderStatus], at: DateTime<Utc>) -> Result<StatusTransition, StoreError> {
        let sources: Vec<&str> = from.iter().map(OrderStatus::as_str).collect();
        let mut conn = self.pool.acquire().await?;
        let row: Option<OrderRow> = sqlx::query_as(
            "UPDATE orders SET status = 'delivered', delivered_at = $2, updated_at = $2 WHERE id = $1 AND status = ANY($3) RETURNING *",
        )
        .bind(id).bind(at).bind(&sources).fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => Ok(StatusTransition::Applied(Order::try_from(row)?)),
            None => Ok(current_status(&mut conn, id).await?.map_or(StatusTransition::Missing, StatusTransition::Rejected)),
        }
    }

    async fn analytics(&self, now: DateTime<Utc>) -> Result<OrderAnalytics, StoreError> {
        let (total, pending, paid, delivered, cancelled, total_revenue): (i64, i64, i64, i64, i64, Decimal) = sqlx::query_as(
            "SELECT COUNT(*), \
                    COUNT(*) FILTER (WHERE status = 'pending'), \
                    COUNT(*) FILTER (WHERE status = 'paid'), \
                    COUNT(*) FILTER (WHERE status = 'delivered'), \
                    COUNT(*) FILTER (WHERE status = 'cancelled'), \
                    COALESCE(SUM(total_price) FILTER (WHERE paid_at IS NOT NULL AND status <> 'cancelled'), 0) \
             FROM orders",
        )
        .fetch_one(&self.pool).await?;

        let (year, month) = window_start(now);
        let since = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
            .ok_or_else(|| StoreError::Corrupt(format!("invalid window start {year}-{month}")))?;
        let monthly: Vec<(String, Decimal, i64)> = sqlx::query_as(
            "SELECT to_char(date_trunc('month', paid_at AT TIME ZONE 'UTC'), 'YYYY-MM'), SUM(total_price), COUNT(*) \
             FROM orders WHERE paid_at IS NOT NULL AND status <> 'cancelled' AND paid_at >= $1 GROUP BY 1",
        )
        .bind(since).fetch_all(&self.pool).await?;
        let sums: BTreeMap<String, (Decimal, i64)> = monthly.into_iter().map(|(m, r, n)| (m, (r, n))).collect();

        Ok(OrderAnalytics { total, pending, paid, delivered, cancelled, total_revenue, revenue_by_month: fill_months(now, &sums) })
    }
}

impl PgStore {
    async fn payment_for_update(conn: &mut PgConnection, key: PaymentKey<'_>) -> Result<Option<PaymentRow>, StoreError> {
        let row = match key {
            PaymentKey::Id(id) => sqlx::query_as("SELECT * FROM payments WHERE id = $1 FOR UPDATE").bind(id).fetch_optional(&mut *conn).await?,
            PaymentKey::Intent(intent) => sqlx::query_as("SELECT * FROM payments WHERE gateway_intent_id = $1 FOR UPDATE").bind(intent).fetch_optional(&mut *conn).await?,
        };
        Ok(row)
    }

    async fn succeeded_rival(&self, order_id: Uuid, except: Uuid) -> Result<Option<Payment>, StoreError> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE order_id = $1 AND id <> $2 AND status = 'succeeded' LIMIT 1")
            .bind(order_id).bind(except).fetch_optional(&self.pool).await?.map(Payment::try_from).transpose()
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn insert_payment(&self, p: &Payment) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO payments (id, order_id, user_id, gateway_intent_id, amount, currency, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
            .bind(p.id).bind(p.order_id).bind(p.user_id).bind(&p.gateway_intent_id).bind(p.amount).bind(&p.currency)
            .bind(p.status.as_str()).bind(p.created_at).bind(p.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn find_payment(&self, key: PaymentKey<'_>) -> Result<Option<Payment>, StoreError> {
        let row: Option<PaymentRow> = match key {
            PaymentKey::Id(id) => sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(id).fetch_optional(&self.pool).await?,
            PaymentKey::Intent(intent) => sqlx::query_as("SELECT * FROM payments WHERE gateway_intent_id = $1").bind(intent).fetch_optional(&self.pool).await?,
        };
        row.map(Payment::try_from).transpose()
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at")
            .bind(order_id).fetch_all(&self.pool).await?
            .into_iter().map(Payment::try_from).collect()
    }

    async fn set_status(&self, key: PaymentKey<'_>, status: PaymentStatus, at: DateTime<Utc>) -> Result<PaymentTransition, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = Self::payment_for_update(&mut tx, key).await? else {
            tx.rollback().await?;
            return Ok(PaymentTransition::Missing);
        };
        let current = Payment::try_from(row)?;
        if current.status == status { return Ok(PaymentTransition::Unchanged(current)); }
        if !payment_transition_allowed(current.status, status) { return Ok(PaymentTransition::Rejected(current)); }

        let updated = sqlx::query_as::<_, PaymentRow>("UPDATE payments SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *")
            .bind(current.id).bind(status.as_str()).bind(at).fetch_one(&mut *tx).await;
        match updated {
            Ok(row) => {
                tx.commit().await?;
                Ok(PaymentTransition::Updated(Payment::try_from(row)?))
            }
            // payments_one_succeeded_per_order
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                tx.rollback().await?;
                match self.succeeded_rival(current.order_id, current.id).await? {
                    Some(rival) => Ok(PaymentTransition::SucceededElsewhere(rival)),
                    None => Err(StoreError::Corrupt(format!("unique violation on payment {}", current.id))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CustomerDirectory for PgStore {
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        let row: Option<(Uuid, String, String)> = sqlx::query_as("SELECT id, name, email FROM users WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, name, email)| Customer { id, name, email }))
    }
}
