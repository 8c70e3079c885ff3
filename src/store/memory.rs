//! In-process store. One lock guards all state so every compound operation
//! has the same all-or-nothing behaviour as the PostgreSQL transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    payment_transition_allowed, CancelTransition, Customer, CustomerDirectory, OrderRepository, PaidTransition,
    PaymentKey, PaymentRepository, PaymentTransition, ProductCatalog, StatusTransition, StockLedger, StoreError,
};
use crate::domain::aggregates::product::floored_decrement;
use crate::domain::{Order, OrderAnalytics, OrderStatus, Payment, PaymentStatus, Product, StockMovement, CANCELLABLE};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    customers: HashMap<Uuid, Customer>,
}

impl Inner {
    fn product_mut(&mut self, id: Uuid) -> Result<&mut Product, StoreError> {
        self.products.get_mut(&id).ok_or(StoreError::ProductNotFound(id))
    }

    fn payment_id(&self, key: PaymentKey<'_>) -> Option<Uuid> {
        match key {
            PaymentKey::Id(id) => self.payments.contains_key(&id).then_some(id),
            PaymentKey::Intent(intent) => self.payments.values().find(|p| p.gateway_intent_id == intent).map(|p| p.id),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put_product(&self, product: Product) { self.lock().products.insert(product.id, product); }

    pub fn put_customer(&self, customer: Customer) { self.lock().customers.insert(customer.id, customer); }

    /// Removes an order outright; only used to simulate records that vanished.
    pub fn forget_order(&self, id: Uuid) { self.lock().orders.remove(&id); }

    pub fn stock_of(&self, id: Uuid) -> Option<i64> { self.lock().products.get(&id).map(|p| p.stock) }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.lock().products.get(&id).cloned())
    }
}

#[async_trait]
impl StockLedger for MemoryStore {
    async fn available(&self, product_id: Uuid) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        Ok(inner.product_mut(product_id)?.stock)
    }

    async fn decrement(&self, product_id: Uuid, quantity: i64) -> Result<StockMovement, StoreError> {
        let mut inner = self.lock();
        let product = inner.product_mut(product_id)?;
        let previous = product.stock;
        product.stock = floored_decrement(previous, quantity);
        Ok(StockMovement { previous, current: product.stock })
    }

    async fn increment(&self, product_id: Uuid, quantity: i64) -> Result<StockMovement, StoreError> {
        let mut inner = self.lock();
        let product = inner.product_mut(product_id)?;
        let previous = product.stock;
        product.stock = previous.saturating_add(quantity);
        Ok(StockMovement { previous, current: product.stock })
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.lock().orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.lock().orders.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self.lock().orders.values().filter(|o| o.user_id == user_id).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_all(&self) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self.lock().orders.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn mark_paid(&self, id: Uuid, at: DateTime<Utc>) -> Result<PaidTransition, StoreError> {
        let mut inner = self.lock();
        let Some(order) = inner.orders.get(&id).cloned() else { return Ok(PaidTransition::Missing) };
        if order.status != OrderStatus::Pending { return Ok(PaidTransition::NotPending(order.status)); }

        let mut debits: Vec<(Uuid, i64)> = Vec::with_capacity(order.items.len());
        for line in &order.items {
            let wanted = i64::from(line.quantity);
            let already = debits.iter().filter(|(p, _)| *p == line.product_id).map(|(_, q)| q).sum::<i64>();
            let available = inner.product_mut(line.product_id)?.stock - already;
            if available < wanted {
                return Ok(PaidTransition::Shortfall { product_id: line.product_id, available: available.max(0) });
            }
            debits.push((line.product_id, wanted));
        }
        for (product_id, quantity) in debits {
            let product = inner.product_mut(product_id)?;
            product.stock = floored_decrement(product.stock, quantity);
        }
        let order = inner.orders.get_mut(&id).ok_or(StoreError::Corrupt(format!("order {id} vanished")))?;
        order.transition(&[OrderStatus::Pending], OrderStatus::Paid, at);
        Ok(PaidTransition::Paid(order.clone()))
    }

    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> Result<CancelTransition, StoreError> {
        let mut inner = self.lock();
        let Some(order) = inner.orders.get(&id).cloned() else { return Ok(CancelTransition::Missing) };
        if !CANCELLABLE.contains(&order.status) { return Ok(CancelTransition::NotCancellable(order.status)); }
        let restock = order.status == OrderStatus::Paid;
        if restock {
            if let Some(line) = order.items.iter().find(|l| !inner.products.contains_key(&l.product_id)) {
                return Err(StoreError::ProductNotFound(line.product_id));
            }
            for line in &order.items {
                let product = inner.product_mut(line.product_id)?;
                product.stock = product.stock.saturating_add(i64::from(line.quantity));
            }
        }
        let order = inner.orders.get_mut(&id).ok_or(StoreError::Corrupt(format!("order {id} vanished")))?;
        order.transition(CANCELLABLE, OrderStatus::Cancelled, at);
        Ok(CancelTransition::Cancelled { order: order.clone(), restocked: restock })
    }

    async fn mark_delivered(&self, id: Uuid, from: &[OrderStatus], at: DateTime<Utc>) -> Result<StatusTransition, StoreError> {
        let mut inner = self.lock();
        let Some(order) = inner.orders.get_mut(&id) else { return Ok(StatusTransition::Missing) };
        match order.transition(from, OrderStatus::Delivered, at) {
            Some(_) => Ok(StatusTransition::Applied(order.clone())),
            None => Ok(StatusTransition::Rejected(order.status)),
        }
    }

    async fn analytics(&self, now: DateTime<Utc>) -> Result<OrderAnalytics, StoreError> {
        Ok(OrderAnalytics::from_orders(self.lock().orders.values(), now))
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        self.lock().payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_payment(&self, key: PaymentKey<'_>) -> Result<Option<Payment>, StoreError> {
        let inner = self.lock();
        Ok(inner.payment_id(key).and_then(|id| inner.payments.get(&id).cloned()))
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<Payment> = self.lock().payments.values().filter(|p| p.order_id == order_id).cloned().collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payments)
    }

    async fn set_status(&self, key: PaymentKey<'_>, status: PaymentStatus, at: DateTime<Utc>) -> Result<PaymentTransition, StoreError> {
        let mut inner = self.lock();
        let Some(id) = inner.payment_id(key) else { return Ok(PaymentTransition::Missing) };
        let current = inner.payments.get(&id).cloned().ok_or(StoreError::Corrupt(format!("payment {id} vanished")))?;
        if current.status == status { return Ok(PaymentTransition::Unchanged(current)); }
        if !payment_transition_allowed(current.status, status) { return Ok(PaymentTransition::Rejected(current)); }
        if status == PaymentStatus::Succeeded {
            let rival = inner.payments.values().find(|p| p.order_id == current.order_id && p.id != id && p.status == PaymentStatus::Succeeded);
            if let Some(rival) = rival { return Ok(PaymentTransition::SucceededElsewhere(rival.clone())); }
        }
        let payment = inner.payments.get_mut(&id).ok_or(StoreError::Corrupt(format!("payment {id} vanished")))?;
        payment.status = status;
        payment.updated_at = at;
        Ok(PaymentTransition::Updated(payment.clone()))
    }
}

#[async_trait]
impl CustomerDirectory for MemoryStore {
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        Ok(self.lock().customers.get(&id).cloned())
    }
}
