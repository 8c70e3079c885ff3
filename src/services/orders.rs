//! Order lifecycle: creation, payment, cancellation, delivery and reads.
//!
//! Stock is not reserved when an order is placed. The availability check in
//! [`OrderService::create_order`] is advisory; the authoritative check is the
//! guarded debit inside [`OrderService::mark_paid`], which rejects the whole
//! payment transition with `InsufficientStock` if any line falls short.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    Actor, DeliveryPolicy, Order, OrderAnalytics, OrderStatus, PricingPolicy, ShippingAddress, StockCheck,
};
use crate::error::{ConflictError, EcommerceError, Result};
use crate::store::{CancelTransition, OrderRepository, PaidTransition, ProductCatalog, StatusTransition, StockLedger};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrderLine { pub product_id: Uuid, pub quantity: u32 }

#[derive(Clone, Debug)]
pub struct NewOrder {
    pub items: Vec<NewOrderLine>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
}

#[derive(Clone)]
pub struct OrderService {
    catalog: Arc<dyn ProductCatalog>,
    ledger: Arc<dyn StockLedger>,
    orders: Arc<dyn OrderRepository>,
    pricing: PricingPolicy,
    delivery: DeliveryPolicy,
    currency: String,
}

impl OrderService {
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        ledger: Arc<dyn StockLedger>,
        orders: Arc<dyn OrderRepository>,
        pricing: PricingPolicy,
        delivery: DeliveryPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self { catalog, ledger, orders, pricing, delivery, currency: currency.into() }
    }

    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn create_order(&self, user_id: Uuid, request: NewOrder) -> Result<Order> {
        // Duplicate lines for one product are checked against their sum.
        let mut wanted: Vec<(Uuid, i64)> = Vec::new();
        for line in &request.items {
            match wanted.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some((_, q)) => *q += i64::from(line.quantity),
                None => wanted.push((line.product_id, i64::from(line.quantity))),
            }
        }

        let mut products = HashMap::with_capacity(wanted.len());
        for (product_id, quantity) in &wanted {
            let product = self.catalog.find_product(*product_id).await?
                .ok_or_else(|| EcommerceError::NotFound(format!("Product {product_id}")))?;
            if let StockCheck::Insufficient { available } = self.ledger.reserve_check(*product_id, *quantity).await? {
                info!(%product_id, requested = *quantity, available, "order rejected, insufficient stock");
                return Err(EcommerceError::InsufficientStock { product_id: *product_id, available });
            }
            products.insert(*product_id, product);
        }

        let lines = request.items.iter()
            .filter_map(|l| products.get(&l.product_id).map(|p| p.snapshot_line(l.quantity)))
            .collect();
        let order = Order::place(user_id, lines, request.shipping_address, request.payment_method, &self.currency, &self.pricing)?;
        self.orders.insert_order(&order).await?;
        info!(order_id = %order.id, total = %order.total_price, "order created");
        Ok(order)
    }

    /// Loads an order the actor may see.
    pub async fn get_order(&self, order_id: Uuid, actor: &Actor) -> Result<Order> {
        let order = self.orders.find_order(order_id).await?.ok_or_else(|| EcommerceError::order_not_found(order_id))?;
        if !order.is_visible_to(actor) {
            return Err(EcommerceError::Forbidden(format!("order {order_id} belongs to another user")));
        }
        Ok(order)
    }

    /// Pays for an order exactly once. Both the explicit call and the
    /// settlement webhook end up here; the storage-level conditional update
    /// decides which one wins and the loser gets `AlreadyPaid`.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn mark_paid(&self, order_id: Uuid, actor: &Actor) -> Result<Order> {
        let order = self.get_order(order_id, actor).await?;
        if order.status != OrderStatus::Pending {
            return Err(ConflictError::AlreadyPaid.into());
        }
        match self.orders.mark_paid(order_id, Utc::now()).await? {
            PaidTransition::Paid(order) => {
                info!(%order_id, "order paid, stock debited");
                Ok(order)
            }
            PaidTransition::NotPending(_) => Err(ConflictError::AlreadyPaid.into()),
            PaidTransition::Shortfall { product_id, available } => {
                warn!(%order_id, %product_id, available, "payment rejected, stock ran out since the order was placed");
                Err(EcommerceError::InsufficientStock { product_id, available })
            }
            PaidTransition::Missing => Err(EcommerceError::order_not_found(order_id)),
        }
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn cancel_order(&self, order_id: Uuid, actor: &Actor) -> Result<Order> {
        self.get_order(order_id, actor).await?;
        match self.orders.cancel(order_id, Utc::now()).await? {
            CancelTransition::Cancelled { order, restocked } => {
                info!(%order_id, restocked, "order cancelled");
                Ok(order)
            }
            CancelTransition::NotCancellable(status) => Err(EcommerceError::invalid_state(status, "cancel")),
            CancelTransition::Missing => Err(EcommerceError::order_not_found(order_id)),
        }
    }

    /// Admin only. Under [`DeliveryPolicy::AllowUnpaid`] an order that was
    /// never paid may be delivered.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn mark_delivered(&self, order_id: Uuid, actor: &Actor) -> Result<Order> {
        require_admin(actor, "mark orders delivered")?;
        match self.orders.mark_delivered(order_id, self.delivery.accepted_sources(), Utc::now()).await? {
            StatusTransition::Applied(order) => {
                if order.paid_at.is_none() {
                    warn!(%order_id, "unpaid order marked delivered");
                }
                info!(%order_id, "order delivered");
                Ok(order)
            }
            StatusTransition::Rejected(status) => Err(EcommerceError::invalid_state(status, "deliver")),
            StatusTransition::Missing => Err(EcommerceError::order_not_found(order_id)),
        }
    }

    pub async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        Ok(self.orders.list_for_user(user_id).await?)
    }

    pub async fn list_all_orders(&self, actor: &Actor) -> Result<Vec<Order>> {
        require_admin(actor, "list all orders")?;
        Ok(self.orders.list_all().await?)
    }

    pub async fn analytics(&self, actor: &Actor) -> Result<OrderAnalytics> {
        require_admin(actor, "view analytics")?;
        Ok(self.orders.analytics(Utc::now()).await?)
    }
}

pub(crate) fn require_admin(actor: &Actor, what: &str) -> Result<()> {
    if actor.is_privileged() { Ok(()) } else { Err(EcommerceError::Forbidden(format!("admin role required to {what}"))) }
}
