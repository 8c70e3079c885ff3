use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::AppState;
use crate::domain::{Actor, Order, OrderAnalytics, ShippingAddress};
use crate::error::{EcommerceError, Result};
use crate::services::{NewOrder, NewOrderLine};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(alias = "orderItems")]
    #[validate(length(min = 1, max = 100))]
    pub items: Vec<OrderItemRequest>,
    pub shipping_address: ShippingAddress,
    #[validate(length(min = 1, max = 50))]
    pub payment_method: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    #[serde(alias = "product")]
    pub product_id: Uuid,
    #[serde(alias = "qty")]
    pub quantity: u32,
}

impl CreateOrderRequest {
    fn into_new_order(self) -> Result<NewOrder> {
        self.validate().map_err(|e| EcommerceError::Validation(e.to_string()))?;
        self.shipping_address.validate().map_err(|e| EcommerceError::Validation(e.to_string()))?;
        Ok(NewOrder {
            items: self.items.into_iter().map(|i| NewOrderLine { product_id: i.product_id, quantity: i.quantity }).collect(),
            shipping_address: self.shipping_address,
            payment_method: self.payment_method,
        })
    }
}

pub async fn create(State(s): State<AppState>, actor: Actor, Json(r): Json<CreateOrderRequest>) -> Result<(StatusCode, Json<Order>)> {
    let order = s.orders.create_order(actor.id, r.into_new_order()?).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_mine(State(s): State<AppState>, actor: Actor) -> Result<Json<Vec<Order>>> {
    Ok(Json(s.orders.list_orders_for_user(actor.id).await?))
}

pub async fn list_all(State(s): State<AppState>, actor: Actor) -> Result<Json<Vec<Order>>> {
    Ok(Json(s.orders.list_all_orders(&actor).await?))
}

pub async fn analytics(State(s): State<AppState>, actor: Actor) -> Result<Json<OrderAnalytics>> {
    Ok(Json(s.orders.analytics(&actor).await?))
}

pub async fn get_one(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    Ok(Json(s.orders.get_order(id, &actor).await?))
}

pub async fn pay(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    Ok(Json(s.orders.mark_paid(id, &actor).await?))
}

pub async fn cancel(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    Ok(Json(s.orders.cancel_order(id, &actor).await?))
}

pub async fn deliver(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    Ok(Json(s.orders.mark_delivered(id, &actor).await?))
}
