use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::domain::{Actor, Payment};
use crate::error::Result;
use crate::gateway::webhook::SIGNATURE_HEADER;
use crate::services::IntentIssued;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest { pub order_id: Uuid }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmIntentRequest {
    pub intent_id: String,
    pub payment_method: Option<String>,
}

pub async fn create_intent(State(s): State<AppState>, actor: Actor, Json(r): Json<CreateIntentRequest>) -> Result<Json<IntentIssued>> {
    Ok(Json(s.payments.create_intent(r.order_id, &actor).await?))
}

/// Takes the raw body: the signature covers the exact bytes sent.
pub async fn webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<serde_json::Value>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    s.payments.handle_settlement(&body, signature).await?;
    Ok(Json(serde_json::json!({"received": true})))
}

pub async fn confirm(State(s): State<AppState>, actor: Actor, Json(r): Json<ConfirmIntentRequest>) -> Result<Json<Payment>> {
    Ok(Json(s.payments.confirm_intent(&r.intent_id, r.payment_method.as_deref(), &actor).await?))
}

pub async fn succeed(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Payment>> {
    Ok(Json(s.payments.mark_succeeded(id, &actor).await?))
}

pub async fn list_for_order(State(s): State<AppState>, actor: Actor, Path(id): Path<Uuid>) -> Result<Json<Vec<Payment>>> {
    Ok(Json(s.payments.list_payments(id, &actor).await?))
}
