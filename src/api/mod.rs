//! HTTP surface. Authentication happens upstream; the caller arrives as
//! `X-User-Id` / `X-User-Role` headers.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uuid::Uuid;

use crate::domain::{Actor, Role};
use crate::error::{ConflictError, EcommerceError};
use crate::services::{OrderService, PaymentService};

pub mod orders;
pub mod payments;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub payments: PaymentService,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/orders", get(orders::list_all).post(orders::create))
        .route("/orders/my", get(orders::list_mine))
        .route("/orders/analytics", get(orders::analytics))
        .route("/orders/:id", get(orders::get_one))
        .route("/orders/:id/pay", put(orders::pay))
        .route("/orders/:id/cancel", put(orders::cancel))
        .route("/orders/:id/deliver", put(orders::deliver))
        .route("/orders/:id/payments", get(payments::list_for_order))
        .route("/payment/create-intent", post(payments::create_intent))
        .route("/payment/webhook", post(payments::webhook))
        .route("/payment/confirm", post(payments::confirm))
        .route("/payment/:id/succeed", put(payments::succeed));

    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront-orders"})) }))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

fn error_response(status: StatusCode, code: &'static str, message: String) -> Response {
    (status, Json(ErrorBody { code, message })).into_response()
}

impl IntoResponse for EcommerceError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(ConflictError::AlreadyPaid) => (StatusCode::CONFLICT, "ALREADY_PAID"),
            Self::Conflict(ConflictError::InvalidState { .. }) => (StatusCode::CONFLICT, "INVALID_STATE"),
            Self::Conflict(ConflictError::PaymentAlreadySucceeded(_)) => (StatusCode::CONFLICT, "PAYMENT_ALREADY_SUCCEEDED"),
            Self::Conflict(ConflictError::PaymentFinalized { .. }) => (StatusCode::CONFLICT, "PAYMENT_FINALIZED"),
            Self::InsufficientStock { .. } => (StatusCode::CONFLICT, "INSUFFICIENT_STOCK"),
            Self::InvalidSignature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
            Self::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Storage(e) => {
                error!(error = %e, "storage failure");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".into());
            }
        };
        error_response(status, code, self.to_string())
    }
}

/// Rejection for requests without a usable identity.
#[derive(Debug)]
pub struct Unauthenticated(&'static str);

impl IntoResponse for Unauthenticated {
    fn into_response(self) -> Response {
        error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.0.to_string())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = Unauthenticated;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts.headers
            .get(USER_ID_HEADER)
            .ok_or(Unauthenticated("Missing X-User-Id header"))?
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(Unauthenticated("X-User-Id is not a valid id"))?;
        let role = match parts.headers.get(USER_ROLE_HEADER).and_then(|v| v.to_str().ok()) {
            Some(r) if r.trim().eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::Customer,
        };
        Ok(Actor::new(id, role))
    }
}
