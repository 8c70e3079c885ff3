//! Payment reconciliation: intent issuance and signed settlement events.
//!
//! The gateway may deliver the same event any number of times. Every
//! settlement funnels into [`OrderService::mark_paid`], whose storage-level
//! `pending -> paid` transition is the single point that debits stock, so a
//! redelivered event finds the order no longer pending and changes nothing.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::orders::{require_admin, OrderService};
use crate::domain::{Actor, Order, OrderStatus, Payment, PaymentMetadata, PaymentStatus, SettlementMessage};
use crate::error::{ConflictError, EcommerceError, Result};
use crate::gateway::webhook::{PAYMENT_CANCELED, PAYMENT_FAILED, PAYMENT_SUCCEEDED};
use crate::gateway::{GatewayEvent, IntentRequest, PaymentGateway, SignatureVerifier};
use crate::queue::SettlementPublisher;
use crate::store::{PaymentKey, PaymentRepository, PaymentTransition};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentIssued {
    pub client_secret: String,
    pub payment_id: Uuid,
}

/// What a verified settlement event did. Every variant is a success from the
/// gateway's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The order moved to `Paid` on this delivery.
    Settled { notified: bool },
    /// The order was already past `Pending`; nothing changed.
    AlreadySettled,
    /// A failed or canceled intent was recorded on its Payment.
    PaymentUpdated,
    /// Paid at the gateway, but stock ran out; needs manual follow-up.
    StockShortfall,
    Ignored,
}

#[derive(Clone)]
pub struct PaymentService {
    orders: OrderService,
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Option<Arc<dyn SettlementPublisher>>,
    verifier: SignatureVerifier,
}

impl PaymentService {
    pub fn new(
        orders: OrderService,
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: Option<Arc<dyn SettlementPublisher>>,
        verifier: SignatureVerifier,
    ) -> Self {
        Self { orders, payments, gateway, publisher, verifier }
    }

    /// Opens a fresh gateway intent for the order's total. Retrying after a
    /// dropped response simply opens another one; the order is not touched.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn create_intent(&self, order_id: Uuid, actor: &Actor) -> Result<IntentIssued> {
        let order = self.orders.get_order(order_id, actor).await?;
        match order.status {
            OrderStatus::Pending => {}
            OrderStatus::Cancelled => return Err(EcommerceError::invalid_state(order.status, "pay for")),
            OrderStatus::Paid | OrderStatus::Delivered => return Err(ConflictError::AlreadyPaid.into()),
        }
        let amount = order.total().minor_units().map_err(|e| EcommerceError::Validation(e.to_string()))?;

        let payment_id = Uuid::now_v7();
        let intent = self.gateway
            .create_intent(IntentRequest {
                amount,
                currency: order.currency.clone(),
                metadata: PaymentMetadata::for_order(&order),
                idempotency_key: payment_id.to_string(),
            })
            .await
            .map_err(|e| {
                warn!(%order_id, error = %e, "payment intent not created");
                EcommerceError::UpstreamUnavailable(e.to_string())
            })?;
        let client_secret = intent.client_secret
            .ok_or_else(|| EcommerceError::UpstreamUnavailable("gateway returned no client secret".into()))?;

        // Written only once the gateway has an intent to match it.
        let payment = Payment::pending(payment_id, &order, intent.id);
        self.payments.insert_payment(&payment).await?;
        info!(%order_id, %payment_id, intent_id = %payment.gateway_intent_id, amount, "payment intent created");
        Ok(IntentIssued { client_secret, payment_id })
    }

    /// Entry point for the gateway webhook. Nothing is read or written
    /// before the signature checks out.
    #[instrument(skip_all)]
    pub async fn handle_settlement(&self, raw: &[u8], signature: Option<&str>) -> Result<SettlementOutcome> {
        let header = signature.ok_or_else(|| EcommerceError::InvalidSignature("missing signature header".into()))?;
        self.verifier.verify(raw, header).map_err(|e| {
            warn!(error = %e, "settlement event rejected");
            EcommerceError::InvalidSignature(e.to_string())
        })?;

        let event = match GatewayEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "signed settlement event could not be parsed");
                return Ok(SettlementOutcome::Ignored);
            }
        };
        debug!(event_id = %event.id, kind = %event.kind, intent_id = %event.data.object.id, "settlement event received");

        match event.kind.as_str() {
            PAYMENT_SUCCEEDED => self.settle(&event).await,
            PAYMENT_FAILED => self.record_intent_status(&event, PaymentStatus::Failed).await,
            PAYMENT_CANCELED => self.record_intent_status(&event, PaymentStatus::Canceled).await,
            other => {
                debug!(kind = other, "event type not handled");
                Ok(SettlementOutcome::Ignored)
            }
        }
    }

    async fn settle(&self, event: &GatewayEvent) -> Result<SettlementOutcome> {
        let intent = &event.data.object;
        let metadata = match PaymentMetadata::from_gateway(&intent.metadata) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(event_id = %event.id, intent_id = %intent.id, error = %e, "succeeded intent carries no usable order metadata");
                return Ok(SettlementOutcome::Ignored);
            }
        };
        let order_id = metadata.order_id;

        match self.payments.set_status(PaymentKey::Intent(&intent.id), PaymentStatus::Succeeded, Utc::now()).await? {
            PaymentTransition::Updated(_) | PaymentTransition::Unchanged(_) => {}
            PaymentTransition::Missing => warn!(%order_id, intent_id = %intent.id, "no local payment for intent, settling from metadata"),
            PaymentTransition::Rejected(p) => warn!(%order_id, payment_id = %p.id, status = %p.status, "intent succeeded after payment was final"),
            PaymentTransition::SucceededElsewhere(rival) => {
                error!(%order_id, intent_id = %intent.id, rival = %rival.id, "second successful payment for one order, refund required");
            }
        }

        let order = match self.orders.get_order(order_id, &Actor::system()).await {
            Ok(order) => order,
            Err(EcommerceError::NotFound(_)) => {
                warn!(%order_id, "settlement for unknown order ignored");
                return Ok(SettlementOutcome::Ignored);
            }
            Err(e) => return Err(e),
        };
        if order.status != OrderStatus::Pending {
            if order.status == OrderStatus::Cancelled {
                warn!(%order_id, "payment settled for a cancelled order");
            }
            debug!(%order_id, status = %order.status, "order already settled");
            return Ok(SettlementOutcome::AlreadySettled);
        }

        match self.orders.mark_paid(order_id, &Actor::system()).await {
            Ok(order) => Ok(SettlementOutcome::Settled { notified: self.announce(&order).await }),
            Err(e) if e.is_already_paid() => Ok(SettlementOutcome::AlreadySettled),
            Err(EcommerceError::InsufficientStock { product_id, available }) => {
                error!(%order_id, %product_id, available, "payment captured but stock is short, order left pending");
                Ok(SettlementOutcome::StockShortfall)
            }
            Err(e) => Err(e),
        }
    }

    async fn record_intent_status(&self, event: &GatewayEvent, status: PaymentStatus) -> Result<SettlementOutcome> {
        let intent_id = &event.data.object.id;
        match self.payments.set_status(PaymentKey::Intent(intent_id), status, Utc::now()).await? {
            PaymentTransition::Updated(p) => {
                info!(payment_id = %p.id, order_id = %p.order_id, %status, "payment status updated");
                Ok(SettlementOutcome::PaymentUpdated)
            }
            PaymentTransition::Missing => {
                warn!(%intent_id, %status, "no local payment for intent");
                Ok(SettlementOutcome::Ignored)
            }
            PaymentTransition::Rejected(p) => {
                warn!(payment_id = %p.id, current = %p.status, requested = %status, "payment already final, event ignored");
                Ok(SettlementOutcome::Ignored)
            }
            _ => Ok(SettlementOutcome::Ignored),
        }
    }

    /// Publication is at-least-once best effort; a failure never undoes the payment.
    async fn announce(&self, order: &Order) -> bool {
        let Some(publisher) = &self.publisher else {
            warn!(order_id = %order.id, "no settlement queue configured, confirmation not queued");
            return false;
        };
        let message = SettlementMessage::PaymentSuccess { order_id: order.id, user_id: order.user_id };
        match publisher.publish(&message).await {
            Ok(()) => {
                info!(order_id = %order.id, "settlement published");
                true
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "settlement message not published");
                false
            }
        }
    }

    /// Admin shortcut: confirms an intent at the gateway and mirrors the
    /// resulting status onto its Payment. Order state is not touched.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn confirm_intent(&self, intent_id: &str, payment_method: Option<&str>, actor: &Actor) -> Result<Payment> {
        require_admin(actor, "confirm payment intents")?;
        let payment = self.payments.find_payment(PaymentKey::Intent(intent_id)).await?
            .ok_or_else(|| EcommerceError::payment_not_found(intent_id))?;
        let intent = self.gateway.confirm_intent(intent_id, payment_method).await
            .map_err(|e| EcommerceError::UpstreamUnavailable(e.to_string()))?;
        if intent.status == payment.status {
            return Ok(payment);
        }
        self.apply(PaymentKey::Intent(intent_id), intent.status).await
    }

    /// Admin shortcut: marks a Payment succeeded without touching its order.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn mark_succeeded(&self, payment_id: Uuid, actor: &Actor) -> Result<Payment> {
        require_admin(actor, "mark payments succeeded")?;
        self.apply(PaymentKey::Id(payment_id), PaymentStatus::Succeeded).await
    }

    async fn apply(&self, key: PaymentKey<'_>, status: PaymentStatus) -> Result<Payment> {
        match self.payments.set_status(key, status, Utc::now()).await? {
            PaymentTransition::Updated(p) => {
                info!(payment_id = %p.id, %status, "payment status set");
                Ok(p)
            }
            PaymentTransition::Unchanged(p) => Ok(p),
            PaymentTransition::Rejected(p) => {
                Err(ConflictError::PaymentFinalized { status: p.status, requested: status }.into())
            }
            PaymentTransition::SucceededElsewhere(rival) => Err(ConflictError::PaymentAlreadySucceeded(rival.order_id).into()),
            PaymentTransition::Missing => Err(match key {
                PaymentKey::Id(id) => EcommerceError::payment_not_found(id),
                PaymentKey::Intent(intent) => EcommerceError::payment_not_found(intent),
            }),
        }
    }

    /// Every Payment attempt for an order the actor may see.
    pub async fn list_payments(&self, order_id: Uuid, actor: &Actor) -> Result<Vec<Payment>> {
        self.orders.get_order(order_id, actor).await?;
        Ok(self.payments.list_for_order(order_id).await?)
    }
}
