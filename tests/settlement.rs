mod common;

use rust_decimal::Decimal;
use uuid::Uuid;

use common::Harness;
use storefront_orders::domain::{Actor, OrderStatus, PaymentMetadata, PaymentStatus, SettlementMessage};
use storefront_orders::gateway::mock::FailureMode;
use storefront_orders::services::SettlementOutcome;
use storefront_orders::{ConflictError, EcommerceError};

#[tokio::test]
async fn test_end_to_end_settlement_is_idempotent() {
    let h = Harness::new();
    let user = h.customer();
    let p = h.product(20, 10);

    let order = h.place(&user, &[(p, 2)]).await;
    assert_eq!(order.items_price, Decimal::new(40, 0));
    assert_eq!(order.tax_price, Decimal::new(4, 0));
    assert_eq!(order.shipping_price, Decimal::new(10, 0));
    assert_eq!(order.total_price, Decimal::new(54, 0));

    let issued = h.payments.create_intent(order.id, &user).await.unwrap();
    let payments = h.payments.list_payments(order.id, &user).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].id, issued.payment_id);
    assert_eq!(payments[0].status, PaymentStatus::Pending);
    assert!(issued.client_secret.starts_with(&payments[0].gateway_intent_id));

    let request = h.gateway.request_for(&payments[0].gateway_intent_id).unwrap();
    assert_eq!(request.amount, 5400);
    assert_eq!(request.metadata, PaymentMetadata { order_id: order.id, user_id: user.id });
    assert_eq!(request.idempotency_key, issued.payment_id.to_string());

    let (payload, signature) = h.succeeded_event(&payments[0].gateway_intent_id);
    let outcome = h.payments.handle_settlement(&payload, Some(signature.as_str())).await.unwrap();
    assert_eq!(outcome, SettlementOutcome::Settled { notified: true });
    assert_eq!(h.orders.get_order(order.id, &user).await.unwrap().status, OrderStatus::Paid);
    assert_eq!(h.stock(p), 8);
    assert_eq!(h.queue.published(), vec![SettlementMessage::PaymentSuccess { order_id: order.id, user_id: user.id }]);
    assert_eq!(h.payments.list_payments(order.id, &user).await.unwrap()[0].status, PaymentStatus::Succeeded);

    for _ in 0..3 {
        let outcome = h.payments.handle_settlement(&payload, Some(signature.as_str())).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::AlreadySettled);
    }
    assert_eq!(h.stock(p), 8);
    assert_eq!(h.queue.published().len(), 1);
}

#[tokio::test]
async fn test_explicit_pay_and_webhook_debit_once() {
    let h = Harness::new();
    let user = h.customer();
    let p = h.product(20, 10);
    let order = h.place(&user, &[(p, 3)]).await;
    h.payments.create_intent(order.id, &user).await.unwrap();
    let intent = h.payments.list_payments(order.id, &user).await.unwrap()[0].gateway_intent_id.clone();
    let (payload, signature) = h.succeeded_event(&intent);

    let (explicit, webhook) = tokio::join!(
        h.orders.mark_paid(order.id, &user),
        h.payments.handle_settlement(&payload, Some(signature.as_str())),
    );
    let webhook = webhook.unwrap();
    match explicit {
        Ok(_) => assert_eq!(webhook, SettlementOutcome::AlreadySettled),
        Err(e) => {
            assert!(e.is_already_paid());
            assert!(matches!(webhook, SettlementOutcome::Settled { .. }));
        }
    }
    assert_eq!(h.stock(p), 7);

    let again = h.orders.mark_paid(order.id, &user).await.unwrap_err();
    assert!(matches!(again, EcommerceError::Conflict(ConflictError::AlreadyPaid)));
    assert_eq!(h.stock(p), 7);
}

#[tokio::test]
async fn test_invalid_signature_mutates_nothing() {
    let h = Harness::new();
    let user = h.customer();
    let p = h.product(20, 10);
    let order = h.place(&user, &[(p, 2)]).await;
    h.payments.create_intent(order.id, &user).await.unwrap();
    let intent = h.payments.list_payments(order.id, &user).await.unwrap()[0].gateway_intent_id.clone();
    let (payload, signature) = h.succeeded_event(&intent);

    let forged = storefront_orders::gateway::SignatureVerifier::new("not-the-secret", 300)
        .sign(&payload, chrono::Utc::now().timestamp())
        .unwrap();
    for header in [None, Some("garbage"), Some(forged.as_str())] {
        let err = h.payments.handle_settlement(&payload, header).await.unwrap_err();
        assert!(matches!(err, EcommerceError::InvalidSignature(_)));
    }
    let mut tampered = payload.clone();
    tampered.extend_from_slice(b" ");
    assert!(matches!(h.payments.handle_settlement(&tampered, Some(signature.as_str())).await, Err(EcommerceError::InvalidSignature(_))));

    assert_eq!(h.orders.get_order(order.id, &user).await.unwrap().status, OrderStatus::Pending);
    assert_eq!(h.stock(p), 10);
    assert!(h.queue.published().is_empty());
    assert_eq!(h.payments.list_payments(order.id, &user).await.unwrap()[0].status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_unhandled_events_are_acknowledged() {
    let h = Harness::new();
    let user = h.customer();
    let p = h.product(20, 10);
    let order = h.place(&user, &[(p, 2)]).await;

    let (payload, sig) = h.signed_event("charge.refunded", "pi_x", None);
    assert_eq!(h.payments.handle_settlement(&payload, Some(sig.as_str())).await.unwrap(), SettlementOutcome::Ignored);

    let (payload, sig) = h.signed_event("payment_intent.succeeded", "pi_unknown", None);
    assert_eq!(h.payments.handle_settlement(&payload, Some(sig.as_str())).await.unwrap(), SettlementOutcome::Ignored);

    let ghost = PaymentMetadata { order_id: Uuid::new_v4(), user_id: user.id };
    let (payload, sig) = h.signed_event("payment_intent.succeeded", "pi_ghost", Some(&ghost));
    assert_eq!(h.payments.handle_settlement(&payload, Some(sig.as_str())).await.unwrap(), SettlementOutcome::Ignored);

    // No local Payment row, but the metadata still names a real order.
    let meta = PaymentMetadata { order_id: order.id, user_id: user.id };
    let (payload, sig) = h.signed_event("payment_intent.succeeded", "pi_external", Some(&meta));
    assert!(matches!(h.payments.handle_settlement(&payload, Some(sig.as_str())).await.unwrap(), SettlementOutcome::Settled { .. }));
    assert_eq!(h.stock(p), 8);
}

#[tokio::test]
async fn test_failed_and_canceled_events_only_touch_payment() {
    let h = Harness::new();
    let user = h.customer();
    let p = h.product(20, 10);
    let order = h.place(&user, &[(p, 2)]).await;
    h.payments.create_intent(order.id, &user).await.unwrap();
    h.payments.create_intent(order.id, &user).await.unwrap();
    let payments = h.payments.list_payments(order.id, &user).await.unwrap();
    assert_eq!(payments.len(), 2);

    let meta = PaymentMetadata { order_id: order.id, user_id: user.id };
    let (payload, sig) = h.signed_event("payment_intent.payment_failed", &payments[0].gateway_intent_id, Some(&meta));
    assert_eq!(h.payments.handle_settlement(&payload, Some(sig.as_str())).await.unwrap(), SettlementOutcome::PaymentUpdated);
    let (payload, sig) = h.signed_event("payment_intent.canceled", &payments[1].gateway_intent_id, Some(&meta));
    assert_eq!(h.payments.handle_settlement(&payload, Some(sig.as_str())).await.unwrap(), SettlementOutcome::PaymentUpdated);

    let statuses: Vec<PaymentStatus> = h.payments.list_payments(order.id, &user).await.unwrap().iter().map(|p| p.status).collect();
    assert!(statuses.contains(&PaymentStatus::Failed));
    assert!(statuses.contains(&PaymentStatus::Canceled));
    assert_eq!(h.orders.get_order(order.id, &user).await.unwrap().status, OrderStatus::Pending);
    assert_eq!(h.stock(p), 10);
    assert!(h.queue.published().is_empty());
}

#[tokio::test]
async fn test_publish_failure_keeps_order_paid() {
    let h = Harness::new();
    let user = h.customer();
    let p = h.product(20, 10);
    let order = h.place(&user, &[(p, 2)]).await;
    h.payments.create_intent(order.id, &user).await.unwrap();
    let intent = h.payments.list_payments(order.id, &user).await.unwrap()[0].gateway_intent_id.clone();

    h.queue.fail_publish(true);
    let (payload, sig) = h.succeeded_event(&intent);
    assert_eq!(h.payments.handle_settlement(&payload, Some(sig.as_str())).await.unwrap(), SettlementOutcome::Settled { notified: false });
    assert_eq!(h.orders.get_order(order.id, &user).await.unwrap().status, OrderStatus::Paid);
    assert_eq!(h.stock(p), 8);
}

#[tokio::test]
async fn test_stock_shortfall_at_settlement_is_acknowledged() {
    let h = Harness::new();
    let user = h.customer();
    let p = h.product(20, 2);
    let order = h.place(&user, &[(p, 2)]).await;
    h.payments.create_intent(order.id, &user).await.unwrap();
    let intent = h.payments.list_payments(order.id, &user).await.unwrap()[0].gateway_intent_id.clone();

    let rival = h.place(&user, &[(p, 2)]).await;
    h.orders.mark_paid(rival.id, &user).await.unwrap();

    let (payload, sig) = h.succeeded_event(&intent);
    assert_eq!(h.payments.handle_settlement(&payload, Some(sig.as_str())).await.unwrap(), SettlementOutcome::StockShortfall);
    assert_eq!(h.orders.get_order(order.id, &user).await.unwrap().status, OrderStatus::Pending);
    assert_eq!(h.stock(p), 0);
    assert!(h.queue.published().is_empty());
}

#[tokio::test]
async fn test_create_intent_rules() {
    let h = Harness::new();
    let owner = h.customer();
    let stranger = h.customer();
    let p = h.product(20, 10);
    let order = h.place(&owner, &[(p, 1)]).await;

    assert!(matches!(h.payments.create_intent(order.id, &stranger).await, Err(EcommerceError::Forbidden(_))));
    assert!(matches!(h.payments.create_intent(Uuid::new_v4(), &owner).await, Err(EcommerceError::NotFound(_))));

    h.gateway.fail_next(FailureMode::Timeout);
    assert!(matches!(h.payments.create_intent(order.id, &owner).await, Err(EcommerceError::UpstreamUnavailable(_))));
    assert!(h.payments.list_payments(order.id, &owner).await.unwrap().is_empty());

    // Retrying opens a fresh intent.
    let first = h.payments.create_intent(order.id, &owner).await.unwrap();
    let second = h.payments.create_intent(order.id, &owner).await.unwrap();
    assert_ne!(first.payment_id, second.payment_id);
    assert_eq!(h.gateway.intent_count(), 2);
    assert_eq!(h.orders.get_order(order.id, &owner).await.unwrap().status, OrderStatus::Pending);

    h.orders.mark_paid(order.id, &owner).await.unwrap();
    assert!(matches!(h.payments.create_intent(order.id, &owner).await, Err(EcommerceError::Conflict(ConflictError::AlreadyPaid))));

    let cancelled = h.place(&owner, &[(p, 1)]).await;
    h.orders.cancel_order(cancelled.id, &owner).await.unwrap();
    assert!(matches!(
        h.payments.create_intent(cancelled.id, &owner).await,
        Err(EcommerceError::Conflict(ConflictError::InvalidState { status: OrderStatus::Cancelled, .. }))
    ));
}

#[tokio::test]
async fn test_admin_payment_shortcuts() {
    let h = Harness::new();
    let user = h.customer();
    let admin = Actor::admin(Uuid::new_v4());
    let p = h.product(20, 10);
    let order = h.place(&user, &[(p, 1)]).await;
    let first = h.payments.create_intent(order.id, &user).await.unwrap();
    let second = h.payments.create_intent(order.id, &user).await.unwrap();
    let intent = h.payments.list_payments(order.id, &user).await.unwrap()
        .into_iter().find(|p| p.id == first.payment_id).unwrap().gateway_intent_id;

    assert!(matches!(h.payments.mark_succeeded(first.payment_id, &user).await, Err(EcommerceError::Forbidden(_))));
    assert!(matches!(h.payments.confirm_intent(&intent, None, &user).await, Err(EcommerceError::Forbidden(_))));

    let confirmed = h.payments.confirm_intent(&intent, Some("pm_card_visa"), &admin).await.unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Succeeded);
    // Shortcuts never touch the order.
    assert_eq!(h.orders.get_order(order.id, &user).await.unwrap().status, OrderStatus::Pending);
    assert_eq!(h.stock(p), 10);

    let err = h.payments.mark_succeeded(second.payment_id, &admin).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Conflict(ConflictError::PaymentAlreadySucceeded(id)) if id == order.id));
    assert!(matches!(h.payments.mark_succeeded(Uuid::new_v4(), &admin).await, Err(EcommerceError::NotFound(_))));
}

#[tokio::test]
async fn test_mark_succeeded_refuses_canceled_payment() {
    let h = Harness::new();
    let user = h.customer();
    let admin = Actor::admin(Uuid::new_v4());
    let p = h.product(20, 10);
    let order = h.place(&user, &[(p, 2)]).await;
    let issued = h.payments.create_intent(order.id, &user).await.unwrap();
    let intent = h.payments.list_payments(order.id, &user).await.unwrap()[0].gateway_intent_id.clone();

    let meta = PaymentMetadata { order_id: order.id, user_id: user.id };
    let (payload, sig) = h.signed_event("payment_intent.canceled", &intent, Some(&meta));
    assert_eq!(h.payments.handle_settlement(&payload, Some(sig.as_str())).await.unwrap(), SettlementOutcome::PaymentUpdated);

    let err = h.payments.mark_succeeded(issued.payment_id, &admin).await.unwrap_err();
    assert!(matches!(
        err,
        EcommerceError::Conflict(ConflictError::PaymentFinalized { status: PaymentStatus::Canceled, requested: PaymentStatus::Succeeded })
    ));
    let payment = h.payments.list_payments(order.id, &user).await.unwrap().remove(0);
    assert_eq!(payment.status, PaymentStatus::Canceled);
    assert_eq!(h.orders.get_order(order.id, &user).await.unwrap().status, OrderStatus::Pending);
}
