#![allow(dead_code)]

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use storefront_orders::domain::{Actor, DeliveryPolicy, Order, PaymentMetadata, PricingPolicy, Product, ShippingAddress};
use storefront_orders::gateway::{MockGateway, SignatureVerifier};
use storefront_orders::mail::RecordingMailer;
use storefront_orders::queue::{MemoryQueue, SettlementPublisher};
use storefront_orders::services::{NewOrder, NewOrderLine, NotificationDispatcher, OrderService, PaymentService, RetryPolicy};
use storefront_orders::store::{Customer, MemoryStore};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub struct Harness {
    pub store: MemoryStore,
    pub gateway: MockGateway,
    pub queue: MemoryQueue,
    pub mailer: RecordingMailer,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub verifier: SignatureVerifier,
}

impl Harness {
    pub fn new() -> Self { Self::with_delivery(DeliveryPolicy::AllowUnpaid) }

    pub fn with_delivery(delivery: DeliveryPolicy) -> Self {
        let store = MemoryStore::new();
        let gateway = MockGateway::new();
        let queue = MemoryQueue::new();
        let shared = Arc::new(store.clone());
        let orders = OrderService::new(shared.clone(), shared.clone(), shared.clone(), PricingPolicy::default(), delivery, "usd");
        let verifier = SignatureVerifier::new(WEBHOOK_SECRET, 300);
        let publisher: Arc<dyn SettlementPublisher> = Arc::new(queue.clone());
        let payments = PaymentService::new(orders.clone(), shared, Arc::new(gateway.clone()), Some(publisher), verifier.clone());
        Self { store, gateway, queue, mailer: RecordingMailer::new(), orders, payments, verifier }
    }

    pub fn product(&self, price: i64, stock: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.store.put_product(Product {
            id, name: format!("Product {}", &id.to_string()[..8]), sku: format!("SKU-{}", &id.to_string()[..8]),
            price: Decimal::new(price, 0), image: None, stock,
        });
        id
    }

    pub fn stock(&self, product_id: Uuid) -> i64 { self.store.stock_of(product_id).unwrap_or(-1) }

    pub fn customer(&self) -> Actor {
        let id = Uuid::new_v4();
        self.store.put_customer(Customer { id, name: "Test Customer".into(), email: format!("{id}@example.com") });
        Actor::customer(id)
    }

    pub async fn place(&self, actor: &Actor, lines: &[(Uuid, u32)]) -> Order {
        self.orders.create_order(actor.id, new_order(lines)).await.unwrap()
    }

    /// A signed `payment_intent.succeeded` delivery carrying the metadata the
    /// intent was created with.
    pub fn succeeded_event(&self, intent_id: &str) -> (Vec<u8>, String) {
        let metadata = self.gateway.request_for(intent_id).map(|r| r.metadata);
        self.signed_event("payment_intent.succeeded", intent_id, metadata.as_ref())
    }

    pub fn signed_event(&self, kind: &str, intent_id: &str, metadata: Option<&PaymentMetadata>) -> (Vec<u8>, String) {
        let metadata: serde_json::Map<String, serde_json::Value> = metadata
            .map(|m| m.to_pairs().into_iter().map(|(k, v)| (k, serde_json::Value::String(v))).collect())
            .unwrap_or_default();
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "type": kind,
            "data": {"object": {"id": intent_id, "amount": 5400, "currency": "usd", "metadata": metadata}},
        }))
        .unwrap();
        let header = self.verifier.sign(&payload, Utc::now().timestamp()).unwrap();
        (payload, header)
    }

    pub fn dispatcher(&self, retry: RetryPolicy) -> NotificationDispatcher {
        let shared = Arc::new(self.store.clone());
        NotificationDispatcher::new(shared.clone(), shared, Arc::new(self.mailer.clone()), Arc::new(self.queue.clone()), retry)
    }
}

pub fn address() -> ShippingAddress {
    ShippingAddress { address: "1 Main St".into(), city: "Springfield".into(), postal_code: "12345".into(), country: "US".into() }
}

pub fn new_order(lines: &[(Uuid, u32)]) -> NewOrder {
    NewOrder {
        items: lines.iter().map(|(product_id, quantity)| NewOrderLine { product_id: *product_id, quantity: *quantity }).collect(),
        shipping_address: address(),
        payment_method: "card".into(),
    }
}
