//! Storefront Orders - order, stock and payment reconciliation service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_orders::api::{self, AppState};
use storefront_orders::gateway::{SignatureVerifier, StripeGateway};
use storefront_orders::mail::HttpMailer;
use storefront_orders::queue::{NatsQueue, SettlementPublisher};
use storefront_orders::services::{NotificationDispatcher, OrderService, PaymentService};
use storefront_orders::store::PgStore;
use storefront_orders::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let db = PgPoolOptions::new().max_connections(config.database_max_connections).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let store = Arc::new(PgStore::new(db));

    let nats = match &config.nats_url {
        Some(url) => Some(async_nats::connect(url.as_str()).await?),
        None => {
            tracing::warn!("NATS_URL not set, settlement messages will not be queued");
            None
        }
    };
    let queue = match &nats {
        Some(client) => Some(NatsQueue::connect(client.clone(), config.queue.clone()).await?),
        None => None,
    };

    let orders = OrderService::new(store.clone(), store.clone(), store.clone(), config.pricing.clone(), config.delivery, config.currency.clone());
    let gateway = Arc::new(StripeGateway::new(&config.stripe_secret_key, &config.stripe_api_base, config.gateway_timeout)?);
    let publisher = queue.clone().map(|q| Arc::new(q) as Arc<dyn SettlementPublisher>);
    let verifier = SignatureVerifier::new(&config.stripe_webhook_secret, config.webhook_tolerance_secs);
    let payments = PaymentService::new(orders.clone(), store.clone(), gateway, publisher, verifier);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_task = match &queue {
        Some(queue) => {
            let mailer = Arc::new(HttpMailer::new(config.mail_api_url.clone(), config.mail_api_key.clone(), &config.mail_from, config.mail_timeout)?);
            let dispatcher = NotificationDispatcher::new(store.clone(), store.clone(), mailer, Arc::new(queue.clone()), config.retry);
            let consumer = queue.consumer().await?;
            Some(tokio::spawn(async move { dispatcher.run(consumer, shutdown_rx).await }))
        }
        None => None,
    };

    let app = api::router(AppState { orders, payments });
    tracing::info!("🚀 Storefront Orders listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app)
        .with_graceful_shutdown(async { tokio::signal::ctrl_c().await.ok(); })
        .await?;

    shutdown_tx.send(true).ok();
    if let Some(task) = dispatcher_task {
        task.await.ok();
    }
    if let Some(client) = nats {
        client.flush().await.ok();
    }
    tracing::info!("shutdown complete");
    Ok(())
}
