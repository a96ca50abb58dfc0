//! OpenSASE Storefront - coupon rushes and group-buy

use anyhow::{Context, Result};
use axum::Router;
use opensase_storefront::api::{router, AppState};
use opensase_storefront::claims::{MemoryCouponIssuer, MemoryOrderCreator, PgCouponIssuer, PgOrderCreator};
use opensase_storefront::clock::SystemClock;
use opensase_storefront::config::{Config, StoreBackend};
use opensase_storefront::ledger::{MemoryLedger, PgLedger};
use opensase_storefront::publisher::{EventPublisher, LogPublisher, NatsPublisher};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsPublisher::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, logging events instead");
                Arc::new(LogPublisher)
            }
        },
        None => Arc::new(LogPublisher),
    };
    let clock = Arc::new(SystemClock);

    let app: Router = match config.store {
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().context("DATABASE_URL")?;
            let ledger = PgLedger::connect(url, config.db_max_connections, config.lock_timeout).await?;
            sqlx::migrate!("./migrations").run(ledger.pool()).await?;
            let state = AppState::new(ledger.clone(), Arc::new(ledger), Arc::new(PgCouponIssuer), Arc::new(PgOrderCreator), clock, publisher, config.retry);
            router(state)
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory ledger, state is lost on restart");
            let ledger = MemoryLedger::with_lock_timeout(config.lock_timeout);
            let state = AppState::new(ledger.clone(), Arc::new(ledger), Arc::new(MemoryCouponIssuer), Arc::new(MemoryOrderCreator), clock, publisher, config.retry);
            router(state)
        }
    };

    tracing::info!("🚀 OpenSASE Storefront listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
