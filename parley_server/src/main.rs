//! Parley Server - License and entitlement backend
//!
//! This server handles:
//! - License verification, key activation and message usage accounting
//! - CAPTCHA verification and activation abuse gating
//! - Admin key issuance and the global maintenance flag

mod abuse;
mod config;
mod license;
mod routes;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::{LicenseStore, MemoryStore, PgStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often stale rate-limit windows are swept
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,parley_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    let store = open_store(&config).await?;
    tracing::info!("Using {} license store", store.backend());

    if config.admin_token.is_none() {
        tracing::info!("ADMIN_TOKEN not set; admin routes are disabled");
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = routes::AppState::new(config, store)?;

    if !state.abuse.captcha().is_configured() {
        tracing::warn!("No Turnstile secret configured; captcha checks will fail");
    }

    spawn_limiter_sweep(state.abuse.clone());

    let app = routes::app(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn open_store(config: &config::Config) -> anyhow::Result<Arc<dyn LicenseStore>> {
    if config.uses_memory_store() {
        let store = MemoryStore::new();
        for email in &config.seed_accounts {
            store.create_account(email);
        }
        tracing::warn!(
            "In-memory store selected; {} seeded account(s), nothing is persisted",
            config.seed_accounts.len()
        );
        return Ok(Arc::new(store));
    }

    tracing::info!("Connecting to database...");
    let pool = store::postgres::init_pool(&config.database_url, config.store_timeout).await?;
    tracing::info!("Running database migrations...");
    store::postgres::run_migrations(&pool).await?;

    Ok(Arc::new(PgStore::new(pool)))
}

fn spawn_limiter_sweep(abuse: Arc<abuse::AbuseGate>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let swept = abuse.sweep_limiter();
            if swept > 0 {
                tracing::debug!("Swept {} stale rate-limit windows", swept);
            }
        }
    });
}
