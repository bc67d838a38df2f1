use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use firewall_api::app::{router, AppState};
use firewall_api::config::AppConfig;
use firewall_api::database::{MemoryStore, PgStore, RecordStore};
use firewall_api::resources::{self, ResourceRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, SECURITY_JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!("Starting Firewall API in {:?} mode", config.environment);

    let store: Arc<dyn RecordStore> = match config.database.url.as_deref() {
        Some(url) => Arc::new(PgStore::connect_lazy(&config.database, url).context("configuring database pool")?),
        None => {
            tracing::warn!("DATABASE_URL not set, serving from an empty in-memory store");
            let store = ResourceRegistry::standard()
                .iter()
                .map(|(_, schema)| schema.table())
                .chain([resources::RULE_SOURCES, resources::RULE_DESTINATIONS, resources::RULE_PORTS])
                .fold(MemoryStore::new(), |store, table| store.with_table(table, Vec::new()));
            Arc::new(store)
        }
    };

    let state = AppState::from_config(&config, store, None).context("building application state")?;
    let app = router(state);

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Firewall API listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
