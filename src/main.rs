//! ens-intent-gateway server entry point.
//!
//! Starts the Axum HTTP server and the background sweeps.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use ens_intent_gateway::api;
use ens_intent_gateway::app_state::AppState;
use ens_intent_gateway::chain::{ChainClient, JsonRpcChainClient};
use ens_intent_gateway::config::GatewayConfig;
use ens_intent_gateway::domain::{Clock, SystemClock};
use ens_intent_gateway::jobs;
use ens_intent_gateway::persistence::{MemoryStore, PostgresStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, "starting ens-intent-gateway");

    // Build persistence layer
    let store: Arc<dyn Store> = if config.persistence_enabled {
        let store = PostgresStore::connect(&config.database).await?;
        store.migrate().await?;
        tracing::info!("PostgreSQL store ready");
        Arc::new(store)
    } else {
        tracing::warn!("PERSISTENCE_ENABLED=false; state is kept in memory only");
        Arc::new(MemoryStore::new())
    };

    // Build chain client and application state
    let chain: Arc<dyn ChainClient> = Arc::new(JsonRpcChainClient::new(&config.chain)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let app_state = AppState::build(&config, store, chain, clock);

    // Background sweeps
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = jobs::spawn_all(&config, &app_state, &shutdown_rx)?;

    // Build router
    let app = api::build_router(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("failed to listen for shutdown signal");
        }
        tracing::info!("shutdown signal received");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("ens-intent-gateway stopped");

    Ok(())
}
