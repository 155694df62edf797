//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::chain::ChainClient;
use crate::config::{GatewayConfig, OpsConfig};
use crate::domain::Clock;
use crate::domain::queue_entry::SEARCH_SYNC_QUEUE;
use crate::persistence::Store;
use crate::service::{
    IntentService, OpsService, Reconciler, RetryQueue, WebhookService, WebhookVerifier,
};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Intent creation, lookups and chain observations.
    pub intents: Arc<IntentService>,
    /// Webhook ingestion.
    pub webhooks: Arc<WebhookService>,
    /// Webhook signature and IP checks.
    pub webhook_verifier: Arc<WebhookVerifier>,
    /// Chain sweeps.
    pub reconciler: Arc<Reconciler>,
    /// Search-sync queue.
    pub search_queue: Arc<RetryQueue>,
    /// Administrative actions.
    pub ops: Arc<OpsService>,
    /// Internal API secrets and transport policy.
    pub ops_config: Arc<OpsConfig>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wires every service over one store, chain client and clock.
    #[must_use]
    pub fn build(
        config: &GatewayConfig,
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let search_queue = Arc::new(RetryQueue::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            SEARCH_SYNC_QUEUE,
            config.search_sync.max_attempts,
        )
        .with_lease(config.search_sync.lease_secs));
        let intents = Arc::new(IntentService::new(
            Arc::clone(&store),
            chain,
            Arc::clone(&clock),
            Arc::clone(&search_queue),
            config.chain.clone(),
        ));
        let webhooks = Arc::new(WebhookService::new(
            Arc::clone(&store),
            Arc::clone(&intents),
            config.webhook.processing_lease_secs,
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&intents),
            Arc::clone(&clock),
            config.ops.intent_retry_cooldown_secs,
        ));
        let ops = Arc::new(OpsService::new(
            store,
            Arc::clone(&intents),
            Arc::clone(&reconciler),
            Arc::clone(&search_queue),
            Arc::clone(&clock),
            config.ops.clone(),
            config.sweeps.clone(),
        ));

        Self {
            intents,
            webhooks,
            webhook_verifier: Arc::new(WebhookVerifier::from_config(&config.webhook)),
            reconciler,
            search_queue,
            ops,
            ops_config: Arc::new(config.ops.clone()),
            clock,
        }
    }
}
