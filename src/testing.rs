//! Test doubles shared by unit tests and the router tests in `api::tests`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::app_state::AppState;
use crate::chain::ChainClient;
use crate::config::{
    ChainConfig, DatabaseConfig, GatewayConfig, MAINNET_BASE_REGISTRAR, MAINNET_CONTROLLER,
    OpsConfig, SearchSyncConfig, SweepConfig, WebhookConfig,
};
use crate::domain::commitment::{compute_commitment, generate_secret, secret_hash};
use crate::domain::{Clock, IntentId, IntentStatus, ManualClock, PurchaseIntent};
use crate::error::GatewayError;
use crate::persistence::{IntentStore, MemoryStore, Store};

/// Webhook HMAC secret configured by [`test_config`].
pub const WEBHOOK_SECRET: &str = "webhook-secret";

/// Internal ops secret configured by [`test_config`].
pub const OPS_SECRET: &str = "ops-secret";

/// In-memory configuration with one secret per surface, HTTPS enforcement
/// off, 60s cooldowns and no background jobs.
#[must_use]
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        persistence_enabled: false,
        log_format: "pretty".to_string(),
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 0,
            connect_timeout_secs: 1,
        },
        webhook: WebhookConfig {
            secrets: vec![SecretString::from(WEBHOOK_SECRET)],
            signature_ttl_secs: 300,
            ip_allowlist: Vec::new(),
            trust_forwarded_for: false,
            processing_lease_secs: 300,
        },
        ops: OpsConfig {
            secrets: vec![SecretString::from(OPS_SECRET)],
            require_https: false,
            intent_retry_cooldown_secs: 60,
            intent_expire_cooldown_secs: 60,
            reconcile_cooldown_secs: 60,
            queue_bulk_cooldown_secs: 60,
        },
        chain: ChainConfig {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 1,
            controller_address: MAINNET_CONTROLLER.to_string(),
            base_registrar_address: MAINNET_BASE_REGISTRAR.to_string(),
            rpc_timeout_secs: 1,
            default_min_commitment_age_secs: 60,
            default_max_commitment_age_secs: 86_400,
        },
        sweeps: SweepConfig {
            watcher_enabled: false,
            watcher_interval_secs: 30,
            watcher_batch_size: 50,
            reconciler_enabled: false,
            reconciler_interval_secs: 300,
            reconciler_batch_size: 100,
            reconciler_stale_minutes: 10,
        },
        search_sync: SearchSyncConfig {
            index_url: None,
            max_attempts: 3,
            batch_size: 10,
            interval_secs: 15,
            lease_secs: 300,
        },
        audit_retention_days: 90,
    }
}

/// Fully wired application over [`MemoryStore`], [`ScriptedChain`] and a
/// [`ManualClock`] frozen at [`sample_epoch`].
#[derive(Debug, Clone)]
pub struct Harness {
    /// Backing store.
    pub store: Arc<MemoryStore>,
    /// Scripted chain.
    pub chain: Arc<ScriptedChain>,
    /// Controllable clock.
    pub clock: Arc<ManualClock>,
    /// State handed to the router.
    pub state: AppState,
}

impl Harness {
    /// Wires [`test_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&test_config())
    }

    /// Wires a custom configuration.
    #[must_use]
    pub fn with_config(config: &GatewayConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(ScriptedChain::new());
        let clock = Arc::new(ManualClock::new(sample_epoch()));
        let state = AppState::build(
            config,
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&chain) as Arc<dyn ChainClient>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        Self {
            store,
            chain,
            clock,
            state,
        }
    }

    /// Stores [`sample_intent`] and returns it.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn seed_intent(&self) -> Result<PurchaseIntent, GatewayError> {
        self.store.create_intent(sample_intent()).await
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Wallet used by [`sample_intent`].
pub const SAMPLE_WALLET: &str = "0x00000000000000000000000000000000000000aa";

/// 2026-01-01T00:00:00Z, the creation time of [`sample_intent`].
#[must_use]
pub fn sample_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).unwrap_or_default()
}

/// A freshly prepared one-year intent for `alice.eth` with a 60s / 86400s
/// window. Every call gets its own secret, so commitments never collide.
#[must_use]
pub fn sample_intent() -> PurchaseIntent {
    let secret = generate_secret();
    let duration: i64 = 31_536_000;
    let commitment = compute_commitment("alice", SAMPLE_WALLET, duration.unsigned_abs(), &secret)
        .unwrap_or_else(|_| secret_hash(&secret));
    let created_at = sample_epoch();
    PurchaseIntent {
        id: IntentId::new(),
        user_id: "user-1".to_string(),
        wallet_address: SAMPLE_WALLET.to_string(),
        label: "alice".to_string(),
        tld: "eth".to_string(),
        domain_name: "alice.eth".to_string(),
        chain_id: 1,
        duration_seconds: duration,
        secret_hash: secret_hash(&secret),
        commitment,
        min_commitment_age_seconds: 60,
        max_commitment_age_seconds: 86_400,
        commit_tx_hash: None,
        register_tx_hash: None,
        committed_at: None,
        registerable_at: None,
        register_by: None,
        status: IntentStatus::Prepared,
        failure_reason: None,
        created_at,
        updated_at: created_at,
    }
}

#[derive(Debug, Default)]
struct ChainState {
    commitments: HashMap<String, u64>,
    expiries: HashMap<String, u64>,
    owners: HashMap<String, String>,
    bounds: Option<(i64, i64)>,
    unavailable: bool,
}

/// In-memory [`ChainClient`] whose answers are set by the test.
///
/// Unknown commitments read as `0`, unknown names as never registered.
#[derive(Debug, Default)]
pub struct ScriptedChain {
    state: Mutex<ChainState>,
}

impl ScriptedChain {
    /// Empty chain reporting a 60s / 86400s commitment window.
    #[must_use]
    pub fn new() -> Self {
        let chain = Self::default();
        chain.state().bounds = Some((60, 86_400));
        chain
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `commitment` as committed at unix second `timestamp`.
    pub fn set_commitment(&self, commitment: &str, timestamp: u64) {
        self.state()
            .commitments
            .insert(commitment.to_ascii_lowercase(), timestamp);
    }

    /// Registers `label` to `owner` until unix second `expires`.
    pub fn register_name(&self, label: &str, owner: &str, expires: u64) {
        let mut state = self.state();
        state.expiries.insert(label.to_string(), expires);
        state
            .owners
            .insert(label.to_string(), owner.to_ascii_lowercase());
    }

    /// Overrides the reported commitment window; `None` makes the read fail.
    pub fn set_bounds(&self, bounds: Option<(i64, i64)>) {
        self.state().bounds = bounds;
    }

    /// Makes every read fail with [`GatewayError::Upstream`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.state().unavailable {
            return Err(GatewayError::Upstream("scripted chain unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn commitment_timestamp(&self, commitment: &str) -> Result<u64, GatewayError> {
        self.check_available()?;
        Ok(self
            .state()
            .commitments
            .get(&commitment.to_ascii_lowercase())
            .copied()
            .unwrap_or(0))
    }

    async fn name_expires(&self, label: &str) -> Result<u64, GatewayError> {
        self.check_available()?;
        Ok(self.state().expiries.get(label).copied().unwrap_or(0))
    }

    async fn owner_of(&self, label: &str) -> Result<Option<String>, GatewayError> {
        self.check_available()?;
        Ok(self.state().owners.get(label).cloned())
    }

    async fn commitment_age_bounds(&self) -> Result<(i64, i64), GatewayError> {
        self.check_available()?;
        self.state()
            .bounds
            .ok_or_else(|| GatewayError::Upstream("commitment bounds unavailable".to_string()))
    }
}
