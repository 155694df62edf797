//! Intent service: creation, tx-hash attachment and the chain-observation
//! paths shared by the webhook engine and the sweeps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use super::RetryQueue;
use crate::chain::{ChainClient, ownership_check};
use crate::config::ChainConfig;
use crate::domain::commitment::{
    ETH_TLD, compute_commitment, generate_secret, normalize_address, normalize_label,
    normalize_tld, normalize_tx_hash, parse_bytes32, secret_hash, to_hex,
};
use crate::domain::intent::chain_timestamp;
use crate::domain::lifecycle::{plan_commit, plan_register_failed, plan_registration};
use crate::domain::{
    Clock, CommitmentWindow, EnqueueOutcome, Identity, IntentId, IntentStatus, PurchaseIntent,
    RegistrationDecision, Transition, TransitionOutcome, TxKind,
};
use crate::error::GatewayError;
use crate::persistence::Store;

/// Shortest registration the controller accepts (28 days).
pub const MIN_REGISTRATION_DURATION_SECS: i64 = 28 * 24 * 60 * 60;

/// Queue target type for identity documents.
pub const IDENTITY_TARGET: &str = "identity";

/// Input for [`IntentService::create_intent`].
#[derive(Debug, Clone)]
pub struct CreateIntent {
    /// Application user.
    pub user_id: String,
    /// Owner wallet.
    pub wallet_address: String,
    /// Label to buy.
    pub label: String,
    /// TLD, `eth` when absent.
    pub tld: Option<String>,
    /// Registration duration in seconds.
    pub duration_seconds: i64,
    /// Client-held secret; generated server-side when absent.
    pub secret: Option<String>,
}

/// A created intent and, when generated here, the secret.
#[derive(Debug, Clone)]
pub struct CreatedIntent {
    /// Stored intent.
    pub intent: PurchaseIntent,
    /// Server-generated secret, returned exactly once.
    pub secret: Option<String>,
}

/// Where a commit observation comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitSource {
    /// Signed webhook: a zero chain timestamp means the node lags, so the
    /// receipt time stands in for it.
    Webhook,
    /// Chain sweep: a zero timestamp means nothing happened yet.
    Sweep,
}

/// Result of applying one chain observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// The intent moved.
    Applied {
        /// Status before.
        from: IntentStatus,
        /// Intent after.
        intent: PurchaseIntent,
    },
    /// The intent already reflects this observation.
    AlreadyApplied(PurchaseIntent),
    /// The chain has nothing to report yet.
    NotObserved,
}

/// Result of a registration check.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationSync {
    /// Ownership verified; identity upserted.
    Confirmed {
        /// Whether the intent moved (false on resync).
        applied: bool,
        /// Intent after.
        intent: PurchaseIntent,
        /// Stored identity.
        identity: Identity,
    },
    /// Name not live on-chain.
    NotLive,
    /// Live but owned by another wallet.
    OwnerMismatch {
        /// Actual owner.
        actual_owner: String,
    },
}

/// Business path for purchase intents.
#[derive(Debug)]
pub struct IntentService {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainClient>,
    clock: Arc<dyn Clock>,
    search_queue: Arc<RetryQueue>,
    chain_config: ChainConfig,
}

impl IntentService {
    /// Creates a new `IntentService`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainClient>,
        clock: Arc<dyn Clock>,
        search_queue: Arc<RetryQueue>,
        chain_config: ChainConfig,
    ) -> Self {
        Self {
            store,
            chain,
            clock,
            search_queue,
            chain_config,
        }
    }

    /// Current time from the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validates the request, derives the commitment and stores a
    /// `prepared` intent.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for malformed input and
    /// [`GatewayError::DuplicateCommitment`] when the commitment exists.
    pub async fn create_intent(&self, req: CreateIntent) -> Result<CreatedIntent, GatewayError> {
        let user_id = req.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(GatewayError::InvalidRequest("userId is required".to_string()));
        }
        let label = normalize_label(&req.label)?;
        let tld = normalize_tld(req.tld.as_deref().unwrap_or("eth"))?;
        let wallet_address = normalize_address(&req.wallet_address)?;
        if req.duration_seconds < MIN_REGISTRATION_DURATION_SECS {
            return Err(GatewayError::InvalidRequest(format!(
                "durationSeconds must be at least {MIN_REGISTRATION_DURATION_SECS}"
            )));
        }

        let (secret, generated) = match req.secret.as_deref() {
            Some(raw) => (parse_bytes32(raw)?, None),
            None => {
                let secret = generate_secret();
                (secret, Some(to_hex(&secret)))
            }
        };
        let commitment = compute_commitment(
            &label,
            &wallet_address,
            req.duration_seconds.unsigned_abs(),
            &secret,
        )?;
        let window = self.commitment_window().await?;

        let now = self.clock.now();
        let intent = PurchaseIntent {
            id: IntentId::new(),
            user_id,
            wallet_address,
            domain_name: format!("{label}.{tld}"),
            label,
            tld,
            chain_id: self.chain_config.chain_id,
            duration_seconds: req.duration_seconds,
            secret_hash: secret_hash(&secret),
            commitment,
            min_commitment_age_seconds: window.min_age_secs(),
            max_commitment_age_seconds: window.max_age_secs(),
            commit_tx_hash: None,
            register_tx_hash: None,
            committed_at: None,
            registerable_at: None,
            register_by: None,
            status: IntentStatus::Prepared,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        let intent = self.store.create_intent(intent).await?;
        info!(
            intent_id = %intent.id,
            domain = %intent.domain_name,
            user_id = %intent.user_id,
            "Purchase intent prepared"
        );
        Ok(CreatedIntent {
            intent,
            secret: generated,
        })
    }

    async fn commitment_window(&self) -> Result<CommitmentWindow, GatewayError> {
        match self.chain.commitment_age_bounds().await {
            Ok((min, max)) => CommitmentWindow::new(min, max),
            Err(e) => {
                warn!(error = %e, "Commitment age read failed, using configured defaults");
                CommitmentWindow::new(
                    self.chain_config.default_min_commitment_age_secs,
                    self.chain_config.default_max_commitment_age_secs,
                )
            }
        }
    }

    /// Loads an intent.
    ///
    /// # Errors
    ///
    /// [`GatewayError::IntentNotFound`] for unknown ids.
    pub async fn get_intent(&self, id: IntentId) -> Result<PurchaseIntent, GatewayError> {
        self.store
            .load_intent(id)
            .await?
            .ok_or(GatewayError::IntentNotFound(*id.as_uuid()))
    }

    /// Loads an identity by domain.
    ///
    /// # Errors
    ///
    /// [`GatewayError::IdentityNotFound`] when no identity exists.
    pub async fn get_identity(&self, domain_name: &str) -> Result<Identity, GatewayError> {
        let domain_name = domain_name.trim().to_ascii_lowercase();
        self.store
            .load_identity(&domain_name)
            .await?
            .ok_or(GatewayError::IdentityNotFound(domain_name))
    }

    /// Records a user-submitted transaction hash. Re-submitting the hash
    /// already on record is a no-op.
    ///
    /// # Errors
    ///
    /// [`GatewayError::TxHashAlreadySet`] when another hash is recorded,
    /// [`GatewayError::DuplicateTxHash`] when another intent owns the hash
    /// and [`GatewayError::InvalidTransition`] when the status forbids it.
    pub async fn attach_tx_hash(
        &self,
        id: IntentId,
        kind: TxKind,
        raw_hash: &str,
    ) -> Result<PurchaseIntent, GatewayError> {
        let tx_hash = normalize_tx_hash(raw_hash)?;
        let outcome = self
            .store
            .attach_tx_hash(id, kind, &tx_hash, self.clock.now())
            .await?;
        if outcome.is_applied() {
            debug!(intent_id = %id, column = kind.column(), %tx_hash, "Tx hash attached");
            return Ok(outcome.into_intent());
        }

        let intent = outcome.into_intent();
        let existing = match kind {
            TxKind::Commit => intent.commit_tx_hash.as_deref(),
            TxKind::Register => intent.register_tx_hash.as_deref(),
        };
        match existing {
            Some(existing) if existing == tx_hash => Ok(intent),
            Some(existing) => Err(GatewayError::TxHashAlreadySet {
                field: kind.column(),
                existing: existing.to_string(),
            }),
            None => Err(GatewayError::InvalidTransition {
                intent_id: *intent.id.as_uuid(),
                status: intent.status,
                target: match kind {
                    TxKind::Commit => IntentStatus::Committed,
                    TxKind::Register => IntentStatus::Registered,
                },
            }),
        }
    }

    /// Reads the commitment timestamp and plans the commit transition.
    /// `None` means the chain has nothing to report yet.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Upstream`] on chain failure.
    pub async fn observe_commit(
        &self,
        intent: &PurchaseIntent,
        commit_tx_hash: Option<&str>,
        source: CommitSource,
    ) -> Result<Option<Transition>, GatewayError> {
        if let (Some(recorded), Some(observed)) = (intent.commit_tx_hash.as_deref(), commit_tx_hash)
            && !recorded.eq_ignore_ascii_case(observed)
        {
            warn!(
                intent_id = %intent.id,
                recorded_tx_hash = %recorded,
                observed_tx_hash = %observed,
                "Commit observed under a different tx hash; keeping the recorded one"
            );
        }
        let timestamp = self.chain.commitment_timestamp(&intent.commitment).await?;
        let now = self.clock.now();
        let observed_at = match (timestamp, source) {
            (0, CommitSource::Sweep) => return Ok(None),
            (0, CommitSource::Webhook) => {
                debug!(intent_id = %intent.id, "Commitment not visible on-chain yet, using receipt time");
                now
            }
            (ts, _) => chain_timestamp(ts)?,
        };
        plan_commit(intent, observed_at, commit_tx_hash, now).map(Some)
    }

    /// Applies a planned commit transition.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidTransition`] when the intent already left
    /// the commit path (expired, failed, cancelled).
    pub async fn record_commit(
        &self,
        intent: &PurchaseIntent,
        transition: &Transition,
    ) -> Result<Observation, GatewayError> {
        self.observe(
            intent,
            transition,
            &[
                IntentStatus::Committed,
                IntentStatus::Registerable,
                IntentStatus::Registered,
            ],
        )
        .await
    }

    /// [`Self::observe_commit`] followed by [`Self::record_commit`].
    ///
    /// # Errors
    ///
    /// See both halves.
    pub async fn sync_commit(
        &self,
        intent: &PurchaseIntent,
        commit_tx_hash: Option<&str>,
        source: CommitSource,
    ) -> Result<Observation, GatewayError> {
        match self.observe_commit(intent, commit_tx_hash, source).await? {
            Some(transition) => self.record_commit(intent, &transition).await,
            None => Ok(Observation::NotObserved),
        }
    }

    /// Reads expiry and owner and decides whether the registration holds.
    /// Only `.eth` names are checked; the registrar knows nothing else.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Upstream`] on chain failure.
    pub async fn check_registration(
        &self,
        intent: &PurchaseIntent,
        register_tx_hash: Option<&str>,
        set_primary: bool,
    ) -> Result<RegistrationDecision, GatewayError> {
        if intent.tld != ETH_TLD {
            warn!(
                intent_id = %intent.id,
                domain = %intent.domain_name,
                "Ownership of a non-.eth name cannot be read from the .eth registrar"
            );
            return Ok(RegistrationDecision::NotLive);
        }
        let check = ownership_check(self.chain.as_ref(), &intent.label).await?;
        Ok(plan_registration(
            intent,
            &check,
            register_tx_hash,
            set_primary,
            self.clock.now(),
        ))
    }

    /// Marks the intent registered, upserts the identity and enqueues a
    /// search sync. Re-running it for a registered intent refreshes the
    /// identity.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidTransition`] when the intent is in a terminal
    /// state other than `registered`.
    pub async fn confirm_registration(
        &self,
        intent: &PurchaseIntent,
        transition: &Transition,
        identity: Identity,
    ) -> Result<RegistrationSync, GatewayError> {
        let (applied, intent) =
            match self.observe(intent, transition, &[IntentStatus::Registered]).await? {
                Observation::Applied { intent, .. } => (true, intent),
                Observation::AlreadyApplied(intent) => (false, intent),
                Observation::NotObserved => return Ok(RegistrationSync::NotLive),
            };

        let identity = self.store.upsert_identity(identity).await?;
        let payload = serde_json::to_value(&identity).unwrap_or_else(|_| json!({}));
        if let EnqueueOutcome::Deferred(_) = self
            .search_queue
            .enqueue(IDENTITY_TARGET, &identity.domain_name, payload)
            .await?
        {
            info!(domain = %identity.domain_name, "Search sync deferred, queue paused");
        }
        info!(
            intent_id = %intent.id,
            domain = %identity.domain_name,
            owner = %identity.owner_address,
            applied,
            "Registration confirmed"
        );
        Ok(RegistrationSync::Confirmed {
            applied,
            intent,
            identity,
        })
    }

    /// [`Self::check_registration`] followed, when verified, by
    /// [`Self::confirm_registration`].
    ///
    /// # Errors
    ///
    /// See both halves.
    pub async fn sync_registration(
        &self,
        intent: &PurchaseIntent,
        register_tx_hash: Option<&str>,
        set_primary: bool,
    ) -> Result<RegistrationSync, GatewayError> {
        match self
            .check_registration(intent, register_tx_hash, set_primary)
            .await?
        {
            RegistrationDecision::NotLive => Ok(RegistrationSync::NotLive),
            RegistrationDecision::OwnerMismatch { actual_owner } => {
                Ok(RegistrationSync::OwnerMismatch { actual_owner })
            }
            RegistrationDecision::Confirm {
                transition,
                identity,
            } => self.confirm_registration(intent, &transition, identity).await,
        }
    }

    /// Marks a registration as failed.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidTransition`] when the intent is already in
    /// another terminal state.
    pub async fn fail_registration(
        &self,
        intent: &PurchaseIntent,
        reason: Option<&str>,
    ) -> Result<Observation, GatewayError> {
        let transition = plan_register_failed(reason);
        self.observe(intent, &transition, &[IntentStatus::Failed]).await
    }

    /// Applies a guarded transition and logs the change.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn apply(
        &self,
        id: IntentId,
        transition: &Transition,
    ) -> Result<TransitionOutcome, GatewayError> {
        let outcome = self
            .store
            .transition(id, transition, self.clock.now())
            .await?;
        if outcome.is_applied() {
            info!(
                intent_id = %id,
                to = %transition.to,
                admin_override = transition.admin_override,
                "Intent transitioned"
            );
        } else {
            debug!(
                intent_id = %id,
                to = %transition.to,
                current = %outcome.intent().status,
                "Transition skipped by status guard"
            );
        }
        Ok(outcome)
    }

    /// Applies `transition`; an unchanged result counts as already applied
    /// when the intent sits in one of `satisfied`.
    async fn observe(
        &self,
        intent: &PurchaseIntent,
        transition: &Transition,
        satisfied: &[IntentStatus],
    ) -> Result<Observation, GatewayError> {
        let from = intent.status;
        match self.apply(intent.id, transition).await? {
            TransitionOutcome::Applied(intent) => Ok(Observation::Applied { from, intent }),
            TransitionOutcome::Unchanged(current)
                if current.status == transition.to || satisfied.contains(&current.status) =>
            {
                Ok(Observation::AlreadyApplied(current))
            }
            TransitionOutcome::Unchanged(current) => Err(GatewayError::InvalidTransition {
                intent_id: *current.id.as_uuid(),
                status: current.status,
                target: transition.to,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::persistence::IntentStore;
    use crate::testing::{Harness, SAMPLE_WALLET, sample_epoch, sample_intent};

    const ONE_YEAR: i64 = 31_536_000;

    fn request(secret: Option<String>) -> CreateIntent {
        CreateIntent {
            user_id: "user-1".to_string(),
            wallet_address: SAMPLE_WALLET.to_string(),
            label: "Alice".to_string(),
            tld: None,
            duration_seconds: ONE_YEAR,
            secret,
        }
    }

    fn epoch_secs() -> u64 {
        u64::try_from(sample_epoch().timestamp()).unwrap_or(0)
    }

    #[tokio::test]
    async fn create_generates_secret_and_reads_window_from_chain() {
        let harness = Harness::new();
        harness.chain.set_bounds(Some((120, 7_200)));
        let Ok(created) = harness.state.intents.create_intent(request(None)).await else {
            panic!("create failed");
        };
        let Some(secret) = created.secret.as_deref() else {
            panic!("secret not generated");
        };
        let Ok(bytes) = parse_bytes32(secret) else {
            panic!("secret is not bytes32");
        };
        let Ok(expected) = compute_commitment("alice", SAMPLE_WALLET, ONE_YEAR.unsigned_abs(), &bytes)
        else {
            panic!("commitment failed");
        };
        assert_eq!(created.intent.commitment, expected);
        assert_eq!(created.intent.domain_name, "alice.eth");
        assert_eq!(created.intent.status, IntentStatus::Prepared);
        assert_eq!(created.intent.min_commitment_age_seconds, 120);
        assert_eq!(created.intent.max_commitment_age_seconds, 7_200);
    }

    #[tokio::test]
    async fn create_falls_back_to_configured_window() {
        let harness = Harness::new();
        harness.chain.set_bounds(None);
        let Ok(created) = harness.state.intents.create_intent(request(None)).await else {
            panic!("create failed");
        };
        assert_eq!(created.intent.min_commitment_age_seconds, 60);
        assert_eq!(created.intent.max_commitment_age_seconds, 86_400);
    }

    #[tokio::test]
    async fn client_secret_is_not_echoed_and_reuse_conflicts() {
        let harness = Harness::new();
        let secret = format!("0x{}", "11".repeat(32));
        let Ok(created) = harness
            .state
            .intents
            .create_intent(request(Some(secret.clone())))
            .await
        else {
            panic!("create failed");
        };
        assert!(created.secret.is_none());

        let Err(err) = harness.state.intents.create_intent(request(Some(secret))).await else {
            panic!("duplicate commitment accepted");
        };
        assert!(matches!(err, GatewayError::DuplicateCommitment(_)));
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let harness = Harness::new();
        let mut short = request(None);
        short.duration_seconds = MIN_REGISTRATION_DURATION_SECS - 1;
        let mut anonymous = request(None);
        anonymous.user_id = "  ".to_string();
        let mut bad_wallet = request(None);
        bad_wallet.wallet_address = "0x1234".to_string();

        for req in [short, anonymous, bad_wallet] {
            let Err(err) = harness.state.intents.create_intent(req).await else {
                panic!("bad request accepted");
            };
            assert_eq!(err.error_code(), 1001);
        }
    }

    #[tokio::test]
    async fn non_eth_tld_is_rejected_and_never_confirmed() {
        let harness = Harness::new();
        let mut xyz = request(None);
        xyz.tld = Some("xyz".to_string());
        let Err(err) = harness.state.intents.create_intent(xyz).await else {
            panic!("non-.eth tld accepted");
        };
        assert_eq!(err.error_code(), 1001);

        let mut stored = sample_intent();
        stored.tld = "xyz".to_string();
        stored.domain_name = "alice.xyz".to_string();
        let Ok(stored) = harness.store.create_intent(stored).await else {
            panic!("seed failed");
        };
        harness
            .chain
            .register_name("alice", SAMPLE_WALLET, epoch_secs() + 31_536_000);

        let Ok(sync) = harness
            .state
            .intents
            .sync_registration(&stored, None, false)
            .await
        else {
            panic!("registration check failed");
        };
        assert_eq!(sync, RegistrationSync::NotLive);
        assert!(harness.state.intents.get_identity("alice.xyz").await.is_err());
        let Ok(unchanged) = harness.state.intents.get_intent(stored.id).await else {
            panic!("intent vanished");
        };
        assert_eq!(unchanged.status, IntentStatus::Prepared);
    }

    #[tokio::test]
    async fn sweep_ignores_zero_timestamp_but_webhook_uses_receipt_time() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        let service = &harness.state.intents;

        let Ok(swept) = service.sync_commit(&intent, None, CommitSource::Sweep).await else {
            panic!("sweep sync failed");
        };
        assert_eq!(swept, Observation::NotObserved);

        harness.clock.advance(Duration::seconds(5));
        let tx = format!("0x{}", "aa".repeat(32));
        let Ok(Observation::Applied { from, intent: committed }) = service
            .sync_commit(&intent, Some(&tx), CommitSource::Webhook)
            .await
        else {
            panic!("webhook commit not applied");
        };
        assert_eq!(from, IntentStatus::Prepared);
        assert_eq!(committed.status, IntentStatus::Committed);
        assert_eq!(committed.committed_at, Some(sample_epoch() + Duration::seconds(5)));
        assert_eq!(committed.commit_tx_hash.as_deref(), Some(tx.as_str()));
    }

    #[tokio::test]
    async fn recorded_commit_hash_survives_a_different_observation() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        let recorded = format!("0x{}", "ab".repeat(32));
        let Ok(intent) = harness
            .state
            .intents
            .attach_tx_hash(intent.id, TxKind::Commit, &recorded)
            .await
        else {
            panic!("attach failed");
        };
        harness
            .chain
            .set_commitment(&intent.commitment, epoch_secs() + 10);
        harness.clock.advance(Duration::seconds(20));

        let other = format!("0x{}", "cd".repeat(32));
        let Ok(Observation::Applied { intent: committed, .. }) = harness
            .state
            .intents
            .sync_commit(&intent, Some(&other), CommitSource::Webhook)
            .await
        else {
            panic!("commit not applied");
        };
        assert_eq!(committed.status, IntentStatus::Committed);
        assert_eq!(committed.commit_tx_hash.as_deref(), Some(recorded.as_str()));
    }

    #[tokio::test]
    async fn registration_writes_identity_once_and_resyncs() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        harness
            .chain
            .register_name("alice", SAMPLE_WALLET, epoch_secs() + 31_536_000);
        let service = &harness.state.intents;

        let Ok(RegistrationSync::Confirmed { applied, intent: registered, identity }) =
            service.sync_registration(&intent, None, true).await
        else {
            panic!("registration not confirmed");
        };
        assert!(applied);
        assert_eq!(registered.status, IntentStatus::Registered);
        assert_eq!(identity.domain_name, "alice.eth");
        assert!(identity.is_primary);

        let Ok(RegistrationSync::Confirmed { applied, .. }) =
            service.sync_registration(&registered, None, true).await
        else {
            panic!("resync not confirmed");
        };
        assert!(!applied);

        let Ok(report) = harness.state.search_queue.status().await else {
            panic!("queue status failed");
        };
        assert_eq!(report.counts.get("pending").copied(), Some(1));
    }

    #[tokio::test]
    async fn foreign_owner_is_a_mismatch() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        let other = "0x00000000000000000000000000000000000000bb";
        harness
            .chain
            .register_name("alice", other, epoch_secs() + 31_536_000);

        let Ok(sync) = harness
            .state
            .intents
            .sync_registration(&intent, None, false)
            .await
        else {
            panic!("registration check failed");
        };
        assert_eq!(
            sync,
            RegistrationSync::OwnerMismatch {
                actual_owner: other.to_string()
            }
        );
    }
}
