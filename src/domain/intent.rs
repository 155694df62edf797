//! Purchase intent aggregate and its guarded state machine.
//!
//! Every status change is expressed as a [`Transition`]: a target status, an
//! optional set of expected current statuses and a field patch. Stores apply
//! a transition as a single conditional update guarded by
//! `status ∈ expected ∩ legal_predecessors(target)`; if the guard does not
//! match, the store reports [`TransitionOutcome::Unchanged`] instead of an
//! error so that racing writers (webhook vs. watcher) never fail each other.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::IntentId;
use crate::error::GatewayError;

/// Lifecycle status of a purchase intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Commitment computed, commit transaction not yet observed.
    Prepared,
    /// Commit observed on-chain; minimum commitment age not reached yet.
    Committed,
    /// Minimum age reached; the register transaction may be sent.
    Registerable,
    /// Registration confirmed and ownership verified.
    Registered,
    /// `register_by` passed without a confirmed registration.
    Expired,
    /// Explicit failure signal.
    Failed,
    /// Operator cancelled the intent.
    Cancelled,
}

impl IntentStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Prepared,
        Self::Committed,
        Self::Registerable,
        Self::Registered,
        Self::Expired,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Non-terminal statuses.
    pub const PENDING: [Self; 3] = [Self::Prepared, Self::Committed, Self::Registerable];

    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::Registerable => "registerable",
            Self::Registered => "registered",
            Self::Expired => "expired",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are immutable outside administrative override.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Registered | Self::Expired | Self::Failed | Self::Cancelled
        )
    }

    /// Statuses from which `self` may legally be entered.
    #[must_use]
    pub const fn legal_predecessors(self) -> &'static [Self] {
        match self {
            Self::Prepared => &[],
            Self::Committed => &[Self::Prepared],
            Self::Registerable => &[Self::Prepared, Self::Committed],
            Self::Registered | Self::Expired | Self::Failed | Self::Cancelled => &Self::PENDING,
        }
    }

    /// Whether `self → target` is a legal forward move.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        target.legal_predecessors().contains(&self)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown intent status: {s}")))
    }
}

/// Minimum / maximum commitment age enforced by the registrar controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitmentWindow {
    min_age_secs: i64,
    max_age_secs: i64,
}

impl CommitmentWindow {
    /// Builds a window.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] when either bound is negative
    /// or `min > max` (which would break `registerable_at ≤ register_by`).
    pub fn new(min_age_secs: i64, max_age_secs: i64) -> Result<Self, GatewayError> {
        if min_age_secs < 0 || max_age_secs < 0 || min_age_secs > max_age_secs {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid commitment window: min {min_age_secs}s, max {max_age_secs}s"
            )));
        }
        Ok(Self {
            min_age_secs,
            max_age_secs,
        })
    }

    /// Minimum age in seconds.
    #[must_use]
    pub const fn min_age_secs(&self) -> i64 {
        self.min_age_secs
    }

    /// Maximum age in seconds.
    #[must_use]
    pub const fn max_age_secs(&self) -> i64 {
        self.max_age_secs
    }

    /// Derives `registerable_at` and `register_by` from the observed commit time.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] on timestamp overflow.
    pub fn timing(&self, committed_at: DateTime<Utc>) -> Result<IntentTiming, GatewayError> {
        let registerable_at = committed_at
            .checked_add_signed(Duration::seconds(self.min_age_secs))
            .ok_or_else(|| GatewayError::Internal("registerable_at overflow".to_string()))?;
        let register_by = committed_at
            .checked_add_signed(Duration::seconds(self.max_age_secs))
            .ok_or_else(|| GatewayError::Internal("register_by overflow".to_string()))?;
        Ok(IntentTiming {
            committed_at,
            registerable_at,
            register_by,
        })
    }
}

/// Timing fields derived from a commit observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntentTiming {
    /// When the commitment landed on-chain.
    pub committed_at: DateTime<Utc>,
    /// `committed_at + min_age`.
    pub registerable_at: DateTime<Utc>,
    /// `committed_at + max_age`: the expiry deadline.
    pub register_by: DateTime<Utc>,
}

impl IntentTiming {
    /// Status an intent with this timing should have at `now`.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> IntentStatus {
        if now >= self.registerable_at {
            IntentStatus::Registerable
        } else {
            IntentStatus::Committed
        }
    }
}

/// Converts an on-chain unix timestamp into a UTC instant.
///
/// # Errors
///
/// Returns [`GatewayError::Upstream`] for timestamps chrono cannot represent.
pub fn chain_timestamp(secs: u64) -> Result<DateTime<Utc>, GatewayError> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| GatewayError::Upstream(format!("chain timestamp out of range: {secs}")))
}

/// One attempted domain purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseIntent {
    /// Intent identifier.
    pub id: IntentId,
    /// Owning application user.
    pub user_id: String,
    /// Wallet that will own the name (lower-case hex).
    pub wallet_address: String,
    /// Normalised label (`alice` in `alice.eth`).
    pub label: String,
    /// Top-level domain, usually `eth`.
    pub tld: String,
    /// `label.tld`.
    pub domain_name: String,
    /// Chain the intent targets.
    pub chain_id: i64,
    /// Registration duration in seconds.
    pub duration_seconds: i64,
    /// `keccak256(secret)`.
    pub secret_hash: String,
    /// Commitment digest submitted in the commit transaction.
    pub commitment: String,
    /// Registrar minimum commitment age.
    pub min_commitment_age_seconds: i64,
    /// Registrar maximum commitment age.
    pub max_commitment_age_seconds: i64,
    /// Commit transaction hash, once known.
    pub commit_tx_hash: Option<String>,
    /// Register transaction hash, once known.
    pub register_tx_hash: Option<String>,
    /// Observed commit time.
    pub committed_at: Option<DateTime<Utc>>,
    /// Earliest time registration is allowed.
    pub registerable_at: Option<DateTime<Utc>>,
    /// Expiry deadline of the commitment.
    pub register_by: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: IntentStatus,
    /// Why the intent expired or failed.
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl PurchaseIntent {
    /// Commitment window recorded on this intent.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if the stored bounds are inconsistent.
    pub fn window(&self) -> Result<CommitmentWindow, GatewayError> {
        CommitmentWindow::new(
            self.min_commitment_age_seconds,
            self.max_commitment_age_seconds,
        )
    }

    /// Whether the commitment deadline has passed at `now`.
    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.register_by.is_some_and(|deadline| now > deadline)
    }

    /// Whether a commit has been observed (timing fields are populated).
    #[must_use]
    pub const fn has_commit(&self) -> bool {
        self.committed_at.is_some()
    }

    /// Recorded timing, if a commit was observed.
    #[must_use]
    pub fn timing(&self) -> Option<IntentTiming> {
        match (self.committed_at, self.registerable_at, self.register_by) {
            (Some(committed_at), Some(registerable_at), Some(register_by)) => Some(IntentTiming {
                committed_at,
                registerable_at,
                register_by,
            }),
            _ => None,
        }
    }
}

/// Which transaction hash column a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// `commit_tx_hash`.
    Commit,
    /// `register_tx_hash`.
    Register,
}

impl TxKind {
    /// Column name, also used in conflict errors.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Commit => "commit_tx_hash",
            Self::Register => "register_tx_hash",
        }
    }

    /// Statuses in which a hash of this kind may be attached.
    #[must_use]
    pub const fn attachable_from(self) -> &'static [IntentStatus] {
        match self {
            Self::Commit => &[IntentStatus::Prepared],
            Self::Register => &IntentStatus::PENDING,
        }
    }
}

/// Field changes carried by a transition. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentPatch {
    /// New commit time.
    pub committed_at: Option<DateTime<Utc>>,
    /// New registerable time.
    pub registerable_at: Option<DateTime<Utc>>,
    /// New deadline.
    pub register_by: Option<DateTime<Utc>>,
    /// Commit hash to record.
    pub commit_tx_hash: Option<String>,
    /// Register hash to record.
    pub register_tx_hash: Option<String>,
    /// `Some(None)` clears the reason, `Some(Some(_))` sets it.
    pub failure_reason: Option<Option<String>>,
}

impl IntentPatch {
    /// Patch that records derived timing.
    #[must_use]
    pub fn with_timing(mut self, timing: IntentTiming) -> Self {
        self.committed_at = Some(timing.committed_at);
        self.registerable_at = Some(timing.registerable_at);
        self.register_by = Some(timing.register_by);
        self
    }

    /// Applies the patch in memory.
    pub fn apply_to(&self, intent: &mut PurchaseIntent) {
        if let Some(at) = self.committed_at {
            intent.committed_at = Some(at);
        }
        if let Some(at) = self.registerable_at {
            intent.registerable_at = Some(at);
        }
        if let Some(at) = self.register_by {
            intent.register_by = Some(at);
        }
        if let Some(hash) = &self.commit_tx_hash {
            intent.commit_tx_hash = Some(hash.clone());
        }
        if let Some(hash) = &self.register_tx_hash {
            intent.register_tx_hash = Some(hash.clone());
        }
        if let Some(reason) = &self.failure_reason {
            intent.failure_reason.clone_from(reason);
        }
    }
}

/// A guarded status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Target status.
    pub to: IntentStatus,
    /// Caller's expectation of the current status, narrowed further by the
    /// target's legal predecessors.
    pub expected: Option<Vec<IntentStatus>>,
    /// Field changes.
    pub patch: IntentPatch,
    /// Administrative override: `expected` is used verbatim and the
    /// legal-predecessor table is bypassed.
    pub admin_override: bool,
}

impl Transition {
    /// Forward transition to `to` from any legal predecessor.
    #[must_use]
    pub fn to(to: IntentStatus) -> Self {
        Self {
            to,
            expected: None,
            patch: IntentPatch::default(),
            admin_override: false,
        }
    }

    /// Operator override from exactly `from` to `to`.
    #[must_use]
    pub fn admin_override(to: IntentStatus, from: &[IntentStatus]) -> Self {
        Self {
            to,
            expected: Some(from.to_vec()),
            patch: IntentPatch::default(),
            admin_override: true,
        }
    }

    /// Narrows the guard to `statuses`.
    #[must_use]
    pub fn expecting(mut self, statuses: &[IntentStatus]) -> Self {
        self.expected = Some(statuses.to_vec());
        self
    }

    /// Attaches a field patch.
    #[must_use]
    pub fn with_patch(mut self, patch: IntentPatch) -> Self {
        self.patch = patch;
        self
    }

    /// Statuses the record must currently have for the update to apply.
    #[must_use]
    pub fn guard_statuses(&self) -> Vec<IntentStatus> {
        if self.admin_override {
            return self.expected.clone().unwrap_or_default();
        }
        let legal = self.to.legal_predecessors();
        match &self.expected {
            Some(expected) => expected
                .iter()
                .copied()
                .filter(|s| legal.contains(s))
                .collect(),
            None => legal.to_vec(),
        }
    }
}

/// Result of a conditional transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The guard matched and the update was written.
    Applied(PurchaseIntent),
    /// The guard did not match; the current record is returned untouched.
    Unchanged(PurchaseIntent),
}

impl TransitionOutcome {
    /// The intent after the call.
    #[must_use]
    pub const fn intent(&self) -> &PurchaseIntent {
        match self {
            Self::Applied(intent) | Self::Unchanged(intent) => intent,
        }
    }

    /// Consumes the outcome, returning the intent.
    #[must_use]
    pub fn into_intent(self) -> PurchaseIntent {
        match self {
            Self::Applied(intent) | Self::Unchanged(intent) => intent,
        }
    }

    /// Whether the update was written.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}
