//! Pure planners that turn chain observations into guarded transitions.
//!
//! Webhook handlers and the chain sweeps both call these, so a fact observed
//! twice (once per path) always produces the same transition and the store's
//! status guard makes the second application a no-op.

use chrono::{DateTime, Duration, Utc};

use super::identity::{Identity, OwnershipCheck, OwnershipVerdict};
use super::intent::{IntentPatch, IntentStatus, PurchaseIntent, Transition};
use crate::error::GatewayError;

/// Reason recorded when a commitment outlived its maximum age.
pub const COMMITMENT_TOO_OLD_REASON: &str = "commitment exceeded max age before registration";

/// Reason recorded by the stale reconciler.
pub const FALLBACK_EXPIRY_REASON: &str =
    "fallback expiry: register_by passed without a confirmed registration";

/// Reason recorded when no commit was ever seen on-chain.
pub const COMMIT_NEVER_OBSERVED_REASON: &str =
    "fallback expiry: commitment never observed on-chain within max commitment age";

/// Default reason for `register.failed` without one.
pub const REGISTER_FAILED_REASON: &str = "register transaction failed";

/// Plans the move that records a commit observed at `observed_at`.
///
/// Timing is always recomputed from the intent's commitment window; the
/// target is `committed` or `registerable` depending on `now`, or
/// `expired` when the observation is already past its deadline.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] if the stored window is
/// inconsistent, or [`GatewayError::Internal`] on timestamp overflow.
pub fn plan_commit(
    intent: &PurchaseIntent,
    observed_at: DateTime<Utc>,
    commit_tx_hash: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition, GatewayError> {
    let timing = intent.window()?.timing(observed_at)?;
    let mut patch = IntentPatch::default().with_timing(timing);
    if intent.commit_tx_hash.is_none() {
        patch.commit_tx_hash = commit_tx_hash.map(str::to_string);
    }

    if now > timing.register_by {
        patch.failure_reason = Some(Some(COMMITMENT_TOO_OLD_REASON.to_string()));
        return Ok(Transition::to(IntentStatus::Expired).with_patch(patch));
    }
    Ok(Transition::to(timing.status_at(now)).with_patch(patch))
}

/// `committed → registerable` once the minimum age has elapsed.
#[must_use]
pub fn plan_promotion(intent: &PurchaseIntent, now: DateTime<Utc>) -> Option<Transition> {
    let timing = intent.timing()?;
    (intent.status == IntentStatus::Committed
        && timing.status_at(now) == IntentStatus::Registerable
        && now <= timing.register_by)
        .then(|| Transition::to(IntentStatus::Registerable).expecting(&[IntentStatus::Committed]))
}

/// Expiry for a pending intent past `register_by`.
#[must_use]
pub fn plan_expiry(intent: &PurchaseIntent, now: DateTime<Utc>) -> Option<Transition> {
    (!intent.status.is_terminal() && intent.is_past_deadline(now))
        .then(|| expire_with(FALLBACK_EXPIRY_REASON))
}

/// Whether a prepared intent has waited longer than any commit could stay
/// valid without a commit ever being recorded.
#[must_use]
pub fn commit_window_lapsed(intent: &PurchaseIntent, now: DateTime<Utc>) -> bool {
    intent.status == IntentStatus::Prepared
        && !intent.has_commit()
        && intent
            .created_at
            .checked_add_signed(Duration::seconds(intent.max_commitment_age_seconds))
            .is_some_and(|deadline| now > deadline)
}

/// Expiry for a prepared intent whose commit never showed up.
#[must_use]
pub fn plan_commit_never_observed() -> Transition {
    expire_with(COMMIT_NEVER_OBSERVED_REASON)
}

fn expire_with(reason: &str) -> Transition {
    Transition::to(IntentStatus::Expired)
        .expecting(&IntentStatus::PENDING)
        .with_patch(IntentPatch {
            failure_reason: Some(Some(reason.to_string())),
            ..IntentPatch::default()
        })
}

/// `register.failed` handling.
#[must_use]
pub fn plan_register_failed(reason: Option<&str>) -> Transition {
    Transition::to(IntentStatus::Failed).with_patch(IntentPatch {
        failure_reason: Some(Some(
            reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or(REGISTER_FAILED_REASON)
                .to_string(),
        )),
        ..IntentPatch::default()
    })
}

/// What to do with a registration once ownership has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationDecision {
    /// Ownership verified: apply the transition, then upsert the identity.
    Confirm {
        /// `→ registered`.
        transition: Transition,
        /// Identity row to upsert.
        identity: Identity,
    },
    /// The name is not (or no longer) live on-chain.
    NotLive,
    /// Live but owned by another address; nothing may be written.
    OwnerMismatch {
        /// Actual on-chain owner.
        actual_owner: String,
    },
}

/// Plans a registration confirmation. Expiry is checked before the owner,
/// and an Identity is only produced when both pass.
#[must_use]
pub fn plan_registration(
    intent: &PurchaseIntent,
    check: &OwnershipCheck,
    register_tx_hash: Option<&str>,
    set_primary: bool,
    now: DateTime<Utc>,
) -> RegistrationDecision {
    match check.verdict(&intent.wallet_address, now) {
        OwnershipVerdict::NotLive => RegistrationDecision::NotLive,
        OwnershipVerdict::OwnerMismatch { actual_owner } => {
            RegistrationDecision::OwnerMismatch { actual_owner }
        }
        OwnershipVerdict::Verified { expires_at } => {
            let mut patch = IntentPatch {
                failure_reason: Some(None),
                ..IntentPatch::default()
            };
            if intent.register_tx_hash.is_none() {
                patch.register_tx_hash = register_tx_hash.map(str::to_string);
            }
            RegistrationDecision::Confirm {
                transition: Transition::to(IntentStatus::Registered).with_patch(patch),
                identity: Identity {
                    domain_name: intent.domain_name.clone(),
                    label: intent.label.clone(),
                    user_id: intent.user_id.clone(),
                    owner_address: intent.wallet_address.clone(),
                    expires_at,
                    intent_id: intent.id,
                    is_primary: set_primary,
                    created_at: now,
                    updated_at: now,
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::testing::sample_intent;

    #[test]
    fn commit_inside_min_age_lands_in_committed() {
        let intent = sample_intent();
        let observed = intent.created_at + Duration::seconds(5);
        let Ok(transition) = plan_commit(&intent, observed, Some("0xaa"), observed) else {
            panic!("plan should succeed");
        };
        assert_eq!(transition.to, IntentStatus::Committed);
        assert_eq!(transition.patch.committed_at, Some(observed));
        assert_eq!(
            transition.patch.registerable_at,
            Some(observed + Duration::seconds(intent.min_commitment_age_seconds))
        );
        assert_eq!(transition.patch.commit_tx_hash.as_deref(), Some("0xaa"));
    }

    #[test]
    fn late_observation_skips_to_registerable_or_expired() {
        let intent = sample_intent();
        let observed = intent.created_at;
        let later = observed + Duration::seconds(intent.min_commitment_age_seconds + 1);
        let Ok(transition) = plan_commit(&intent, observed, None, later) else {
            panic!("plan should succeed");
        };
        assert_eq!(transition.to, IntentStatus::Registerable);

        let way_later = observed + Duration::seconds(intent.max_commitment_age_seconds + 1);
        let Ok(transition) = plan_commit(&intent, observed, None, way_later) else {
            panic!("plan should succeed");
        };
        assert_eq!(transition.to, IntentStatus::Expired);
    }

    #[test]
    fn registration_requires_live_name_owned_by_wallet() {
        let intent = sample_intent();
        let now = intent.created_at;
        let live = Some(now + Duration::days(365));

        let mismatch = OwnershipCheck {
            expires_at: live,
            owner: Some("0x00000000000000000000000000000000000000bb".to_string()),
        };
        assert!(matches!(
            plan_registration(&intent, &mismatch, None, false, now),
            RegistrationDecision::OwnerMismatch { .. }
        ));

        let owned = OwnershipCheck {
            expires_at: live,
            owner: Some(intent.wallet_address.clone()),
        };
        let RegistrationDecision::Confirm { transition, identity } =
            plan_registration(&intent, &owned, Some("0xbb"), true, now)
        else {
            panic!("should confirm");
        };
        assert_eq!(transition.to, IntentStatus::Registered);
        assert_eq!(identity.domain_name, intent.domain_name);
        assert!(identity.is_primary);
    }

    #[test]
    fn prepared_intent_lapses_after_max_age() {
        let intent = sample_intent();
        let before = intent.created_at + Duration::seconds(intent.max_commitment_age_seconds);
        assert!(!commit_window_lapsed(&intent, before));
        assert!(commit_window_lapsed(&intent, before + Duration::seconds(1)));
    }

    #[test]
    fn register_failed_uses_default_reason_for_blank_input() {
        let transition = plan_register_failed(Some("  "));
        assert_eq!(
            transition.patch.failure_reason,
            Some(Some(REGISTER_FAILED_REASON.to_string()))
        );
    }
}
