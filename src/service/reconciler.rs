//! Chain sweeps: the tx watcher and the stale-intent reconciler.
//!
//! Both walk a bounded batch sequentially. A failure on one intent is
//! recorded in the summary and the sweep moves on; every write is a
//! guarded transition, so a sweep racing a webhook simply loses.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use super::intent_service::{CommitSource, IntentService, RegistrationSync};
use crate::domain::lifecycle::{
    commit_window_lapsed, plan_commit_never_observed, plan_expiry, plan_promotion,
};
use crate::domain::{
    Clock, IntentStatus, PurchaseIntent, RegistrationDecision, SweepSummary, Transition,
};
use crate::error::GatewayError;
use crate::persistence::Store;

/// Cooldown key guarding operator retries of one intent.
#[must_use]
pub fn retry_operation(intent: &PurchaseIntent) -> String {
    format!("intent.retry:{}", intent.id)
}

/// Runs the two sweeps.
#[derive(Debug)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    intents: Arc<IntentService>,
    clock: Arc<dyn Clock>,
    retry_cooldown: Duration,
}

impl Reconciler {
    /// Creates a new `Reconciler`. Intents it expires cannot be retried by
    /// an operator for `retry_cooldown_secs`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        intents: Arc<IntentService>,
        clock: Arc<dyn Clock>,
        retry_cooldown_secs: u64,
    ) -> Self {
        Self {
            store,
            intents,
            clock,
            retry_cooldown: Duration::seconds(i64::try_from(retry_cooldown_secs).unwrap_or(0)),
        }
    }

    /// Tx watcher: confirms registrations and commits for pending intents,
    /// oldest update first.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] only if the batch cannot
    /// be loaded.
    pub async fn run_tx_watcher(
        &self,
        limit: u32,
        dry_run: bool,
    ) -> Result<SweepSummary, GatewayError> {
        let mut summary = SweepSummary::start(self.clock.now(), dry_run);
        let batch = self.store.list_pending(None, limit).await?;

        for intent in &batch {
            summary.scanned += 1;
            if let Err(e) = self.watch_one(intent, dry_run, &mut summary).await {
                warn!(intent_id = %intent.id, error = %e, "Tx watcher failed for intent");
                summary.record_error(intent.id, e.error_code().to_string(), e.to_string());
            }
        }

        let summary = summary.finish(self.clock.now());
        info!(
            scanned = summary.scanned,
            synced_commitments = summary.synced_commitments,
            synced_registrations = summary.synced_registrations,
            expired = summary.expired,
            failed = summary.failed,
            dry_run,
            "Tx watcher sweep finished"
        );
        Ok(summary)
    }

    async fn watch_one(
        &self,
        intent: &PurchaseIntent,
        dry_run: bool,
        summary: &mut SweepSummary,
    ) -> Result<(), GatewayError> {
        if intent.register_tx_hash.is_some() {
            summary.checked_register_tx += 1;
            match self.intents.check_registration(intent, None, false).await? {
                RegistrationDecision::Confirm {
                    transition,
                    identity,
                } => {
                    if dry_run {
                        preview(intent, &transition, summary);
                    } else {
                        match self
                            .intents
                            .confirm_registration(intent, &transition, identity)
                            .await?
                        {
                            RegistrationSync::Confirmed { applied: true, .. } => {
                                summary.synced_registrations += 1;
                                summary.record_change(
                                    intent.id,
                                    intent.status,
                                    IntentStatus::Registered,
                                );
                            }
                            _ => summary.unchanged += 1,
                        }
                    }
                    return Ok(());
                }
                RegistrationDecision::OwnerMismatch { actual_owner } => {
                    warn!(
                        intent_id = %intent.id,
                        domain = %intent.domain_name,
                        wallet = %intent.wallet_address,
                        %actual_owner,
                        "Registered name is owned by another wallet"
                    );
                    summary.push_error(
                        intent.id,
                        "owner_mismatch",
                        format!("{} is owned by {actual_owner}", intent.domain_name),
                    );
                    summary.unchanged += 1;
                    return Ok(());
                }
                RegistrationDecision::NotLive => {
                    debug!(intent_id = %intent.id, "Registration not visible on-chain yet");
                }
            }
        }

        if intent.commit_tx_hash.is_some() {
            summary.checked_commit_tx += 1;
        }
        match self
            .intents
            .observe_commit(intent, None, CommitSource::Sweep)
            .await?
        {
            Some(transition) => self.settle(intent, &transition, dry_run, summary).await,
            None => {
                summary.unchanged += 1;
                Ok(())
            }
        }
    }

    /// Stale-intent reconciler: expires pending intents past their deadline
    /// and prepared intents whose commit never appeared.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] only if the batch cannot
    /// be loaded.
    pub async fn run_stale_reconciler(
        &self,
        limit: u32,
        stale_minutes: i64,
        dry_run: bool,
    ) -> Result<SweepSummary, GatewayError> {
        let now = self.clock.now();
        let mut summary = SweepSummary::start(now, dry_run);
        let cutoff = now - Duration::minutes(stale_minutes.max(0));
        let batch = self.store.list_pending(Some(cutoff), limit).await?;

        for intent in &batch {
            summary.scanned += 1;
            if let Err(e) = self.reconcile_one(intent, dry_run, &mut summary).await {
                warn!(intent_id = %intent.id, error = %e, "Reconciler failed for intent");
                summary.record_error(intent.id, e.error_code().to_string(), e.to_string());
            }
        }

        let summary = summary.finish(self.clock.now());
        info!(
            scanned = summary.scanned,
            expired = summary.expired,
            synced_commitments = summary.synced_commitments,
            unchanged = summary.unchanged,
            failed = summary.failed,
            dry_run,
            "Stale reconciler sweep finished"
        );
        Ok(summary)
    }

    async fn reconcile_one(
        &self,
        intent: &PurchaseIntent,
        dry_run: bool,
        summary: &mut SweepSummary,
    ) -> Result<(), GatewayError> {
        let now = self.clock.now();
        if let Some(transition) = plan_expiry(intent, now) {
            return self.settle(intent, &transition, dry_run, summary).await;
        }
        if commit_window_lapsed(intent, now) {
            summary.checked_commit_tx += 1;
            let transition = match self
                .intents
                .observe_commit(intent, None, CommitSource::Sweep)
                .await?
            {
                Some(transition) => transition,
                None => plan_commit_never_observed(),
            };
            return self.settle(intent, &transition, dry_run, summary).await;
        }
        match plan_promotion(intent, now) {
            Some(transition) => self.settle(intent, &transition, dry_run, summary).await,
            None => {
                summary.unchanged += 1;
                Ok(())
            }
        }
    }

    /// Applies (or on dry run previews) one transition and updates counters.
    async fn settle(
        &self,
        intent: &PurchaseIntent,
        transition: &Transition,
        dry_run: bool,
        summary: &mut SweepSummary,
    ) -> Result<(), GatewayError> {
        if dry_run {
            preview(intent, transition, summary);
            return Ok(());
        }
        let outcome = self.intents.apply(intent.id, transition).await?;
        if !outcome.is_applied() {
            summary.unchanged += 1;
            return Ok(());
        }
        count(intent.status, transition.to, summary);
        summary.record_change(intent.id, intent.status, transition.to);
        if transition.to == IntentStatus::Expired {
            self.arm_retry_cooldown(intent).await;
        }
        Ok(())
    }

    /// Blocks an immediate operator retry of an intent that was just
    /// expired, whether by a sweep or by hand.
    pub async fn arm_retry_cooldown(&self, intent: &PurchaseIntent) {
        if self.retry_cooldown <= Duration::zero() {
            return;
        }
        match self
            .store
            .claim_cooldown(&retry_operation(intent), self.retry_cooldown, self.clock.now())
            .await
        {
            Ok(()) | Err(GatewayError::RateLimited { .. }) => {}
            Err(e) => warn!(intent_id = %intent.id, error = %e, "Failed to arm retry cooldown"),
        }
    }
}

fn preview(intent: &PurchaseIntent, transition: &Transition, summary: &mut SweepSummary) {
    if transition.guard_statuses().contains(&intent.status) {
        count(intent.status, transition.to, summary);
        summary.record_change(intent.id, intent.status, transition.to);
    } else {
        summary.unchanged += 1;
    }
}

fn count(from: IntentStatus, to: IntentStatus, summary: &mut SweepSummary) {
    match to {
        IntentStatus::Expired => summary.expired += 1,
        IntentStatus::Registered => summary.synced_registrations += 1,
        IntentStatus::Committed | IntentStatus::Registerable if from == IntentStatus::Prepared => {
            summary.synced_commitments += 1;
        }
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::lifecycle::COMMIT_NEVER_OBSERVED_REASON;
    use crate::persistence::IntentStore;
    use crate::service::OpsContext;
    use crate::testing::{Harness, sample_epoch, sample_intent};

    fn epoch_secs() -> u64 {
        u64::try_from(sample_epoch().timestamp()).unwrap_or(0)
    }

    fn ops_ctx() -> OpsContext {
        OpsContext {
            actor: "tester".to_string(),
            method: "POST".to_string(),
            path: "/internal/intents/retry".to_string(),
        }
    }

    #[tokio::test]
    async fn watcher_dry_run_reports_without_writing() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        harness
            .chain
            .set_commitment(&intent.commitment, epoch_secs() + 10);
        harness.clock.advance(Duration::seconds(20));

        let Ok(preview) = harness.state.reconciler.run_tx_watcher(10, true).await else {
            panic!("dry run failed");
        };
        assert!(preview.dry_run);
        assert_eq!(preview.synced_commitments, 1);
        assert_eq!(preview.changes.len(), 1);
        let Ok(untouched) = harness.state.intents.get_intent(intent.id).await else {
            panic!("intent vanished");
        };
        assert_eq!(untouched, intent);

        let Ok(real) = harness.state.reconciler.run_tx_watcher(10, false).await else {
            panic!("sweep failed");
        };
        assert_eq!(real.synced_commitments, 1);
        let Ok(committed) = harness.state.intents.get_intent(intent.id).await else {
            panic!("intent vanished");
        };
        assert_eq!(committed.status, IntentStatus::Committed);
        assert_eq!(
            committed.committed_at,
            Some(sample_epoch() + Duration::seconds(10))
        );
    }

    #[tokio::test]
    async fn zero_commitment_timestamp_leaves_intent_untouched() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        let Ok(summary) = harness.state.reconciler.run_tx_watcher(10, false).await else {
            panic!("sweep failed");
        };
        assert_eq!((summary.scanned, summary.unchanged), (1, 1));
        assert!(summary.errors.is_empty());
        let Ok(stored) = harness.state.intents.get_intent(intent.id).await else {
            panic!("intent vanished");
        };
        assert_eq!(stored.status, IntentStatus::Prepared);
    }

    #[tokio::test]
    async fn owner_mismatch_is_reported_not_recorded() {
        let harness = Harness::new();
        let mut intent = sample_intent();
        intent.register_tx_hash = Some(format!("0x{}", "ee".repeat(32)));
        let Ok(intent) = harness.store.create_intent(intent).await else {
            panic!("seed failed");
        };
        harness.chain.register_name(
            "alice",
            "0x00000000000000000000000000000000000000bb",
            epoch_secs() + 31_536_000,
        );

        let Ok(summary) = harness.state.reconciler.run_tx_watcher(10, false).await else {
            panic!("sweep failed");
        };
        assert_eq!(summary.checked_register_tx, 1);
        assert_eq!(summary.synced_registrations, 0);
        assert!(summary.errors.iter().any(|e| e.code == "owner_mismatch"));
        assert!(harness.state.intents.get_identity("alice.eth").await.is_err());
        let Ok(stored) = harness.state.intents.get_intent(intent.id).await else {
            panic!("intent vanished");
        };
        assert_eq!(stored.status, IntentStatus::Prepared);
    }

    #[tokio::test]
    async fn chain_failure_is_collected_per_intent() {
        let harness = Harness::new();
        assert!(harness.seed_intent().await.is_ok());
        assert!(harness.seed_intent().await.is_ok());
        harness.chain.set_unavailable(true);

        let Ok(summary) = harness.state.reconciler.run_tx_watcher(10, false).await else {
            panic!("a chain outage must not abort the sweep");
        };
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.errors.len(), 2);
    }

    #[tokio::test]
    async fn stale_expiry_blocks_immediate_operator_retry() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        harness.clock.advance(Duration::days(2));

        let Ok(summary) = harness
            .state
            .reconciler
            .run_stale_reconciler(10, 10, false)
            .await
        else {
            panic!("sweep failed");
        };
        assert_eq!(summary.expired, 1);
        let Ok(expired) = harness.state.intents.get_intent(intent.id).await else {
            panic!("intent vanished");
        };
        assert_eq!(expired.status, IntentStatus::Expired);
        assert_eq!(
            expired.failure_reason.as_deref(),
            Some(COMMIT_NEVER_OBSERVED_REASON)
        );

        let retry = harness
            .state
            .ops
            .retry_intent(&ops_ctx(), intent.id, None)
            .await;
        assert!(matches!(retry, Err(GatewayError::RateLimited { .. })));

        harness.clock.advance(Duration::seconds(61));
        let Ok(revived) = harness
            .state
            .ops
            .retry_intent(&ops_ctx(), intent.id, None)
            .await
        else {
            panic!("retry after cooldown failed");
        };
        assert_eq!(revived.status, IntentStatus::Prepared);
        assert_eq!(revived.failure_reason, None);
    }

    #[tokio::test]
    async fn stale_dry_run_leaves_no_cooldown_behind() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        harness.clock.advance(Duration::days(2));

        let Ok(preview) = harness
            .state
            .reconciler
            .run_stale_reconciler(10, 10, true)
            .await
        else {
            panic!("dry run failed");
        };
        assert_eq!(preview.expired, 1);
        let Ok(stored) = harness.state.intents.get_intent(intent.id).await else {
            panic!("intent vanished");
        };
        assert_eq!(stored.status, IntentStatus::Prepared);
    }
}
