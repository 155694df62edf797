//! Internal operations: cooldown-gated, audited administrative actions.

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use utoipa::ToSchema;

use super::reconciler::{Reconciler, retry_operation};
use super::{IntentService, QueueStatusReport, RetryQueue};
use crate::config::{OpsConfig, SweepConfig};
use crate::domain::{
    AuditEvent, AuditQuery, BulkOutcome, Clock, IntentId, IntentPatch, IntentStatus,
    NewAuditEvent, PurchaseIntent, QueueControl, QueueFilter, SweepSummary, Transition,
};
use crate::error::GatewayError;
use crate::persistence::Store;

/// Upper bound for `limit` on sweeps and bulk queue actions.
pub const MAX_BATCH_LIMIT: u32 = 500;

/// Who performed an action and through which request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpsContext {
    /// Caller label.
    pub actor: String,
    /// HTTP method.
    pub method: String,
    /// HTTP path.
    pub path: String,
}

/// Options for a manual reconcile run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Batch size for both sweeps.
    pub limit: Option<u32>,
    /// Staleness threshold for the reconciler.
    pub stale_minutes: Option<i64>,
    /// Preview only.
    pub dry_run: bool,
}

/// Both sweep summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Tx watcher summary.
    pub watcher: SweepSummary,
    /// Stale reconciler summary.
    pub reconciler: SweepSummary,
}

/// Administrative actions behind the internal API.
#[derive(Debug)]
pub struct OpsService {
    store: Arc<dyn Store>,
    intents: Arc<IntentService>,
    reconciler: Arc<Reconciler>,
    search_queue: Arc<RetryQueue>,
    clock: Arc<dyn Clock>,
    config: OpsConfig,
    sweeps: SweepConfig,
}

impl OpsService {
    /// Creates a new `OpsService`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        intents: Arc<IntentService>,
        reconciler: Arc<Reconciler>,
        search_queue: Arc<RetryQueue>,
        clock: Arc<dyn Clock>,
        config: OpsConfig,
        sweeps: SweepConfig,
    ) -> Self {
        Self {
            store,
            intents,
            reconciler,
            search_queue,
            clock,
            config,
            sweeps,
        }
    }

    /// Moves an expired or failed intent back to `committed` (a commit was
    /// observed) or `prepared`, clearing the failure reason.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] inside the cooldown,
    /// [`GatewayError::IntentNotFound`] and
    /// [`GatewayError::InvalidTransition`] unless expired or failed.
    pub async fn retry_intent(
        &self,
        ctx: &OpsContext,
        id: IntentId,
        reason: Option<String>,
    ) -> Result<PurchaseIntent, GatewayError> {
        let payload = json!({ "intentId": id, "reason": reason });
        self.audited(ctx, "intent.retry", payload, async {
            let intent = self.intents.get_intent(id).await?;
            if !matches!(intent.status, IntentStatus::Expired | IntentStatus::Failed) {
                return Err(GatewayError::InvalidTransition {
                    intent_id: *intent.id.as_uuid(),
                    status: intent.status,
                    target: if intent.has_commit() {
                        IntentStatus::Committed
                    } else {
                        IntentStatus::Prepared
                    },
                });
            }
            self.claim(&retry_operation(&intent), self.config.intent_retry_cooldown_secs)
                .await?;
            let target = if intent.has_commit() {
                IntentStatus::Committed
            } else {
                IntentStatus::Prepared
            };
            let transition =
                Transition::admin_override(target, &[IntentStatus::Expired, IntentStatus::Failed])
                    .with_patch(IntentPatch {
                        failure_reason: Some(None),
                        ..IntentPatch::default()
                    });
            self.expect_applied(&intent, &transition).await
        })
        .await
    }

    /// Expires a pending intent by hand. Like a sweep expiry, this arms the
    /// retry cooldown for the intent.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] inside the cooldown,
    /// [`GatewayError::IntentNotFound`] and
    /// [`GatewayError::InvalidTransition`] for terminal intents.
    pub async fn expire_intent(
        &self,
        ctx: &OpsContext,
        id: IntentId,
        reason: Option<String>,
    ) -> Result<PurchaseIntent, GatewayError> {
        let payload = json!({ "intentId": id, "reason": reason });
        self.audited(ctx, "intent.expire", payload, async {
            let intent = self.intents.get_intent(id).await?;
            self.claim(
                &format!("intent.expire:{id}"),
                self.config.intent_expire_cooldown_secs,
            )
            .await?;
            let reason = reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| format!("expired by operator {}", ctx.actor));
            let transition = Transition::to(IntentStatus::Expired).with_patch(IntentPatch {
                failure_reason: Some(Some(reason)),
                ..IntentPatch::default()
            });
            let expired = self.expect_applied(&intent, &transition).await?;
            self.reconciler.arm_retry_cooldown(&expired).await;
            Ok(expired)
        })
        .await
    }

    /// Runs the tx watcher and the stale reconciler once. Dry runs skip the
    /// cooldown.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] inside the cooldown, or a batch load
    /// failure.
    pub async fn reconcile(
        &self,
        ctx: &OpsContext,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport, GatewayError> {
        let payload = json!({
            "limit": options.limit,
            "staleMinutes": options.stale_minutes,
            "dryRun": options.dry_run,
        });
        self.audited(ctx, "reconcile", payload, async {
            if !options.dry_run {
                self.claim("reconcile", self.config.reconcile_cooldown_secs).await?;
            }
            let watcher_limit = clamp_limit(options.limit, self.sweeps.watcher_batch_size);
            let reconciler_limit = clamp_limit(options.limit, self.sweeps.reconciler_batch_size);
            let stale_minutes = options
                .stale_minutes
                .unwrap_or(self.sweeps.reconciler_stale_minutes);
            let watcher = self
                .reconciler
                .run_tx_watcher(watcher_limit, options.dry_run)
                .await?;
            let reconciler = self
                .reconciler
                .run_stale_reconciler(reconciler_limit, stale_minutes, options.dry_run)
                .await?;
            Ok(ReconcileReport {
                watcher,
                reconciler,
            })
        })
        .await
    }

    /// Bulk-deletes search-sync entries.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] inside the cooldown (real runs only).
    pub async fn cancel_queue(
        &self,
        ctx: &OpsContext,
        filter: QueueFilter,
        dry_run: bool,
    ) -> Result<BulkOutcome, GatewayError> {
        let payload = filter_payload(&filter, dry_run);
        self.audited(ctx, "queue.cancel", payload, async {
            if !dry_run {
                self.claim("queue.cancel", self.config.queue_bulk_cooldown_secs)
                    .await?;
            }
            self.search_queue.cancel(&filter, dry_run).await
        })
        .await
    }

    /// Bulk-requeues dead-lettered search-sync entries.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] inside the cooldown (real runs only).
    pub async fn requeue_queue(
        &self,
        ctx: &OpsContext,
        filter: QueueFilter,
        dry_run: bool,
    ) -> Result<BulkOutcome, GatewayError> {
        let payload = filter_payload(&filter, dry_run);
        self.audited(ctx, "queue.requeue", payload, async {
            if !dry_run {
                self.claim("queue.requeue", self.config.queue_bulk_cooldown_secs)
                    .await?;
            }
            self.search_queue.requeue_dead_letter(&filter, dry_run).await
        })
        .await
    }

    /// Pauses or resumes the search-sync queue.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn pause_queue(
        &self,
        ctx: &OpsContext,
        paused: bool,
        reason: Option<String>,
        paused_by: Option<String>,
    ) -> Result<QueueControl, GatewayError> {
        let payload = json!({ "paused": paused, "reason": reason, "pausedBy": paused_by });
        let actor = paused_by.unwrap_or_else(|| ctx.actor.clone());
        self.audited(ctx, "queue.pause", payload, async {
            self.search_queue.set_paused(paused, reason, &actor).await
        })
        .await
    }

    /// Pause flag and counts of the search-sync queue.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn queue_status(&self) -> Result<QueueStatusReport, GatewayError> {
        self.search_queue.status().await
    }

    /// Newest-first audit listing.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, GatewayError> {
        let query = AuditQuery {
            limit: query.limit.clamp(1, MAX_BATCH_LIMIT),
            ..query.clone()
        };
        self.store.list_audit(&query).await
    }

    /// Retention sweep; `0` days keeps everything.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn purge_audit(&self, retention_days: u64) -> Result<u64, GatewayError> {
        if retention_days == 0 {
            return Ok(0);
        }
        let days = i64::try_from(retention_days).unwrap_or(i64::MAX / 86_400);
        let cutoff = self.clock.now() - Duration::days(days);
        let purged = self.store.purge_audit_before(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "Audit retention sweep");
        }
        Ok(purged)
    }

    async fn claim(&self, operation: &str, cooldown_secs: u64) -> Result<(), GatewayError> {
        let cooldown = Duration::seconds(i64::try_from(cooldown_secs).unwrap_or(i64::MAX / 1000));
        self.store
            .claim_cooldown(operation, cooldown, self.clock.now())
            .await
    }

    async fn expect_applied(
        &self,
        intent: &PurchaseIntent,
        transition: &Transition,
    ) -> Result<PurchaseIntent, GatewayError> {
        let outcome = self.intents.apply(intent.id, transition).await?;
        if outcome.is_applied() {
            return Ok(outcome.into_intent());
        }
        let current = outcome.into_intent();
        Err(GatewayError::InvalidTransition {
            intent_id: *current.id.as_uuid(),
            status: current.status,
            target: transition.to,
        })
    }

    /// Runs `action` and appends an audit record of its outcome. A failed
    /// audit write is logged and the action's result is returned anyway.
    async fn audited<T, F>(
        &self,
        ctx: &OpsContext,
        operation: &str,
        payload: serde_json::Value,
        action: F,
    ) -> Result<T, GatewayError>
    where
        T: Serialize,
        F: Future<Output = Result<T, GatewayError>>,
    {
        let result = action.await;
        let outcome = match &result {
            Ok(value) => Ok(serde_json::to_value(value).unwrap_or(serde_json::Value::Null)),
            Err(e) => Err((e.error_code(), e.to_string())),
        };
        let event = NewAuditEvent {
            operation: operation.to_string(),
            actor: ctx.actor.clone(),
            request_method: ctx.method.clone(),
            request_path: ctx.path.clone(),
            payload,
            outcome,
        }
        .into_event(self.clock.now());
        if let Err(e) = self.store.append_audit(event).await {
            error!(operation, actor = %ctx.actor, error = %e, "Failed to write audit event");
        }
        match &result {
            Ok(_) => info!(operation, actor = %ctx.actor, "Ops action completed"),
            Err(e) => info!(operation, actor = %ctx.actor, error = %e, "Ops action failed"),
        }
        result
    }
}

fn clamp_limit(requested: Option<u32>, default: u32) -> u32 {
    requested.unwrap_or(default).clamp(1, MAX_BATCH_LIMIT)
}

fn filter_payload(filter: &QueueFilter, dry_run: bool) -> serde_json::Value {
    json!({
        "statuses": filter.statuses,
        "targetType": filter.target_type,
        "targetIds": filter.target_ids,
        "limit": filter.limit,
        "dryRun": dry_run,
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::{AuditOutcome, QueueStatus};
    use crate::error::GatewayError;
    use crate::persistence::IntentStore;
    use crate::testing::{Harness, sample_intent};

    fn ctx(path: &str) -> OpsContext {
        OpsContext {
            actor: "ops-bot".to_string(),
            method: "POST".to_string(),
            path: path.to_string(),
        }
    }

    fn pending_filter() -> QueueFilter {
        QueueFilter {
            statuses: vec![QueueStatus::Pending],
            target_type: None,
            target_ids: Vec::new(),
            limit: 10,
        }
    }

    #[tokio::test]
    async fn manual_expire_then_retry_round_trip() {
        let harness = Harness::new();
        let ops = &harness.state.ops;
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };

        let Ok(expired) = ops.expire_intent(&ctx("/expire"), intent.id, None).await else {
            panic!("expire failed");
        };
        assert_eq!(expired.status, IntentStatus::Expired);
        assert_eq!(
            expired.failure_reason.as_deref(),
            Some("expired by operator ops-bot")
        );

        let Err(GatewayError::RateLimited { retry_after_ms }) =
            ops.retry_intent(&ctx("/retry"), intent.id, None).await
        else {
            panic!("retry right after a manual expiry must hit the cooldown");
        };
        assert_eq!(retry_after_ms, 60_000);

        harness.clock.advance(chrono::Duration::seconds(60));
        let Ok(revived) = ops
            .retry_intent(&ctx("/retry"), intent.id, Some("user paid gas twice".to_string()))
            .await
        else {
            panic!("retry failed");
        };
        assert_eq!(revived.status, IntentStatus::Prepared);
        assert_eq!(revived.failure_reason, None);
    }

    #[tokio::test]
    async fn concurrent_retries_let_exactly_one_through() {
        let harness = Harness::new();
        let ops = &harness.state.ops;
        let mut intent = sample_intent();
        intent.status = IntentStatus::Expired;
        let Ok(intent) = harness.store.create_intent(intent).await else {
            panic!("seed failed");
        };

        let ctx_a = ctx("/retry");
        let ctx_b = ctx("/retry");
        let (a, b) = tokio::join!(
            ops.retry_intent(&ctx_a, intent.id, None),
            ops.retry_intent(&ctx_b, intent.id, None),
        );
        let results = [a, b];
        let won = results.iter().filter(|r| r.is_ok()).count();
        let throttled = results
            .iter()
            .filter(|r| matches!(r, Err(GatewayError::RateLimited { .. })))
            .count();
        assert_eq!((won, throttled), (1, 1));
        let Ok(current) = harness.state.intents.get_intent(intent.id).await else {
            panic!("intent vanished");
        };
        assert_eq!(current.status, IntentStatus::Prepared);
    }

    #[tokio::test]
    async fn retry_of_pending_intent_is_a_conflict_and_audited() {
        let harness = Harness::new();
        let ops = &harness.state.ops;
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };

        let result = ops.retry_intent(&ctx("/retry"), intent.id, None).await;
        assert!(matches!(result, Err(GatewayError::InvalidTransition { .. })));

        let Ok(events) = ops.list_audit(&AuditQuery::default()).await else {
            panic!("audit listing failed");
        };
        let Some(event) = events.first() else {
            panic!("failed action was not audited");
        };
        assert_eq!(event.operation, "intent.retry");
        assert_eq!(event.outcome, AuditOutcome::Failed);
        assert_eq!(event.error_code.as_deref(), Some("2103"));
        assert_eq!(event.actor, "ops-bot");
    }

    #[tokio::test]
    async fn reconcile_dry_run_skips_the_cooldown() {
        let harness = Harness::new();
        let ops = &harness.state.ops;
        let dry = ReconcileOptions {
            dry_run: true,
            ..ReconcileOptions::default()
        };
        tokio_test::assert_ok!(ops.reconcile(&ctx("/reconcile"), dry).await);
        tokio_test::assert_ok!(ops.reconcile(&ctx("/reconcile"), dry).await);

        let real = ReconcileOptions::default();
        let report = tokio_test::assert_ok!(ops.reconcile(&ctx("/reconcile"), real).await);
        assert!(!report.watcher.dry_run);
        let again = ops.reconcile(&ctx("/reconcile"), real).await;
        let Err(GatewayError::RateLimited { retry_after_ms }) = again else {
            panic!("second real run must hit the cooldown, got {again:?}");
        };
        assert!(retry_after_ms > 0 && retry_after_ms <= 60_000);
    }

    #[tokio::test]
    async fn queue_cancel_previews_then_deletes() {
        let harness = Harness::new();
        let ops = &harness.state.ops;
        assert!(
            harness
                .state
                .search_queue
                .enqueue("identity", "alice.eth", json!({}))
                .await
                .is_ok()
        );

        let Ok(preview) = ops.cancel_queue(&ctx("/queue/cancel"), pending_filter(), true).await
        else {
            panic!("preview failed");
        };
        assert_eq!((preview.selected, preview.affected), (1, 0));

        let Ok(done) = ops.cancel_queue(&ctx("/queue/cancel"), pending_filter(), false).await else {
            panic!("cancel failed");
        };
        assert_eq!(done.affected, 1);
        let Ok(status) = ops.queue_status().await else {
            panic!("status failed");
        };
        assert_eq!(status.counts.get("pending"), Some(&0));
    }

    #[tokio::test]
    async fn pause_defers_enqueues_and_records_actor() {
        let harness = Harness::new();
        let ops = &harness.state.ops;
        let Ok(control) = ops
            .pause_queue(&ctx("/queue/pause"), true, Some("index migration".to_string()), None)
            .await
        else {
            panic!("pause failed");
        };
        assert!(control.paused);
        assert_eq!(control.paused_by.as_deref(), Some("ops-bot"));

        let Ok(outcome) = harness
            .state
            .search_queue
            .enqueue("identity", "alice.eth", json!({}))
            .await
        else {
            panic!("enqueue failed");
        };
        assert!(matches!(outcome, crate::domain::EnqueueOutcome::Deferred(_)));
    }

    #[tokio::test]
    async fn audit_purge_respects_retention() {
        let harness = Harness::new();
        let ops = &harness.state.ops;
        assert!(
            ops.pause_queue(&ctx("/queue/pause"), false, None, None)
                .await
                .is_ok()
        );
        harness.clock.advance(Duration::days(10));
        assert_eq!(ops.purge_audit(0).await.ok(), Some(0));
        assert_eq!(ops.purge_audit(30).await.ok(), Some(0));
        assert_eq!(ops.purge_audit(5).await.ok(), Some(1));
    }
}
