//! Generic retry / dead-letter queue over [`QueueStore`](crate::persistence::QueueStore).
//!
//! One `RetryQueue` value is bound to one queue name and attempt ceiling.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::domain::{
    BulkOutcome, Clock, EnqueueOutcome, QueueControl, QueueEntry, QueueFilter, QueueStatus,
};
use crate::error::GatewayError;
use crate::persistence::Store;

/// Pause flag plus per-status counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusReport {
    /// Pause flag.
    pub control: QueueControl,
    /// Entry counts keyed by status name; every status is present.
    pub counts: BTreeMap<String, u64>,
}

/// Claim lease used unless [`RetryQueue::with_lease`] overrides it.
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 300;

/// A named queue with its own attempt ceiling and claim lease.
#[derive(Debug)]
pub struct RetryQueue {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    queue_name: String,
    max_attempts: i32,
    lease: Duration,
}

impl RetryQueue {
    /// Creates a handle for `queue_name`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        queue_name: &str,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            clock,
            queue_name: queue_name.to_string(),
            max_attempts: max_attempts.max(1),
            lease: lease_from_secs(DEFAULT_CLAIM_LEASE_SECS),
        }
    }

    /// Overrides how long a claimed entry stays locked.
    #[must_use]
    pub fn with_lease(mut self, lease_secs: u64) -> Self {
        self.lease = lease_from_secs(lease_secs);
        self
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.queue_name
    }

    /// Adds work for a target. A paused queue still stores the entry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn enqueue(
        &self,
        target_type: &str,
        target_id: &str,
        payload: serde_json::Value,
    ) -> Result<EnqueueOutcome, GatewayError> {
        let now = self.clock.now();
        let entry = QueueEntry::pending(&self.queue_name, target_type, target_id, payload, now);
        let Some(entry) = self.store.insert_entry(entry).await? else {
            return Ok(EnqueueOutcome::AlreadyQueued);
        };
        let control = self.store.load_control(&self.queue_name, now).await?;
        if control.paused {
            return Ok(EnqueueOutcome::Deferred(entry));
        }
        Ok(EnqueueOutcome::Enqueued(entry))
    }

    /// Claims up to `limit` pending or failed entries, plus `processing`
    /// entries whose lease lapsed; nothing while paused.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn claim_next_batch(&self, limit: u32) -> Result<Vec<QueueEntry>, GatewayError> {
        let now = self.clock.now();
        if self.store.load_control(&self.queue_name, now).await?.paused {
            return Ok(Vec::new());
        }
        self.store
            .claim_batch(&self.queue_name, limit, now, self.lease)
            .await
    }

    /// Removes a finished entry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn mark_succeeded(&self, entry: &QueueEntry) -> Result<(), GatewayError> {
        self.store.delete_entry(entry.id).await
    }

    /// Records a failure; the entry is dead-lettered at the ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn mark_failed(
        &self,
        entry: &QueueEntry,
        error: &str,
    ) -> Result<QueueEntry, GatewayError> {
        let updated = self
            .store
            .fail_entry(entry.id, error, self.max_attempts, self.clock.now())
            .await?;
        if updated.status == QueueStatus::DeadLetter {
            warn!(
                queue = %self.queue_name,
                target_id = %updated.target_id,
                attempts = updated.attempt_count,
                "Queue entry dead-lettered"
            );
        }
        Ok(updated)
    }

    /// Deletes matching entries, or only counts them on dry run.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn cancel(
        &self,
        filter: &QueueFilter,
        dry_run: bool,
    ) -> Result<BulkOutcome, GatewayError> {
        let outcome = self
            .store
            .cancel_entries(&self.queue_name, filter, dry_run)
            .await?;
        info!(
            queue = %self.queue_name,
            selected = outcome.selected,
            affected = outcome.affected,
            dry_run,
            "Queue cancel"
        );
        Ok(outcome)
    }

    /// Moves matching dead-letter entries back to pending.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn requeue_dead_letter(
        &self,
        filter: &QueueFilter,
        dry_run: bool,
    ) -> Result<BulkOutcome, GatewayError> {
        let filter = QueueFilter {
            statuses: vec![QueueStatus::DeadLetter],
            ..filter.clone()
        };
        let outcome = self
            .store
            .requeue_dead_letter(&self.queue_name, &filter, dry_run, self.clock.now())
            .await?;
        info!(
            queue = %self.queue_name,
            selected = outcome.selected,
            affected = outcome.affected,
            dry_run,
            "Queue requeue"
        );
        Ok(outcome)
    }

    /// Pauses or resumes the queue.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn set_paused(
        &self,
        paused: bool,
        reason: Option<String>,
        actor: &str,
    ) -> Result<QueueControl, GatewayError> {
        let control = QueueControl {
            queue_name: self.queue_name.clone(),
            paused,
            reason,
            paused_by: Some(actor.to_string()),
            updated_at: self.clock.now(),
        };
        let control = self.store.save_control(control).await?;
        info!(queue = %self.queue_name, paused, actor, "Queue control updated");
        Ok(control)
    }

    /// Pause flag and counts.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    pub async fn status(&self) -> Result<QueueStatusReport, GatewayError> {
        let control = self
            .store
            .load_control(&self.queue_name, self.clock.now())
            .await?;
        let raw = self.store.count_by_status(&self.queue_name).await?;
        let counts = QueueStatus::ALL
            .iter()
            .map(|status| {
                (
                    status.as_str().to_string(),
                    raw.get(status).copied().unwrap_or(0),
                )
            })
            .collect();
        Ok(QueueStatusReport { control, counts })
    }
}

fn lease_from_secs(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs.max(1)).unwrap_or(i64::MAX / 1_000))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::queue_entry::SEARCH_SYNC_QUEUE;
    use crate::domain::{ManualClock, SystemClock};
    use crate::persistence::MemoryStore;
    use crate::testing::sample_epoch;
    use serde_json::json;

    fn queue(max_attempts: i32) -> RetryQueue {
        RetryQueue::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            SEARCH_SYNC_QUEUE,
            max_attempts,
        )
    }

    fn dead_letters() -> QueueFilter {
        QueueFilter {
            statuses: vec![QueueStatus::DeadLetter],
            target_type: None,
            target_ids: Vec::new(),
            limit: 100,
        }
    }

    #[tokio::test]
    async fn one_live_entry_per_target() {
        let q = queue(3);
        let Ok(first) = q.enqueue("identity", "alice.eth", json!({})).await else {
            panic!("enqueue should succeed");
        };
        assert!(matches!(first, EnqueueOutcome::Enqueued(_)));
        let Ok(second) = q.enqueue("identity", "alice.eth", json!({})).await else {
            panic!("enqueue should succeed");
        };
        assert_eq!(second, EnqueueOutcome::AlreadyQueued);
    }

    #[tokio::test]
    async fn failures_dead_letter_at_ceiling_and_requeue_resets() {
        let q = queue(2);
        let _ = q.enqueue("identity", "alice.eth", json!({})).await;

        for expected in [QueueStatus::Failed, QueueStatus::DeadLetter] {
            let Ok(batch) = q.claim_next_batch(10).await else {
                panic!("claim should succeed");
            };
            let Some(entry) = batch.first() else {
                panic!("entry should be claimable");
            };
            let Ok(updated) = q.mark_failed(entry, "index down").await else {
                panic!("mark_failed should succeed");
            };
            assert_eq!(updated.status, expected);
        }
        let Ok(batch) = q.claim_next_batch(10).await else {
            panic!("claim should succeed");
        };
        assert!(batch.is_empty(), "dead letters are never claimed");

        let Ok(preview) = q.requeue_dead_letter(&dead_letters(), true).await else {
            panic!("dry run should succeed");
        };
        assert_eq!((preview.selected, preview.affected), (1, 0));
        let Ok(report) = q.status().await else {
            panic!("status should load");
        };
        assert_eq!(report.counts.get("dead_letter"), Some(&1));

        let Ok(done) = q.requeue_dead_letter(&dead_letters(), false).await else {
            panic!("requeue should succeed");
        };
        assert_eq!(done.affected, 1);
        let Ok(batch) = q.claim_next_batch(10).await else {
            panic!("claim should succeed");
        };
        assert_eq!(batch.first().map(|e| e.attempt_count), Some(0));
    }

    #[tokio::test]
    async fn paused_queue_defers_enqueue_and_claims_nothing() {
        let q = RetryQueue::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(sample_epoch())),
            SEARCH_SYNC_QUEUE,
            3,
        );
        let _ = q.set_paused(true, Some("index migration".to_string()), "ops").await;

        let Ok(outcome) = q.enqueue("identity", "alice.eth", json!({})).await else {
            panic!("enqueue should succeed");
        };
        assert!(matches!(outcome, EnqueueOutcome::Deferred(_)));
        let Ok(batch) = q.claim_next_batch(10).await else {
            panic!("claim should succeed");
        };
        assert!(batch.is_empty());

        let _ = q.set_paused(false, None, "ops").await;
        let Ok(batch) = q.claim_next_batch(10).await else {
            panic!("claim should succeed");
        };
        assert_eq!(batch.len(), 1);
    }

    fn manual_queue(max_attempts: i32) -> (RetryQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(sample_epoch()));
        let q = RetryQueue::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            SEARCH_SYNC_QUEUE,
            max_attempts,
        )
        .with_lease(60);
        (q, clock)
    }

    #[tokio::test]
    async fn requeue_revives_one_entry_per_target() {
        let (q, clock) = manual_queue(1);
        for error in ["first outage", "second outage"] {
            let Ok(EnqueueOutcome::Enqueued(_)) = q.enqueue("identity", "alice.eth", json!({})).await
            else {
                panic!("target has no live entry, enqueue must store");
            };
            let Ok(batch) = q.claim_next_batch(10).await else {
                panic!("claim should succeed");
            };
            let Some(entry) = batch.first() else {
                panic!("entry should be claimable");
            };
            let _ = q.mark_failed(entry, error).await;
            clock.advance(chrono::Duration::seconds(5));
        }

        let Ok(preview) = q.requeue_dead_letter(&dead_letters(), true).await else {
            panic!("dry run should succeed");
        };
        assert_eq!((preview.selected, preview.affected), (1, 0));

        let Ok(done) = q.requeue_dead_letter(&dead_letters(), false).await else {
            panic!("requeue should succeed");
        };
        assert_eq!(done.affected, 1);
        let Ok(claimed) = q.claim_next_batch(10).await else {
            panic!("claim should succeed");
        };
        assert_eq!(claimed.len(), 1);
        assert_eq!(
            claimed.first().and_then(|e| e.last_error.as_deref()),
            None,
            "requeue clears the error"
        );
        let Ok(report) = q.status().await else {
            panic!("status should load");
        };
        assert_eq!(report.counts.get("dead_letter"), Some(&1));
        assert_eq!(report.counts.get("processing"), Some(&1));

        let Ok(again) = q.requeue_dead_letter(&dead_letters(), false).await else {
            panic!("requeue should succeed");
        };
        assert_eq!(again.selected, 0, "target already live");
    }

    #[tokio::test]
    async fn abandoned_claim_is_reclaimed_after_lease() {
        let (q, clock) = manual_queue(3);
        let _ = q.enqueue("identity", "alice.eth", json!({})).await;
        let Ok(first) = q.claim_next_batch(10).await else {
            panic!("claim should succeed");
        };
        assert_eq!(first.len(), 1);

        let Ok(locked) = q.claim_next_batch(10).await else {
            panic!("claim should succeed");
        };
        assert!(locked.is_empty(), "lease still held");
        let Ok(outcome) = q.enqueue("identity", "alice.eth", json!({})).await else {
            panic!("enqueue should succeed");
        };
        assert_eq!(outcome, EnqueueOutcome::AlreadyQueued);

        clock.advance(chrono::Duration::seconds(61));
        let Ok(reclaimed) = q.claim_next_batch(10).await else {
            panic!("claim should succeed");
        };
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(
            reclaimed.first().map(|e| e.id),
            first.first().map(|e| e.id)
        );
        let Some(entry) = reclaimed.first() else {
            panic!("entry reclaimed");
        };
        assert!(q.mark_succeeded(entry).await.is_ok());
        let Ok(EnqueueOutcome::Enqueued(_)) = q.enqueue("identity", "alice.eth", json!({})).await
        else {
            panic!("settled target accepts new work");
        };
    }
}
