//! Search-index sync: the `search_sync` queue consumer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

use super::RetryQueue;
use crate::domain::{QueueEntry, QueueStatus};
use crate::error::GatewayError;

/// Downstream search index.
#[async_trait]
pub trait SearchIndexer: Send + Sync + fmt::Debug {
    /// Pushes the document carried by `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] when the index rejects or is
    /// unreachable.
    async fn index(&self, entry: &QueueEntry) -> Result<(), GatewayError>;
}

/// Posts `{targetType, targetId, document}` to one HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSearchIndexer {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexDocument<'a> {
    target_type: &'a str,
    target_id: &'a str,
    document: &'a serde_json::Value,
}

impl HttpSearchIndexer {
    /// Builds the indexer.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl SearchIndexer for HttpSearchIndexer {
    async fn index(&self, entry: &QueueEntry) -> Result<(), GatewayError> {
        let body = IndexDocument {
            target_type: &entry.target_type,
            target_id: &entry.target_id,
            document: &entry.payload,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("search index request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream(format!("search index HTTP error: {status}")));
        }
        Ok(())
    }
}

/// Counters for one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Entries claimed.
    pub claimed: u32,
    /// Entries indexed and removed.
    pub succeeded: u32,
    /// Entries left for retry.
    pub failed: u32,
    /// Entries moved to dead letter.
    pub dead_lettered: u32,
    /// Entries whose outcome could not be stored; their lease lapses and a
    /// later pass picks them up again.
    pub unsettled: u32,
}

/// Claims a batch, indexes each entry and settles it.
#[derive(Debug)]
pub struct SearchSyncWorker {
    queue: Arc<RetryQueue>,
    indexer: Arc<dyn SearchIndexer>,
    batch_size: u32,
}

impl SearchSyncWorker {
    /// Creates a new worker.
    #[must_use]
    pub fn new(queue: Arc<RetryQueue>, indexer: Arc<dyn SearchIndexer>, batch_size: u32) -> Self {
        Self {
            queue,
            indexer,
            batch_size,
        }
    }

    /// Runs one pass.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the batch cannot be
    /// claimed. Indexing errors are settled on the entry instead, and a
    /// failure to settle one entry never skips the rest of the batch.
    pub async fn run_once(&self) -> Result<SyncReport, GatewayError> {
        let batch = self.queue.claim_next_batch(self.batch_size).await?;
        let mut report = SyncReport {
            claimed: u32::try_from(batch.len()).unwrap_or(u32::MAX),
            ..SyncReport::default()
        };

        for entry in &batch {
            if let Err(e) = self.settle(entry, &mut report).await {
                report.unsettled += 1;
                error!(
                    entry_id = %entry.id,
                    target_id = %entry.target_id,
                    error = %e,
                    "Queue entry left unsettled"
                );
            }
        }
        Ok(report)
    }

    async fn settle(&self, entry: &QueueEntry, report: &mut SyncReport) -> Result<(), GatewayError> {
        match self.indexer.index(entry).await {
            Ok(()) => {
                self.queue.mark_succeeded(entry).await?;
                report.succeeded += 1;
                debug!(target_id = %entry.target_id, "Search document indexed");
            }
            Err(e) => {
                warn!(target_id = %entry.target_id, error = %e, "Search indexing failed");
                let updated = self.queue.mark_failed(entry, &e.to_string()).await?;
                if updated.status == QueueStatus::DeadLetter {
                    report.dead_lettered += 1;
                } else {
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::SystemClock;
    use crate::domain::queue_entry::SEARCH_SYNC_QUEUE;
    use crate::persistence::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct FlakyIndexer {
        down: AtomicBool,
    }

    #[async_trait]
    impl SearchIndexer for FlakyIndexer {
        async fn index(&self, _entry: &QueueEntry) -> Result<(), GatewayError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(GatewayError::Upstream("index down".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_index_dead_letters_then_recovers_after_requeue() {
        let queue = Arc::new(RetryQueue::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            SEARCH_SYNC_QUEUE,
            2,
        ));
        let indexer = Arc::new(FlakyIndexer::default());
        indexer.down.store(true, Ordering::SeqCst);
        let worker = SearchSyncWorker::new(Arc::clone(&queue), Arc::clone(&indexer) as Arc<dyn SearchIndexer>, 10);
        let _ = queue.enqueue("identity", "alice.eth", json!({"domainName": "alice.eth"})).await;

        let Ok(first) = worker.run_once().await else {
            panic!("pass should run");
        };
        assert_eq!((first.claimed, first.failed), (1, 1));
        let Ok(second) = worker.run_once().await else {
            panic!("pass should run");
        };
        assert_eq!(second.dead_lettered, 1);

        indexer.down.store(false, Ordering::SeqCst);
        let filter = crate::domain::QueueFilter {
            statuses: vec![QueueStatus::DeadLetter],
            target_type: None,
            target_ids: Vec::new(),
            limit: 10,
        };
        let _ = queue.requeue_dead_letter(&filter, false).await;
        let Ok(third) = worker.run_once().await else {
            panic!("pass should run");
        };
        assert_eq!(third.succeeded, 1);
    }

    /// Cancels the entry it is asked to index, so settling it fails.
    #[derive(Debug)]
    struct CancellingIndexer {
        queue: Arc<RetryQueue>,
        victim: &'static str,
    }

    #[async_trait]
    impl SearchIndexer for CancellingIndexer {
        async fn index(&self, entry: &QueueEntry) -> Result<(), GatewayError> {
            if entry.target_id == self.victim {
                let filter = crate::domain::QueueFilter {
                    statuses: vec![QueueStatus::Processing],
                    target_type: None,
                    target_ids: vec![self.victim.to_string()],
                    limit: 1,
                };
                let _ = self.queue.cancel(&filter, false).await;
            }
            Err(GatewayError::Upstream("index down".to_string()))
        }
    }

    #[tokio::test]
    async fn settle_failure_does_not_strand_the_rest_of_the_batch() {
        let queue = Arc::new(RetryQueue::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            SEARCH_SYNC_QUEUE,
            3,
        ));
        let indexer = Arc::new(CancellingIndexer {
            queue: Arc::clone(&queue),
            victim: "alice.eth",
        });
        let worker = SearchSyncWorker::new(Arc::clone(&queue), indexer, 10);
        let _ = queue.enqueue("identity", "alice.eth", json!({})).await;
        let _ = queue.enqueue("identity", "bob.eth", json!({})).await;

        let Ok(report) = worker.run_once().await else {
            panic!("pass should survive a settle error");
        };
        assert_eq!((report.claimed, report.failed, report.unsettled), (2, 1, 1));
        let Ok(status) = queue.status().await else {
            panic!("status should load");
        };
        assert_eq!(status.counts.get("failed"), Some(&1));
        assert_eq!(status.counts.get("processing"), Some(&0));
    }
}
