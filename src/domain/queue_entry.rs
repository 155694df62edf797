//! Generic retry / dead-letter queue entries.
//!
//! One table backs every queue; entries are partitioned by `queue_name`.
//! The search-sync queue is the first consumer.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::GatewayError;

/// Queue that mirrors registered identities into the search index.
pub const SEARCH_SYNC_QUEUE: &str = "search_sync";

/// Status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for its first attempt.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Last attempt failed; will be claimed again.
    Failed,
    /// Exhausted its attempts; needs an operator.
    DeadLetter,
}

impl QueueStatus {
    /// Every status.
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Failed,
        Self::DeadLetter,
    ];

    /// Statuses a worker may claim outright. `processing` entries are
    /// claimable too once their lease lapses.
    pub const CLAIMABLE: [Self; 2] = [Self::Pending, Self::Failed];

    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown queue status: {s}")))
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Entry identifier.
    #[schema(value_type = String, format = Uuid)]
    pub id: uuid::Uuid,
    /// Owning queue.
    pub queue_name: String,
    /// Kind of target (`identity`, …).
    pub target_type: String,
    /// Target key within its kind.
    pub target_id: String,
    /// Work payload.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Status.
    pub status: QueueStatus,
    /// Failed attempts so far.
    pub attempt_count: i32,
    /// Last failure message.
    pub last_error: Option<String>,
    /// Claim lease; a `processing` entry past this instant is reclaimable.
    pub locked_until: Option<DateTime<Utc>>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Builds a pending entry.
    #[must_use]
    pub fn pending(
        queue_name: &str,
        target_type: &str,
        target_id: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            queue_name: queue_name.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            payload,
            status: QueueStatus::Pending,
            attempt_count: 0,
            last_error: None,
            locked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a worker may claim this entry at `now`.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            QueueStatus::Pending | QueueStatus::Failed => true,
            QueueStatus::Processing => self.locked_until.is_some_and(|until| until <= now),
            QueueStatus::DeadLetter => false,
        }
    }

    /// Status after one more failure against `max_attempts`.
    #[must_use]
    pub const fn status_after_failure(attempts: i32, max_attempts: i32) -> QueueStatus {
        if attempts >= max_attempts {
            QueueStatus::DeadLetter
        } else {
            QueueStatus::Failed
        }
    }
}

/// Selection for bulk operator actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFilter {
    /// Statuses to match.
    pub statuses: Vec<QueueStatus>,
    /// Restrict to one target type.
    pub target_type: Option<String>,
    /// Restrict to these target ids (empty = any).
    pub target_ids: Vec<String>,
    /// Upper bound on affected rows.
    pub limit: u32,
}

impl QueueFilter {
    /// Whether `entry` is selected (ignoring the limit).
    #[must_use]
    pub fn matches(&self, entry: &QueueEntry) -> bool {
        self.statuses.contains(&entry.status)
            && self
                .target_type
                .as_deref()
                .is_none_or(|t| t == entry.target_type)
            && (self.target_ids.is_empty() || self.target_ids.contains(&entry.target_id))
    }
}

/// Result of a bulk cancel / requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    /// Rows matching the filter (bounded by the limit).
    pub selected: u64,
    /// Rows actually changed (0 on dry run).
    pub affected: u64,
    /// Whether this was a preview.
    pub dry_run: bool,
}

/// Durable pause flag for one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueControl {
    /// Queue name.
    pub queue_name: String,
    /// Whether workers must stop claiming.
    pub paused: bool,
    /// Operator-supplied reason.
    pub reason: Option<String>,
    /// Who flipped the flag.
    pub paused_by: Option<String>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl QueueControl {
    /// Default state for a queue never paused.
    #[must_use]
    pub fn running(queue_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            paused: false,
            reason: None,
            paused_by: None,
            updated_at: now,
        }
    }
}

/// Outcome of an enqueue.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// New entry stored and eligible for claiming.
    Enqueued(QueueEntry),
    /// A live entry for the same target already exists.
    AlreadyQueued,
    /// Stored, but the queue is paused so nothing will claim it yet.
    Deferred(QueueEntry),
}
