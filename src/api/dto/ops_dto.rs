//! Request and response bodies for `/internal`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{AuditEvent, AuditOutcome, AuditQuery, BulkOutcome, QueueFilter, QueueStatus};
use crate::service::ops_service::MAX_BATCH_LIMIT;

/// Default page for audit listings and bulk actions.
const DEFAULT_LIMIT: u32 = 100;

/// Optional operator note.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReasonRequest {
    /// Free-form reason recorded with the action.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of `POST /internal/reconcile`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    /// Batch size for each sweep.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Only intents untouched for this long are reconciled.
    #[serde(default)]
    pub stale_minutes: Option<i64>,
    /// Report would-be changes without writing.
    #[serde(default)]
    pub dry_run: bool,
}

/// Filter body for the bulk queue actions.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueBulkRequest {
    /// Maximum entries affected.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Statuses to match.
    #[serde(default)]
    pub statuses: Option<Vec<QueueStatus>>,
    /// Restrict to one target type.
    #[serde(default)]
    pub target_type: Option<String>,
    /// Restrict to these target ids.
    #[serde(default)]
    pub target_ids: Option<Vec<String>>,
    /// Preview only.
    #[serde(default)]
    pub dry_run: bool,
}

impl QueueBulkRequest {
    /// Builds the store filter; `default_statuses` applies when none are given.
    #[must_use]
    pub fn to_filter(&self, default_statuses: &[QueueStatus]) -> QueueFilter {
        QueueFilter {
            statuses: self
                .statuses
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default_statuses.to_vec()),
            target_type: self.target_type.clone(),
            target_ids: self.target_ids.clone().unwrap_or_default(),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_BATCH_LIMIT),
        }
    }
}

/// Response of `POST /internal/queue/cancel`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueCancelResponse {
    /// Entries matching the filter.
    pub selected: u64,
    /// Entries deleted.
    pub cancelled: u64,
    /// Entries a real run would delete.
    pub would_cancel: u64,
    /// Whether this was a preview.
    pub dry_run: bool,
}

impl From<BulkOutcome> for QueueCancelResponse {
    fn from(outcome: BulkOutcome) -> Self {
        Self {
            selected: outcome.selected,
            cancelled: outcome.affected,
            would_cancel: if outcome.dry_run { outcome.selected } else { 0 },
            dry_run: outcome.dry_run,
        }
    }
}

/// Response of `POST /internal/queue/requeue-dead-letter`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueRequeueResponse {
    /// Entries matching the filter.
    pub selected: u64,
    /// Entries moved back to pending.
    pub requeued: u64,
    /// Entries a real run would requeue.
    pub would_requeue: u64,
    /// Whether this was a preview.
    pub dry_run: bool,
}

impl From<BulkOutcome> for QueueRequeueResponse {
    fn from(outcome: BulkOutcome) -> Self {
        Self {
            selected: outcome.selected,
            requeued: outcome.affected,
            would_requeue: if outcome.dry_run { outcome.selected } else { 0 },
            dry_run: outcome.dry_run,
        }
    }
}

/// Body of `POST /internal/queue/pause`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PauseQueueRequest {
    /// `true` pauses, `false` resumes.
    pub paused: bool,
    /// Operator note.
    #[serde(default)]
    pub reason: Option<String>,
    /// Who is pausing; defaults to the authenticated actor.
    #[serde(default)]
    pub paused_by: Option<String>,
}

/// Query of `GET /internal/audit`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct AuditParams {
    /// Maximum rows (default 100).
    pub limit: Option<u32>,
    /// `completed` or `failed`.
    pub outcome: Option<AuditOutcome>,
    /// Only this actor.
    pub actor: Option<String>,
    /// Inclusive lower bound.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub created_before: Option<DateTime<Utc>>,
}

impl From<AuditParams> for AuditQuery {
    fn from(params: AuditParams) -> Self {
        Self {
            limit: params.limit.unwrap_or(DEFAULT_LIMIT),
            outcome: params.outcome,
            actor: params.actor,
            created_after: params.created_after,
            created_before: params.created_before,
        }
    }
}

/// Response of `GET /internal/audit`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditListResponse {
    /// Newest first.
    pub data: Vec<AuditEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_request_defaults_statuses_and_clamps_limit() {
        let req = QueueBulkRequest {
            limit: Some(10_000),
            ..QueueBulkRequest::default()
        };
        let filter = req.to_filter(&[QueueStatus::DeadLetter]);
        assert_eq!(filter.statuses, vec![QueueStatus::DeadLetter]);
        assert_eq!(filter.limit, MAX_BATCH_LIMIT);
    }

    #[test]
    fn dry_run_reports_would_cancel() {
        let response = QueueCancelResponse::from(BulkOutcome {
            selected: 4,
            affected: 0,
            dry_run: true,
        });
        assert_eq!((response.cancelled, response.would_cancel), (0, 4));
    }
}
