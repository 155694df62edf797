//! Structured summary returned by every reconciliation sweep.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::{IntentId, IntentStatus};

/// Cap on `errors` and `changes` so one bad batch cannot blow up a response.
pub const MAX_SUMMARY_ITEMS: usize = 50;

/// One per-intent failure collected during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepError {
    /// Affected intent.
    pub intent_id: IntentId,
    /// Machine-readable code (`owner_mismatch`, `2103`, …).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// One status change applied (or previewed) by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepChange {
    /// Affected intent.
    pub intent_id: IntentId,
    /// Status before.
    pub from: IntentStatus,
    /// Status after.
    pub to: IntentStatus,
}

/// Counters and bounded detail lists for one sweep run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    /// Intents loaded.
    pub scanned: u32,
    /// Intents whose commit tx was checked.
    pub checked_commit_tx: u32,
    /// Intents whose register tx was checked.
    pub checked_register_tx: u32,
    /// Commits newly recorded.
    pub synced_commitments: u32,
    /// Registrations newly confirmed.
    pub synced_registrations: u32,
    /// Intents moved to `expired`.
    pub expired: u32,
    /// Intents left as they were.
    pub unchanged: u32,
    /// Intents that raised an error.
    pub failed: u32,
    /// First [`MAX_SUMMARY_ITEMS`] errors.
    pub errors: Vec<SweepError>,
    /// First [`MAX_SUMMARY_ITEMS`] changes.
    pub changes: Vec<SweepChange>,
    /// Whether writes were suppressed.
    pub dry_run: bool,
    /// Sweep start.
    pub started_at: DateTime<Utc>,
    /// Sweep end, set after the loop.
    pub finished_at: DateTime<Utc>,
}

impl SweepSummary {
    /// Empty summary starting at `started_at`.
    #[must_use]
    pub const fn start(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            scanned: 0,
            checked_commit_tx: 0,
            checked_register_tx: 0,
            synced_commitments: 0,
            synced_registrations: 0,
            expired: 0,
            unchanged: 0,
            failed: 0,
            errors: Vec::new(),
            changes: Vec::new(),
            dry_run,
            started_at,
            finished_at: started_at,
        }
    }

    /// Records a per-intent error and counts it as failed.
    pub fn record_error(&mut self, intent_id: IntentId, code: impl Into<String>, message: impl Into<String>) {
        self.failed = self.failed.saturating_add(1);
        self.push_error(intent_id, code, message);
    }

    /// Adds to the error list without touching counters (anomalies that
    /// leave the intent unchanged).
    pub fn push_error(&mut self, intent_id: IntentId, code: impl Into<String>, message: impl Into<String>) {
        if self.errors.len() < MAX_SUMMARY_ITEMS {
            self.errors.push(SweepError {
                intent_id,
                code: code.into(),
                message: message.into(),
            });
        }
    }

    /// Records a status change.
    pub fn record_change(&mut self, intent_id: IntentId, from: IntentStatus, to: IntentStatus) {
        if self.changes.len() < MAX_SUMMARY_ITEMS {
            self.changes.push(SweepChange { intent_id, from, to });
        }
    }

    /// Stamps `finished_at`.
    #[must_use]
    pub fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_list_is_bounded() {
        let mut summary = SweepSummary::start(Utc::now(), false);
        for _ in 0..(MAX_SUMMARY_ITEMS + 10) {
            summary.record_error(IntentId::new(), "3101", "rpc down");
        }
        assert_eq!(summary.errors.len(), MAX_SUMMARY_ITEMS);
        assert_eq!(summary.failed as usize, MAX_SUMMARY_ITEMS + 10);
    }

    #[test]
    fn serializes_camel_case() {
        let summary = SweepSummary::start(Utc::now(), true);
        let json = serde_json::to_value(&summary).unwrap_or_default();
        assert_eq!(json.get("dryRun"), Some(&serde_json::Value::Bool(true)));
        assert!(json.get("checkedCommitTx").is_some());
    }
}
