//! Append-only audit trail of administrative actions.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::GatewayError;

/// How an audited action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The action succeeded.
    Completed,
    /// The action returned an error.
    Failed,
}

impl AuditOutcome {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for AuditOutcome {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(GatewayError::InvalidRequest(format!(
                "unknown audit outcome: {other}"
            ))),
        }
    }
}

/// A stored audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Row identifier.
    #[schema(value_type = String, format = Uuid)]
    pub id: uuid::Uuid,
    /// Operation key, e.g. `intent.retry`.
    pub operation: String,
    /// Outcome.
    pub outcome: AuditOutcome,
    /// Caller label (`X-Internal-Actor`, defaults to `internal`).
    pub actor: String,
    /// HTTP method.
    pub request_method: String,
    /// HTTP path.
    pub request_path: String,
    /// Request body or parameters.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Response body on success.
    #[schema(value_type = Object)]
    pub result: Option<serde_json::Value>,
    /// Error code on failure.
    pub error_code: Option<String>,
    /// Error message on failure.
    pub error_message: Option<String>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

/// Audit record before insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    /// Operation key.
    pub operation: String,
    /// Caller label.
    pub actor: String,
    /// HTTP method.
    pub request_method: String,
    /// HTTP path.
    pub request_path: String,
    /// Request body.
    pub payload: serde_json::Value,
    /// Success body or failure.
    pub outcome: Result<serde_json::Value, (u32, String)>,
}

impl NewAuditEvent {
    /// Materialises the row.
    #[must_use]
    pub fn into_event(self, now: DateTime<Utc>) -> AuditEvent {
        let (outcome, result, error_code, error_message) = match self.outcome {
            Ok(result) => (AuditOutcome::Completed, Some(result), None, None),
            Err((code, message)) => (
                AuditOutcome::Failed,
                None,
                Some(code.to_string()),
                Some(message),
            ),
        };
        AuditEvent {
            id: uuid::Uuid::new_v4(),
            operation: self.operation,
            outcome,
            actor: self.actor,
            request_method: self.request_method,
            request_path: self.request_path,
            payload: self.payload,
            result,
            error_code,
            error_message,
            created_at: now,
        }
    }
}

/// Filter for `GET /internal/audit`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    /// Maximum rows, newest first.
    pub limit: u32,
    /// Only this outcome.
    pub outcome: Option<AuditOutcome>,
    /// Only this actor.
    pub actor: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
}

impl AuditQuery {
    /// Whether `event` passes every filter.
    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.outcome.is_none_or(|o| o == event.outcome)
            && self.actor.as_deref().is_none_or(|a| a == event.actor)
            && self.created_after.is_none_or(|t| event.created_at >= t)
            && self.created_before.is_none_or(|t| event.created_at < t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_event(outcome: Result<serde_json::Value, (u32, String)>) -> NewAuditEvent {
        NewAuditEvent {
            operation: "intent.retry".to_string(),
            actor: "ops".to_string(),
            request_method: "POST".to_string(),
            request_path: "/internal/intents/x/retry".to_string(),
            payload: json!({}),
            outcome,
        }
    }

    #[test]
    fn failure_keeps_code_and_message() {
        let event = new_event(Err((429, "slow down".to_string()))).into_event(Utc::now());
        assert_eq!(event.outcome, AuditOutcome::Failed);
        assert_eq!(event.error_code.as_deref(), Some("429"));
        assert!(event.result.is_none());
    }

    #[test]
    fn query_filters_by_outcome_and_actor() {
        let event = new_event(Ok(json!({"ok": true}))).into_event(Utc::now());
        let mut query = AuditQuery {
            limit: 10,
            outcome: Some(AuditOutcome::Completed),
            actor: Some("ops".to_string()),
            ..AuditQuery::default()
        };
        assert!(query.matches(&event));
        query.actor = Some("someone-else".to_string());
        assert!(!query.matches(&event));
    }
}
