//! Database row types and their conversion into domain types.
//!
//! Status columns are stored as text; parsing them back is the only
//! fallible step.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AuditEvent, Identity, IntentId, PurchaseIntent, QueueControl, QueueEntry, WebhookEvent,
};
use crate::error::GatewayError;

/// Column list shared by every `purchase_intents` query.
pub const INTENT_COLUMNS: &str = "id, user_id, wallet_address, label, tld, domain_name, chain_id, \
     duration_seconds, secret_hash, commitment, min_commitment_age_seconds, \
     max_commitment_age_seconds, commit_tx_hash, register_tx_hash, committed_at, \
     registerable_at, register_by, status, failure_reason, created_at, updated_at";

/// A row from `purchase_intents`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IntentRow {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Wallet address.
    pub wallet_address: String,
    /// Label.
    pub label: String,
    /// TLD.
    pub tld: String,
    /// `label.tld`.
    pub domain_name: String,
    /// Chain id.
    pub chain_id: i64,
    /// Registration duration.
    pub duration_seconds: i64,
    /// Secret hash.
    pub secret_hash: String,
    /// Commitment.
    pub commitment: String,
    /// Min commitment age.
    pub min_commitment_age_seconds: i64,
    /// Max commitment age.
    pub max_commitment_age_seconds: i64,
    /// Commit tx.
    pub commit_tx_hash: Option<String>,
    /// Register tx.
    pub register_tx_hash: Option<String>,
    /// Commit time.
    pub committed_at: Option<DateTime<Utc>>,
    /// Registerable time.
    pub registerable_at: Option<DateTime<Utc>>,
    /// Deadline.
    pub register_by: Option<DateTime<Utc>>,
    /// Status text.
    pub status: String,
    /// Failure reason.
    pub failure_reason: Option<String>,
    /// Created.
    pub created_at: DateTime<Utc>,
    /// Updated.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<IntentRow> for PurchaseIntent {
    type Error = GatewayError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: IntentId::from_uuid(row.id),
            user_id: row.user_id,
            wallet_address: row.wallet_address,
            label: row.label,
            tld: row.tld,
            domain_name: row.domain_name,
            chain_id: row.chain_id,
            duration_seconds: row.duration_seconds,
            secret_hash: row.secret_hash,
            commitment: row.commitment,
            min_commitment_age_seconds: row.min_commitment_age_seconds,
            max_commitment_age_seconds: row.max_commitment_age_seconds,
            commit_tx_hash: row.commit_tx_hash,
            register_tx_hash: row.register_tx_hash,
            committed_at: row.committed_at,
            registerable_at: row.registerable_at,
            register_by: row.register_by,
            status: row.status.parse().map_err(corrupt)?,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row from `identities`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdentityRow {
    /// Primary key.
    pub domain_name: String,
    /// Label.
    pub label: String,
    /// Owning user.
    pub user_id: String,
    /// Verified owner.
    pub owner_address: String,
    /// On-chain expiry.
    pub expires_at: DateTime<Utc>,
    /// Source intent.
    pub intent_id: Uuid,
    /// Primary flag.
    pub is_primary: bool,
    /// Created.
    pub created_at: DateTime<Utc>,
    /// Updated.
    pub updated_at: DateTime<Utc>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Self {
            domain_name: row.domain_name,
            label: row.label,
            user_id: row.user_id,
            owner_address: row.owner_address,
            expires_at: row.expires_at,
            intent_id: IntentId::from_uuid(row.intent_id),
            is_primary: row.is_primary,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A row from `webhook_events`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookEventRow {
    /// Primary key.
    pub id: Uuid,
    /// Intent.
    pub intent_id: Uuid,
    /// Event type text.
    pub event_type: String,
    /// Dedupe key.
    pub dedupe_key: String,
    /// Tx hash.
    pub tx_hash: Option<String>,
    /// Payload.
    pub payload: serde_json::Value,
    /// Status text.
    pub status: String,
    /// Attempts.
    pub attempt_count: i32,
    /// Cached result.
    pub result: Option<serde_json::Value>,
    /// Last error code.
    pub last_error_code: Option<String>,
    /// Last error message.
    pub last_error_message: Option<String>,
    /// Created.
    pub created_at: DateTime<Utc>,
    /// Updated.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<WebhookEventRow> for WebhookEvent {
    type Error = GatewayError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            intent_id: IntentId::from_uuid(row.intent_id),
            event_type: row.event_type.parse().map_err(corrupt)?,
            dedupe_key: row.dedupe_key,
            tx_hash: row.tx_hash,
            payload: row.payload,
            status: row.status.parse().map_err(corrupt)?,
            attempt_count: row.attempt_count,
            result: row.result,
            last_error_code: row.last_error_code,
            last_error_message: row.last_error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row from `queue_entries`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueEntryRow {
    /// Primary key.
    pub id: Uuid,
    /// Queue.
    pub queue_name: String,
    /// Target type.
    pub target_type: String,
    /// Target id.
    pub target_id: String,
    /// Payload.
    pub payload: serde_json::Value,
    /// Status text.
    pub status: String,
    /// Attempts.
    pub attempt_count: i32,
    /// Last error.
    pub last_error: Option<String>,
    /// Claim lease.
    pub locked_until: Option<DateTime<Utc>>,
    /// Created.
    pub created_at: DateTime<Utc>,
    /// Updated.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = GatewayError;

    fn try_from(row: QueueEntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            queue_name: row.queue_name,
            target_type: row.target_type,
            target_id: row.target_id,
            payload: row.payload,
            status: row.status.parse().map_err(corrupt)?,
            attempt_count: row.attempt_count,
            last_error: row.last_error,
            locked_until: row.locked_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row from `queue_controls`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueControlRow {
    /// Queue.
    pub queue_name: String,
    /// Pause flag.
    pub paused: bool,
    /// Reason.
    pub reason: Option<String>,
    /// Actor.
    pub paused_by: Option<String>,
    /// Updated.
    pub updated_at: DateTime<Utc>,
}

impl From<QueueControlRow> for QueueControl {
    fn from(row: QueueControlRow) -> Self {
        Self {
            queue_name: row.queue_name,
            paused: row.paused,
            reason: row.reason,
            paused_by: row.paused_by,
            updated_at: row.updated_at,
        }
    }
}

/// A row from `audit_events`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEventRow {
    /// Primary key.
    pub id: Uuid,
    /// Operation.
    pub operation: String,
    /// Outcome text.
    pub outcome: String,
    /// Actor.
    pub actor: String,
    /// Method.
    pub request_method: String,
    /// Path.
    pub request_path: String,
    /// Payload.
    pub payload: serde_json::Value,
    /// Result.
    pub result: Option<serde_json::Value>,
    /// Error code.
    pub error_code: Option<String>,
    /// Error message.
    pub error_message: Option<String>,
    /// Created.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AuditEventRow> for AuditEvent {
    type Error = GatewayError;

    fn try_from(row: AuditEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            operation: row.operation,
            outcome: row.outcome.parse().map_err(corrupt)?,
            actor: row.actor,
            request_method: row.request_method,
            request_path: row.request_path,
            payload: row.payload,
            result: row.result,
            error_code: row.error_code,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

fn corrupt(err: GatewayError) -> GatewayError {
    GatewayError::PersistenceError(format!("corrupt row: {err}"))
}
