//! Persistence layer: storage contracts and their implementations.
//!
//! Every collaborator the services touch is an `async_trait` contract.
//! [`postgres::PostgresStore`] is the system of record;
//! [`memory::MemoryStore`] implements the same contracts for tests and for
//! running with `PERSISTENCE_ENABLED=false`.
//!
//! Atomicity lives here, not in the services: status-guarded updates,
//! unique constraints and the cooldown upsert are each a single statement.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    AuditEvent, AuditQuery, BulkOutcome, Identity, IntentId, NewWebhookEvent, PurchaseIntent,
    QueueControl, QueueEntry, QueueFilter, QueueStatus, Reservation, Transition,
    TransitionOutcome, TxKind, WebhookEvent,
};
use crate::error::GatewayError;

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Purchase intents and their guarded transitions.
#[async_trait]
pub trait IntentStore: Send + Sync + fmt::Debug {
    /// Inserts a new intent.
    ///
    /// # Errors
    ///
    /// [`GatewayError::DuplicateCommitment`] when the commitment is taken.
    async fn create_intent(&self, intent: PurchaseIntent) -> Result<PurchaseIntent, GatewayError>;

    /// Loads an intent by id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn load_intent(&self, id: IntentId) -> Result<Option<PurchaseIntent>, GatewayError>;

    /// Loads the intent owning a commit transaction.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn load_by_commit_tx_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<PurchaseIntent>, GatewayError>;

    /// Loads the intent owning a register transaction.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn load_by_register_tx_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<PurchaseIntent>, GatewayError>;

    /// Applies `transition` if the current status is in its guard set.
    ///
    /// # Errors
    ///
    /// [`GatewayError::IntentNotFound`] for unknown ids and
    /// [`GatewayError::DuplicateTxHash`] when the patch carries a hash that
    /// another intent already owns.
    async fn transition(
        &self,
        id: IntentId,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, GatewayError>;

    /// Records a transaction hash while the intent is in one of
    /// [`TxKind::attachable_from`] and the column is empty or equal.
    ///
    /// # Errors
    ///
    /// [`GatewayError::IntentNotFound`] or [`GatewayError::DuplicateTxHash`].
    async fn attach_tx_hash(
        &self,
        id: IntentId,
        kind: TxKind,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, GatewayError>;

    /// Non-terminal intents, oldest `updated_at` first. With `updated_before`
    /// only intents untouched since then are returned.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn list_pending(
        &self,
        updated_before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<PurchaseIntent>, GatewayError>;
}

/// Registered identities.
#[async_trait]
pub trait IdentityStore: Send + Sync + fmt::Debug {
    /// Inserts or refreshes the identity keyed by `domain_name`. When
    /// `is_primary` is set, the user's other identities lose the flag.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn upsert_identity(&self, identity: Identity) -> Result<Identity, GatewayError>;

    /// Loads an identity by domain.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn load_identity(&self, domain_name: &str) -> Result<Option<Identity>, GatewayError>;
}

/// Webhook dedupe reservations.
#[async_trait]
pub trait WebhookEventStore: Send + Sync + fmt::Debug {
    /// Reserves `event` by its dedupe key.
    ///
    /// A new key is inserted as `processing`. An existing `failed` row, or a
    /// `processing` row untouched for longer than `lease`, is moved back to
    /// `processing` with `attempt_count + 1`. Anything else is a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn reserve(
        &self,
        event: NewWebhookEvent,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Reservation, GatewayError>;

    /// Stores the result and marks the event processed.
    ///
    /// # Errors
    ///
    /// [`GatewayError::EventNotFound`] for unknown ids.
    async fn mark_processed(
        &self,
        id: uuid::Uuid,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    /// Records the failure and marks the event failed.
    ///
    /// # Errors
    ///
    /// [`GatewayError::EventNotFound`] for unknown ids.
    async fn mark_failed(
        &self,
        id: uuid::Uuid,
        code: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    /// Loads an event row.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn load_event(&self, id: uuid::Uuid) -> Result<Option<WebhookEvent>, GatewayError>;
}

/// Retry / dead-letter queue rows and their pause flags.
#[async_trait]
pub trait QueueStore: Send + Sync + fmt::Debug {
    /// Inserts `entry` unless a live entry for the same target exists.
    /// Returns `None` in that case.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn insert_entry(&self, entry: QueueEntry) -> Result<Option<QueueEntry>, GatewayError>;

    /// Moves up to `limit` claimable entries to `processing`, oldest first,
    /// locking each until `now + lease`. `processing` entries whose lock
    /// has lapsed are claimable again.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn claim_batch(
        &self,
        queue_name: &str,
        limit: u32,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<QueueEntry>, GatewayError>;

    /// Deletes a finished entry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn delete_entry(&self, id: uuid::Uuid) -> Result<(), GatewayError>;

    /// Increments attempts and moves the entry to `failed`, or to
    /// `dead_letter` once `max_attempts` is reached.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure or an
    /// unknown id.
    async fn fail_entry(
        &self,
        id: uuid::Uuid,
        error: &str,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, GatewayError>;

    /// Deletes entries matching `filter` (or only counts them on dry run).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn cancel_entries(
        &self,
        queue_name: &str,
        filter: &QueueFilter,
        dry_run: bool,
    ) -> Result<BulkOutcome, GatewayError>;

    /// Resets matching `dead_letter` entries to `pending` with zero attempts.
    /// At most one entry per target is revived (the most recently updated),
    /// and targets that already have a live entry are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn requeue_dead_letter(
        &self,
        queue_name: &str,
        filter: &QueueFilter,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<BulkOutcome, GatewayError>;

    /// Entry counts per status.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn count_by_status(
        &self,
        queue_name: &str,
    ) -> Result<HashMap<QueueStatus, u64>, GatewayError>;

    /// Loads the pause flag (a never-paused queue reads as running).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn load_control(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueControl, GatewayError>;

    /// Upserts the pause flag.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn save_control(&self, control: QueueControl) -> Result<QueueControl, GatewayError>;
}

/// Durable cooldown claims.
#[async_trait]
pub trait ThrottleStore: Send + Sync + fmt::Debug {
    /// Claims `operation` for `cooldown` if its `next_allowed_at <= now`, as
    /// one atomic statement.
    ///
    /// # Errors
    ///
    /// [`GatewayError::RateLimited`] with the remaining wait otherwise.
    async fn claim_cooldown(
        &self,
        operation: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError>;
}

/// Append-only audit log.
#[async_trait]
pub trait AuditStore: Send + Sync + fmt::Debug {
    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn append_audit(&self, event: AuditEvent) -> Result<(), GatewayError>;

    /// Newest-first listing.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, GatewayError>;

    /// Retention sweep: deletes records created before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, GatewayError>;
}

/// Everything the services need from one backing store.
pub trait Store:
    IntentStore + IdentityStore + WebhookEventStore + QueueStore + ThrottleStore + AuditStore
{
}

impl<T> Store for T where
    T: IntentStore + IdentityStore + WebhookEventStore + QueueStore + ThrottleStore + AuditStore
{
}

/// Milliseconds until `next_allowed_at`, never below 1.
#[must_use]
pub fn retry_after_ms(next_allowed_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((next_allowed_at - now).num_milliseconds())
        .unwrap_or(0)
        .max(1)
}
