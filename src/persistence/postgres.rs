//! PostgreSQL implementation of the persistence contracts.
//!
//! Every contract method is one statement (or one short transaction) so that
//! concurrent writers are coordinated by row locks and unique constraints
//! alone.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::models::{
    AuditEventRow, INTENT_COLUMNS, IdentityRow, IntentRow, QueueControlRow, QueueEntryRow,
    WebhookEventRow,
};
use super::{
    AuditStore, IdentityStore, IntentStore, QueueStore, ThrottleStore, WebhookEventStore,
    retry_after_ms,
};
use crate::config::DatabaseConfig;
use crate::domain::{
    AuditEvent, AuditQuery, BulkOutcome, Identity, IntentId, IntentStatus, NewWebhookEvent,
    PurchaseIntent, QueueControl, QueueEntry, QueueFilter, QueueStatus, Reservation, Transition,
    TransitionOutcome, TxKind, WebhookEvent, WebhookEventStatus,
};
use crate::error::GatewayError;

const WEBHOOK_COLUMNS: &str = "id, intent_id, event_type, dedupe_key, tx_hash, payload, status, \
     attempt_count, result, last_error_code, last_error_message, created_at, updated_at";

const QUEUE_COLUMNS: &str = "id, queue_name, target_type, target_id, payload, status, \
     attempt_count, last_error, locked_until, created_at, updated_at";

const IDENTITY_COLUMNS: &str = "domain_name, label, user_id, owner_address, expires_at, \
     intent_id, is_primary, created_at, updated_at";

/// Shared `WHERE` fragment for bulk queue operations over alias `q`.
/// `$1` queue, `$2` statuses, `$3` target type, `$4` target ids; callers
/// bind the limit as `$5`.
const QUEUE_FILTER: &str = "q.queue_name = $1 AND q.status = ANY($2) \
       AND ($3::text IS NULL OR q.target_type = $3) \
       AND (cardinality($4::text[]) = 0 OR q.target_id = ANY($4))";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool with the configured limits.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError::PersistenceError`] if the database is unreachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(StdDuration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(db_error)?;
        Ok(Self { pool })
    }

    /// Applies the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError::PersistenceError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))
    }

    async fn fetch_intent(&self, id: IntentId) -> Result<Option<PurchaseIntent>, GatewayError> {
        let sql = format!("SELECT {INTENT_COLUMNS} FROM purchase_intents WHERE id = $1");
        sqlx::query_as::<_, IntentRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(PurchaseIntent::try_from)
            .transpose()
    }

    async fn fetch_intent_by(
        &self,
        kind: TxKind,
        tx_hash: &str,
    ) -> Result<Option<PurchaseIntent>, GatewayError> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM purchase_intents WHERE {} = $1",
            kind.column()
        );
        sqlx::query_as::<_, IntentRow>(&sql)
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(PurchaseIntent::try_from)
            .transpose()
    }

    /// Row still present but the guarded update matched nothing.
    async fn unchanged(&self, id: IntentId) -> Result<TransitionOutcome, GatewayError> {
        self.fetch_intent(id)
            .await?
            .map(TransitionOutcome::Unchanged)
            .ok_or(GatewayError::IntentNotFound(*id.as_uuid()))
    }

    async fn fetch_event_by_key(&self, dedupe_key: &str) -> Result<WebhookEvent, GatewayError> {
        let sql = format!("SELECT {WEBHOOK_COLUMNS} FROM webhook_events WHERE dedupe_key = $1");
        let row = sqlx::query_as::<_, WebhookEventRow>(&sql)
            .bind(dedupe_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| {
                GatewayError::PersistenceError(format!("webhook event vanished: {dedupe_key}"))
            })?;
        WebhookEvent::try_from(row)
    }
}

fn status_names(statuses: &[IntentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn queue_status_names(statuses: &[QueueStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn db_error(err: sqlx::Error) -> GatewayError {
    GatewayError::PersistenceError(err.to_string())
}

/// Maps unique violations on `purchase_intents` to their conflict codes.
fn intent_write_error(err: sqlx::Error, commitment: &str, tx_hash: Option<&str>) -> GatewayError {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        let hash = tx_hash.unwrap_or_default().to_string();
        return match db.constraint() {
            Some("purchase_intents_commitment_key") => {
                GatewayError::DuplicateCommitment(commitment.to_string())
            }
            Some("purchase_intents_commit_tx_hash_key") => GatewayError::DuplicateTxHash {
                field: TxKind::Commit.column(),
                tx_hash: hash,
            },
            Some("purchase_intents_register_tx_hash_key") => GatewayError::DuplicateTxHash {
                field: TxKind::Register.column(),
                tx_hash: hash,
            },
            other => GatewayError::PersistenceError(format!(
                "unique violation on {}",
                other.unwrap_or("unknown constraint")
            )),
        };
    }
    db_error(err)
}

#[async_trait]
impl IntentStore for PostgresStore {
    async fn create_intent(&self, intent: PurchaseIntent) -> Result<PurchaseIntent, GatewayError> {
        let sql = format!(
            "INSERT INTO purchase_intents ({INTENT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21) \
             RETURNING {INTENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, IntentRow>(&sql)
            .bind(intent.id.as_uuid())
            .bind(&intent.user_id)
            .bind(&intent.wallet_address)
            .bind(&intent.label)
            .bind(&intent.tld)
            .bind(&intent.domain_name)
            .bind(intent.chain_id)
            .bind(intent.duration_seconds)
            .bind(&intent.secret_hash)
            .bind(&intent.commitment)
            .bind(intent.min_commitment_age_seconds)
            .bind(intent.max_commitment_age_seconds)
            .bind(&intent.commit_tx_hash)
            .bind(&intent.register_tx_hash)
            .bind(intent.committed_at)
            .bind(intent.registerable_at)
            .bind(intent.register_by)
            .bind(intent.status.as_str())
            .bind(&intent.failure_reason)
            .bind(intent.created_at)
            .bind(intent.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                intent_write_error(
                    e,
                    &intent.commitment,
                    intent
                        .commit_tx_hash
                        .as_deref()
                        .or(intent.register_tx_hash.as_deref()),
                )
            })?;
        PurchaseIntent::try_from(row)
    }

    async fn load_intent(&self, id: IntentId) -> Result<Option<PurchaseIntent>, GatewayError> {
        self.fetch_intent(id).await
    }

    async fn load_by_commit_tx_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<PurchaseIntent>, GatewayError> {
        self.fetch_intent_by(TxKind::Commit, tx_hash).await
    }

    async fn load_by_register_tx_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<PurchaseIntent>, GatewayError> {
        self.fetch_intent_by(TxKind::Register, tx_hash).await
    }

    async fn transition(
        &self,
        id: IntentId,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, GatewayError> {
        let patch = &transition.patch;
        let sql = format!(
            "UPDATE purchase_intents SET \
                status = $2, \
                committed_at = COALESCE($3, committed_at), \
                registerable_at = COALESCE($4, registerable_at), \
                register_by = COALESCE($5, register_by), \
                commit_tx_hash = COALESCE($6, commit_tx_hash), \
                register_tx_hash = COALESCE($7, register_tx_hash), \
                failure_reason = CASE WHEN $8 THEN $9 ELSE failure_reason END, \
                updated_at = $10 \
             WHERE id = $1 AND status = ANY($11) \
             RETURNING {INTENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, IntentRow>(&sql)
            .bind(id.as_uuid())
            .bind(transition.to.as_str())
            .bind(patch.committed_at)
            .bind(patch.registerable_at)
            .bind(patch.register_by)
            .bind(&patch.commit_tx_hash)
            .bind(&patch.register_tx_hash)
            .bind(patch.failure_reason.is_some())
            .bind(patch.failure_reason.clone().flatten())
            .bind(now)
            .bind(status_names(&transition.guard_statuses()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                intent_write_error(
                    e,
                    "",
                    patch
                        .commit_tx_hash
                        .as_deref()
                        .or(patch.register_tx_hash.as_deref()),
                )
            })?;

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(PurchaseIntent::try_from(row)?)),
            None => self.unchanged(id).await,
        }
    }

    async fn attach_tx_hash(
        &self,
        id: IntentId,
        kind: TxKind,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, GatewayError> {
        let column = kind.column();
        let sql = format!(
            "UPDATE purchase_intents SET {column} = $2, updated_at = $3 \
             WHERE id = $1 AND status = ANY($4) AND ({column} IS NULL OR {column} = $2) \
             RETURNING {INTENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, IntentRow>(&sql)
            .bind(id.as_uuid())
            .bind(tx_hash)
            .bind(now)
            .bind(status_names(kind.attachable_from()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| intent_write_error(e, "", Some(tx_hash)))?;

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(PurchaseIntent::try_from(row)?)),
            None => self.unchanged(id).await,
        }
    }

    async fn list_pending(
        &self,
        updated_before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<PurchaseIntent>, GatewayError> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM purchase_intents \
             WHERE status = ANY($1) AND ($2::timestamptz IS NULL OR updated_at < $2) \
             ORDER BY updated_at ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, IntentRow>(&sql)
            .bind(status_names(&IntentStatus::PENDING))
            .bind(updated_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(PurchaseIntent::try_from).collect()
    }
}

#[async_trait]
impl IdentityStore for PostgresStore {
    async fn upsert_identity(&self, identity: Identity) -> Result<Identity, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        if identity.is_primary {
            sqlx::query(
                "UPDATE identities SET is_primary = FALSE, updated_at = $3 \
                 WHERE user_id = $1 AND domain_name <> $2 AND is_primary",
            )
            .bind(&identity.user_id)
            .bind(&identity.domain_name)
            .bind(identity.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        let sql = format!(
            "INSERT INTO identities ({IDENTITY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (domain_name) DO UPDATE SET \
                label = EXCLUDED.label, \
                user_id = EXCLUDED.user_id, \
                owner_address = EXCLUDED.owner_address, \
                expires_at = EXCLUDED.expires_at, \
                intent_id = EXCLUDED.intent_id, \
                is_primary = EXCLUDED.is_primary OR identities.is_primary, \
                updated_at = EXCLUDED.updated_at \
             RETURNING {IDENTITY_COLUMNS}"
        );
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(&identity.domain_name)
            .bind(&identity.label)
            .bind(&identity.user_id)
            .bind(&identity.owner_address)
            .bind(identity.expires_at)
            .bind(identity.intent_id.as_uuid())
            .bind(identity.is_primary)
            .bind(identity.created_at)
            .bind(identity.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        Ok(Identity::from(row))
    }

    async fn load_identity(&self, domain_name: &str) -> Result<Option<Identity>, GatewayError> {
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE domain_name = $1");
        Ok(sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(domain_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(Identity::from))
    }
}

#[async_trait]
impl WebhookEventStore for PostgresStore {
    async fn reserve(
        &self,
        event: NewWebhookEvent,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Reservation, GatewayError> {
        let dedupe_key = event.dedupe_key.clone();
        let row = event.into_event(now);
        let insert = format!(
            "INSERT INTO webhook_events ({WEBHOOK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, NULL, NULL, $9, $9) \
             ON CONFLICT (dedupe_key) DO NOTHING \
             RETURNING {WEBHOOK_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, WebhookEventRow>(&insert)
            .bind(row.id)
            .bind(row.intent_id.as_uuid())
            .bind(row.event_type.as_str())
            .bind(&row.dedupe_key)
            .bind(&row.tx_hash)
            .bind(&row.payload)
            .bind(row.status.as_str())
            .bind(row.attempt_count)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        if let Some(inserted) = inserted {
            return Ok(Reservation::Reserved(WebhookEvent::try_from(inserted)?));
        }

        let retry = format!(
            "UPDATE webhook_events SET status = 'processing', attempt_count = attempt_count + 1, \
                updated_at = $2 \
             WHERE dedupe_key = $1 \
               AND (status = 'failed' OR (status = 'processing' AND updated_at <= $3)) \
             RETURNING {WEBHOOK_COLUMNS}"
        );
        let reclaimed = sqlx::query_as::<_, WebhookEventRow>(&retry)
            .bind(&dedupe_key)
            .bind(now)
            .bind(now - lease)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        if let Some(reclaimed) = reclaimed {
            return Ok(Reservation::Reserved(WebhookEvent::try_from(reclaimed)?));
        }

        let existing = self.fetch_event_by_key(&dedupe_key).await?;
        Ok(match existing.status {
            WebhookEventStatus::Processed => Reservation::DuplicateProcessed(existing),
            WebhookEventStatus::Processing | WebhookEventStatus::Failed => {
                Reservation::DuplicateProcessing(existing)
            }
        })
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let done = sqlx::query(
            "UPDATE webhook_events SET status = 'processed', result = $2, \
                last_error_code = NULL, last_error_message = NULL, updated_at = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(result)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        if done.rows_affected() == 0 {
            return Err(GatewayError::EventNotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        code: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let done = sqlx::query(
            "UPDATE webhook_events SET status = 'failed', last_error_code = $2, \
                last_error_message = $3, updated_at = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(code)
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        if done.rows_affected() == 0 {
            return Err(GatewayError::EventNotFound(id));
        }
        Ok(())
    }

    async fn load_event(&self, id: Uuid) -> Result<Option<WebhookEvent>, GatewayError> {
        let sql = format!("SELECT {WEBHOOK_COLUMNS} FROM webhook_events WHERE id = $1");
        sqlx::query_as::<_, WebhookEventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(WebhookEvent::try_from)
            .transpose()
    }
}

#[async_trait]
impl QueueStore for PostgresStore {
    async fn insert_entry(&self, entry: QueueEntry) -> Result<Option<QueueEntry>, GatewayError> {
        let sql = format!(
            "INSERT INTO queue_entries ({QUEUE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (queue_name, target_type, target_id) WHERE status <> 'dead_letter' \
             DO NOTHING \
             RETURNING {QUEUE_COLUMNS}"
        );
        sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(entry.id)
            .bind(&entry.queue_name)
            .bind(&entry.target_type)
            .bind(&entry.target_id)
            .bind(&entry.payload)
            .bind(entry.status.as_str())
            .bind(entry.attempt_count)
            .bind(&entry.last_error)
            .bind(entry.locked_until)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(QueueEntry::try_from)
            .transpose()
    }

    async fn claim_batch(
        &self,
        queue_name: &str,
        limit: u32,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<QueueEntry>, GatewayError> {
        let sql = format!(
            "UPDATE queue_entries SET status = 'processing', locked_until = $5, updated_at = $3 \
             WHERE id IN ( \
                SELECT id FROM queue_entries \
                WHERE queue_name = $1 \
                  AND (status = ANY($4) OR (status = 'processing' AND locked_until <= $3)) \
                ORDER BY created_at ASC LIMIT $2 \
                FOR UPDATE SKIP LOCKED) \
             RETURNING {QUEUE_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(queue_name)
            .bind(i64::from(limit))
            .bind(now)
            .bind(queue_status_names(&QueueStatus::CLAIMABLE))
            .bind(now + lease)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    async fn delete_entry(&self, id: Uuid) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM queue_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn fail_entry(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, GatewayError> {
        let sql = format!(
            "UPDATE queue_entries SET \
                attempt_count = attempt_count + 1, \
                status = CASE WHEN attempt_count + 1 >= $3 THEN 'dead_letter' ELSE 'failed' END, \
                last_error = $2, locked_until = NULL, updated_at = $4 \
             WHERE id = $1 \
             RETURNING {QUEUE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(id)
            .bind(error)
            .bind(max_attempts)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| GatewayError::PersistenceError(format!("queue entry {id} not found")))?;
        QueueEntry::try_from(row)
    }

    async fn cancel_entries(
        &self,
        queue_name: &str,
        filter: &QueueFilter,
        dry_run: bool,
    ) -> Result<BulkOutcome, GatewayError> {
        let selection = format!(
            "SELECT q.id FROM queue_entries q WHERE {QUEUE_FILTER} \
             ORDER BY q.created_at ASC LIMIT $5"
        );
        let sql = if dry_run {
            format!("SELECT COUNT(*) FROM ({selection}) selected")
        } else {
            format!(
                "WITH deleted AS (DELETE FROM queue_entries WHERE id IN ({selection}) RETURNING 1) \
                 SELECT COUNT(*) FROM deleted"
            )
        };
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(queue_name)
            .bind(queue_status_names(&filter.statuses))
            .bind(&filter.target_type)
            .bind(&filter.target_ids)
            .bind(i64::from(filter.limit))
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        let selected = u64::try_from(count).unwrap_or(0);
        Ok(BulkOutcome {
            selected,
            affected: if dry_run { 0 } else { selected },
            dry_run,
        })
    }

    async fn requeue_dead_letter(
        &self,
        queue_name: &str,
        filter: &QueueFilter,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<BulkOutcome, GatewayError> {
        let selection = format!(
            "SELECT newest.id FROM ( \
                SELECT DISTINCT ON (q.target_type, q.target_id) q.id, q.created_at \
                FROM queue_entries q WHERE {QUEUE_FILTER} \
                  AND NOT EXISTS ( \
                    SELECT 1 FROM queue_entries live \
                    WHERE live.queue_name = q.queue_name AND live.target_type = q.target_type \
                      AND live.target_id = q.target_id AND live.status <> 'dead_letter') \
                ORDER BY q.target_type, q.target_id, q.updated_at DESC) newest \
             ORDER BY newest.created_at ASC LIMIT $5"
        );
        let sql = if dry_run {
            format!("SELECT COUNT(*) FROM ({selection}) selected")
        } else {
            format!(
                "WITH requeued AS ( \
                    UPDATE queue_entries SET status = 'pending', attempt_count = 0, \
                        last_error = NULL, locked_until = NULL, updated_at = $6 \
                    WHERE id IN ({selection}) RETURNING 1) \
                 SELECT COUNT(*) FROM requeued"
            )
        };
        let mut query = sqlx::query_scalar::<_, i64>(&sql)
            .bind(queue_name)
            .bind(queue_status_names(&[QueueStatus::DeadLetter]))
            .bind(&filter.target_type)
            .bind(&filter.target_ids)
            .bind(i64::from(filter.limit));
        if !dry_run {
            query = query.bind(now);
        }
        let count = query.fetch_one(&self.pool).await.map_err(db_error)?;
        let selected = u64::try_from(count).unwrap_or(0);
        Ok(BulkOutcome {
            selected,
            affected: if dry_run { 0 } else { selected },
            dry_run,
        })
    }

    async fn count_by_status(
        &self,
        queue_name: &str,
    ) -> Result<HashMap<QueueStatus, u64>, GatewayError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM queue_entries WHERE queue_name = $1 GROUP BY status",
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut counts: HashMap<QueueStatus, u64> =
            QueueStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for (status, count) in rows {
            let status: QueueStatus = status
                .parse()
                .map_err(|e| GatewayError::PersistenceError(format!("corrupt row: {e}")))?;
            counts.insert(status, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    async fn load_control(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueControl, GatewayError> {
        let row = sqlx::query_as::<_, QueueControlRow>(
            "SELECT queue_name, paused, reason, paused_by, updated_at \
             FROM queue_controls WHERE queue_name = $1",
        )
        .bind(queue_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map_or_else(|| QueueControl::running(queue_name, now), QueueControl::from))
    }

    async fn save_control(&self, control: QueueControl) -> Result<QueueControl, GatewayError> {
        let row = sqlx::query_as::<_, QueueControlRow>(
            "INSERT INTO queue_controls (queue_name, paused, reason, paused_by, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (queue_name) DO UPDATE SET \
                paused = EXCLUDED.paused, reason = EXCLUDED.reason, \
                paused_by = EXCLUDED.paused_by, updated_at = EXCLUDED.updated_at \
             RETURNING queue_name, paused, reason, paused_by, updated_at",
        )
        .bind(&control.queue_name)
        .bind(control.paused)
        .bind(&control.reason)
        .bind(&control.paused_by)
        .bind(control.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(QueueControl::from(row))
    }
}

#[async_trait]
impl ThrottleStore for PostgresStore {
    async fn claim_cooldown(
        &self,
        operation: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let claimed = sqlx::query_scalar::<_, DateTime<Utc>>(
            "INSERT INTO throttle_claims (operation, next_allowed_at) VALUES ($1, $2) \
             ON CONFLICT (operation) DO UPDATE SET next_allowed_at = EXCLUDED.next_allowed_at \
             WHERE throttle_claims.next_allowed_at <= $3 \
             RETURNING next_allowed_at",
        )
        .bind(operation)
        .bind(now + cooldown)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        if claimed.is_some() {
            return Ok(());
        }

        let next_allowed_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT next_allowed_at FROM throttle_claims WHERE operation = $1",
        )
        .bind(operation)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .unwrap_or(now + cooldown);
        Err(GatewayError::RateLimited {
            retry_after_ms: retry_after_ms(next_allowed_at, now),
        })
    }
}

#[async_trait]
impl AuditStore for PostgresStore {
    async fn append_audit(&self, event: AuditEvent) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO audit_events (id, operation, outcome, actor, request_method, \
                request_path, payload, result, error_code, error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(event.id)
        .bind(&event.operation)
        .bind(event.outcome.as_str())
        .bind(&event.actor)
        .bind(&event.request_method)
        .bind(&event.request_path)
        .bind(&event.payload)
        .bind(&event.result)
        .bind(&event.error_code)
        .bind(&event.error_message)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, GatewayError> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT id, operation, outcome, actor, request_method, request_path, payload, \
                result, error_code, error_message, created_at \
             FROM audit_events \
             WHERE ($1::text IS NULL OR outcome = $1) \
               AND ($2::text IS NULL OR actor = $2) \
               AND ($3::timestamptz IS NULL OR created_at >= $3) \
               AND ($4::timestamptz IS NULL OR created_at < $4) \
             ORDER BY created_at DESC LIMIT $5",
        )
        .bind(query.outcome.map(|o| o.as_str()))
        .bind(&query.actor)
        .bind(query.created_after)
        .bind(query.created_before)
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.into_iter().map(AuditEvent::try_from).collect()
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, GatewayError> {
        let result = sqlx::query("DELETE FROM audit_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
