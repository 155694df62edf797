//! In-memory store.
//!
//! All tables sit behind one `RwLock`, so every trait method runs as a
//! single critical section and mirrors the atomicity the PostgreSQL
//! statements give.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::{
    AuditStore, IdentityStore, IntentStore, QueueStore, ThrottleStore, WebhookEventStore,
    retry_after_ms,
};
use crate::domain::{
    AuditEvent, AuditQuery, BulkOutcome, Identity, IntentId, NewWebhookEvent, PurchaseIntent,
    QueueControl, QueueEntry, QueueFilter, QueueStatus, Reservation, Transition,
    TransitionOutcome, TxKind, WebhookEvent, WebhookEventStatus,
};
use crate::error::GatewayError;

#[derive(Debug, Default)]
struct Tables {
    intents: HashMap<IntentId, PurchaseIntent>,
    identities: HashMap<String, Identity>,
    events: HashMap<uuid::Uuid, WebhookEvent>,
    events_by_key: HashMap<String, uuid::Uuid>,
    queue: HashMap<uuid::Uuid, QueueEntry>,
    controls: HashMap<String, QueueControl>,
    throttles: HashMap<String, DateTime<Utc>>,
    audit: Vec<AuditEvent>,
}

impl Tables {
    fn hash_owner(&self, kind: TxKind, tx_hash: &str) -> Option<IntentId> {
        self.intents
            .values()
            .find(|intent| {
                let column = match kind {
                    TxKind::Commit => &intent.commit_tx_hash,
                    TxKind::Register => &intent.register_tx_hash,
                };
                column.as_deref() == Some(tx_hash)
            })
            .map(|intent| intent.id)
    }

    fn check_hash_free(
        &self,
        id: IntentId,
        kind: TxKind,
        tx_hash: Option<&str>,
    ) -> Result<(), GatewayError> {
        let Some(tx_hash) = tx_hash else {
            return Ok(());
        };
        match self.hash_owner(kind, tx_hash) {
            Some(owner) if owner != id => Err(GatewayError::DuplicateTxHash {
                field: kind.column(),
                tx_hash: tx_hash.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn has_live_entry(&self, entry: &QueueEntry) -> bool {
        self.queue.values().any(|other| {
            other.id != entry.id
                && other.queue_name == entry.queue_name
                && other.target_type == entry.target_type
                && other.target_id == entry.target_id
                && other.status != QueueStatus::DeadLetter
        })
    }

    /// Newest dead letter per target, skipping targets with a live entry.
    fn select_requeue(&self, queue_name: &str, filter: &QueueFilter) -> Vec<uuid::Uuid> {
        let mut matching: Vec<&QueueEntry> = self
            .queue
            .values()
            .filter(|entry| entry.queue_name == queue_name && filter.matches(entry))
            .filter(|entry| !self.has_live_entry(entry))
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let mut targets = HashSet::new();
        let mut picked: Vec<&QueueEntry> = matching
            .into_iter()
            .filter(|entry| targets.insert((entry.target_type.as_str(), entry.target_id.as_str())))
            .collect();
        picked.sort_by_key(|entry| entry.created_at);
        picked
            .into_iter()
            .take(filter.limit as usize)
            .map(|entry| entry.id)
            .collect()
    }

    fn select(&self, queue_name: &str, filter: &QueueFilter) -> Vec<uuid::Uuid> {
        let mut matching: Vec<&QueueEntry> = self
            .queue
            .values()
            .filter(|entry| entry.queue_name == queue_name && filter.matches(entry))
            .collect();
        matching.sort_by_key(|entry| entry.created_at);
        matching
            .into_iter()
            .take(filter.limit as usize)
            .map(|entry| entry.id)
            .collect()
    }
}

/// Process-local store implementing every persistence contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentStore for MemoryStore {
    async fn create_intent(&self, intent: PurchaseIntent) -> Result<PurchaseIntent, GatewayError> {
        let mut tables = self.tables.write().await;
        if tables
            .intents
            .values()
            .any(|existing| existing.commitment == intent.commitment)
        {
            return Err(GatewayError::DuplicateCommitment(intent.commitment));
        }
        tables.check_hash_free(intent.id, TxKind::Commit, intent.commit_tx_hash.as_deref())?;
        tables.check_hash_free(intent.id, TxKind::Register, intent.register_tx_hash.as_deref())?;
        tables.intents.insert(intent.id, intent.clone());
        Ok(intent)
    }

    async fn load_intent(&self, id: IntentId) -> Result<Option<PurchaseIntent>, GatewayError> {
        Ok(self.tables.read().await.intents.get(&id).cloned())
    }

    async fn load_by_commit_tx_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<PurchaseIntent>, GatewayError> {
        let tables = self.tables.read().await;
        Ok(tables
            .hash_owner(TxKind::Commit, tx_hash)
            .and_then(|id| tables.intents.get(&id).cloned()))
    }

    async fn load_by_register_tx_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<PurchaseIntent>, GatewayError> {
        let tables = self.tables.read().await;
        Ok(tables
            .hash_owner(TxKind::Register, tx_hash)
            .and_then(|id| tables.intents.get(&id).cloned()))
    }

    async fn transition(
        &self,
        id: IntentId,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, GatewayError> {
        let mut tables = self.tables.write().await;
        let current = tables
            .intents
            .get(&id)
            .cloned()
            .ok_or(GatewayError::IntentNotFound(*id.as_uuid()))?;
        if !transition.guard_statuses().contains(&current.status) {
            return Ok(TransitionOutcome::Unchanged(current));
        }
        tables.check_hash_free(id, TxKind::Commit, transition.patch.commit_tx_hash.as_deref())?;
        tables.check_hash_free(
            id,
            TxKind::Register,
            transition.patch.register_tx_hash.as_deref(),
        )?;

        let mut next = current;
        transition.patch.apply_to(&mut next);
        next.status = transition.to;
        next.updated_at = now;
        tables.intents.insert(id, next.clone());
        Ok(TransitionOutcome::Applied(next))
    }

    async fn attach_tx_hash(
        &self,
        id: IntentId,
        kind: TxKind,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, GatewayError> {
        let mut tables = self.tables.write().await;
        let current = tables
            .intents
            .get(&id)
            .cloned()
            .ok_or(GatewayError::IntentNotFound(*id.as_uuid()))?;
        let column = match kind {
            TxKind::Commit => &current.commit_tx_hash,
            TxKind::Register => &current.register_tx_hash,
        };
        let column_free = column.as_deref().is_none_or(|existing| existing == tx_hash);
        if !kind.attachable_from().contains(&current.status) || !column_free {
            return Ok(TransitionOutcome::Unchanged(current));
        }
        tables.check_hash_free(id, kind, Some(tx_hash))?;

        let mut next = current;
        match kind {
            TxKind::Commit => next.commit_tx_hash = Some(tx_hash.to_string()),
            TxKind::Register => next.register_tx_hash = Some(tx_hash.to_string()),
        }
        next.updated_at = now;
        tables.intents.insert(id, next.clone());
        Ok(TransitionOutcome::Applied(next))
    }

    async fn list_pending(
        &self,
        updated_before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<PurchaseIntent>, GatewayError> {
        let tables = self.tables.read().await;
        let mut pending: Vec<PurchaseIntent> = tables
            .intents
            .values()
            .filter(|intent| !intent.status.is_terminal())
            .filter(|intent| updated_before.is_none_or(|cutoff| intent.updated_at < cutoff))
            .cloned()
            .collect();
        pending.sort_by_key(|intent| intent.updated_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn upsert_identity(&self, identity: Identity) -> Result<Identity, GatewayError> {
        let mut tables = self.tables.write().await;
        if identity.is_primary {
            for other in tables.identities.values_mut() {
                if other.user_id == identity.user_id && other.domain_name != identity.domain_name {
                    other.is_primary = false;
                }
            }
        }
        let stored = match tables.identities.get(&identity.domain_name) {
            Some(existing) => Identity {
                created_at: existing.created_at,
                is_primary: identity.is_primary || existing.is_primary,
                ..identity
            },
            None => identity,
        };
        tables
            .identities
            .insert(stored.domain_name.clone(), stored.clone());
        Ok(stored)
    }

    async fn load_identity(&self, domain_name: &str) -> Result<Option<Identity>, GatewayError> {
        Ok(self.tables.read().await.identities.get(domain_name).cloned())
    }
}

#[async_trait]
impl WebhookEventStore for MemoryStore {
    async fn reserve(
        &self,
        event: NewWebhookEvent,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Reservation, GatewayError> {
        let mut tables = self.tables.write().await;
        let Some(existing_id) = tables.events_by_key.get(&event.dedupe_key).copied() else {
            let row = event.into_event(now);
            tables.events_by_key.insert(row.dedupe_key.clone(), row.id);
            tables.events.insert(row.id, row.clone());
            return Ok(Reservation::Reserved(row));
        };
        let existing = tables
            .events
            .get_mut(&existing_id)
            .ok_or(GatewayError::EventNotFound(existing_id))?;

        let lease_lapsed =
            existing.status == WebhookEventStatus::Processing && existing.updated_at + lease <= now;
        match existing.status {
            WebhookEventStatus::Processed => Ok(Reservation::DuplicateProcessed(existing.clone())),
            WebhookEventStatus::Processing if !lease_lapsed => {
                Ok(Reservation::DuplicateProcessing(existing.clone()))
            }
            WebhookEventStatus::Processing | WebhookEventStatus::Failed => {
                existing.status = WebhookEventStatus::Processing;
                existing.attempt_count = existing.attempt_count.saturating_add(1);
                existing.updated_at = now;
                Ok(Reservation::Reserved(existing.clone()))
            }
        }
    }

    async fn mark_processed(
        &self,
        id: uuid::Uuid,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        let event = tables
            .events
            .get_mut(&id)
            .ok_or(GatewayError::EventNotFound(id))?;
        event.status = WebhookEventStatus::Processed;
        event.result = Some(result.clone());
        event.last_error_code = None;
        event.last_error_message = None;
        event.updated_at = now;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: uuid::Uuid,
        code: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        let event = tables
            .events
            .get_mut(&id)
            .ok_or(GatewayError::EventNotFound(id))?;
        event.status = WebhookEventStatus::Failed;
        event.last_error_code = Some(code.to_string());
        event.last_error_message = Some(message.to_string());
        event.updated_at = now;
        Ok(())
    }

    async fn load_event(&self, id: uuid::Uuid) -> Result<Option<WebhookEvent>, GatewayError> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert_entry(&self, entry: QueueEntry) -> Result<Option<QueueEntry>, GatewayError> {
        let mut tables = self.tables.write().await;
        if tables.has_live_entry(&entry) {
            return Ok(None);
        }
        tables.queue.insert(entry.id, entry.clone());
        Ok(Some(entry))
    }

    async fn claim_batch(
        &self,
        queue_name: &str,
        limit: u32,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<QueueEntry>, GatewayError> {
        let mut tables = self.tables.write().await;
        let mut claimable: Vec<&QueueEntry> = tables
            .queue
            .values()
            .filter(|entry| entry.queue_name == queue_name && entry.is_claimable(now))
            .collect();
        claimable.sort_by_key(|entry| entry.created_at);
        let ids: Vec<uuid::Uuid> = claimable
            .into_iter()
            .take(limit as usize)
            .map(|entry| entry.id)
            .collect();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = tables.queue.get_mut(&id) {
                entry.status = QueueStatus::Processing;
                entry.locked_until = Some(now + lease);
                entry.updated_at = now;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn delete_entry(&self, id: uuid::Uuid) -> Result<(), GatewayError> {
        self.tables.write().await.queue.remove(&id);
        Ok(())
    }

    async fn fail_entry(
        &self,
        id: uuid::Uuid,
        error: &str,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, GatewayError> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .queue
            .get_mut(&id)
            .ok_or_else(|| GatewayError::PersistenceError(format!("queue entry {id} not found")))?;
        entry.attempt_count = entry.attempt_count.saturating_add(1);
        entry.status = QueueEntry::status_after_failure(entry.attempt_count, max_attempts);
        entry.last_error = Some(error.to_string());
        entry.locked_until = None;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    async fn cancel_entries(
        &self,
        queue_name: &str,
        filter: &QueueFilter,
        dry_run: bool,
    ) -> Result<BulkOutcome, GatewayError> {
        let mut tables = self.tables.write().await;
        let ids = tables.select(queue_name, filter);
        let selected = ids.len() as u64;
        if dry_run {
            return Ok(BulkOutcome {
                selected,
                affected: 0,
                dry_run,
            });
        }
        for id in &ids {
            tables.queue.remove(id);
        }
        Ok(BulkOutcome {
            selected,
            affected: selected,
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
        let mut tables = self.tables.write().await;
        let dead_letter_only = QueueFilter {
            statuses: vec![QueueStatus::DeadLetter],
            ..filter.clone()
        };
        let ids = tables.select_requeue(queue_name, &dead_letter_only);
        let selected = ids.len() as u64;
        if dry_run {
            return Ok(BulkOutcome {
                selected,
                affected: 0,
                dry_run,
            });
        }
        for id in &ids {
            if let Some(entry) = tables.queue.get_mut(id) {
                entry.status = QueueStatus::Pending;
                entry.attempt_count = 0;
                entry.last_error = None;
                entry.locked_until = None;
                entry.updated_at = now;
            }
        }
        Ok(BulkOutcome {
            selected,
            affected: selected,
            dry_run,
        })
    }

    async fn count_by_status(
        &self,
        queue_name: &str,
    ) -> Result<HashMap<QueueStatus, u64>, GatewayError> {
        let tables = self.tables.read().await;
        let mut counts: HashMap<QueueStatus, u64> =
            QueueStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for entry in tables.queue.values().filter(|e| e.queue_name == queue_name) {
            *counts.entry(entry.status).or_default() += 1;
        }
        Ok(counts)
    }

    async fn load_control(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueControl, GatewayError> {
        Ok(self
            .tables
            .read()
            .await
            .controls
            .get(queue_name)
            .cloned()
            .unwrap_or_else(|| QueueControl::running(queue_name, now)))
    }

    async fn save_control(&self, control: QueueControl) -> Result<QueueControl, GatewayError> {
        self.tables
            .write()
            .await
            .controls
            .insert(control.queue_name.clone(), control.clone());
        Ok(control)
    }
}

#[async_trait]
impl ThrottleStore for MemoryStore {
    async fn claim_cooldown(
        &self,
        operation: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        if let Some(next_allowed_at) = tables.throttles.get(operation).copied()
            && next_allowed_at > now
        {
            return Err(GatewayError::RateLimited {
                retry_after_ms: retry_after_ms(next_allowed_at, now),
            });
        }
        tables.throttles.insert(operation.to_string(), now + cooldown);
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, event: AuditEvent) -> Result<(), GatewayError> {
        self.tables.write().await.audit.push(event);
        Ok(())
    }

    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, GatewayError> {
        let tables = self.tables.read().await;
        let mut events: Vec<AuditEvent> = tables
            .audit
            .iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(query.limit as usize);
        Ok(events)
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64, GatewayError> {
        let mut tables = self.tables.write().await;
        let before = tables.audit.len();
        tables.audit.retain(|event| event.created_at >= cutoff);
        Ok((before - tables.audit.len()) as u64)
    }
}
