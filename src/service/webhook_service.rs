//! Webhook ingestion: validate, reserve by dedupe key, apply once, cache
//! the response for replays.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::intent_service::{CommitSource, IntentService, Observation, RegistrationSync};
use crate::domain::commitment::normalize_tx_hash;
use crate::domain::{
    IntentId, NewWebhookEvent, PurchaseIntent, Reservation, WebhookEvent, WebhookEventType,
};
use crate::error::GatewayError;
use crate::persistence::Store;

/// `data` of a webhook body.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookData {
    /// Target intent.
    pub intent_id: String,
    /// Transaction hash of the confirmed transaction.
    pub tx_hash: Option<String>,
    /// Mark the identity as the user's primary name.
    pub set_primary: Option<bool>,
    /// Failure reason for `register.failed`.
    pub reason: Option<String>,
}

/// Webhook body.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WebhookPayload {
    /// `commit.confirmed`, `register.confirmed` or `register.failed`.
    pub event: String,
    /// Event data.
    pub data: WebhookData,
}

/// Webhook acknowledgement; cached verbatim for replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    /// Always true on 200.
    pub acknowledged: bool,
    /// Whether this delivery was a duplicate.
    pub deduplicated: bool,
    /// Event type.
    pub event: WebhookEventType,
    /// Intent after processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<PurchaseIntent>,
    /// Domain confirmed by `register.confirmed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Set while another delivery is still processing the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing: Option<bool>,
}

/// A webhook that passed validation and can be reserved.
#[derive(Debug)]
struct ValidatedWebhook {
    event_type: WebhookEventType,
    intent: PurchaseIntent,
    tx_hash: Option<String>,
    set_primary: bool,
    reason: Option<String>,
}

/// Orchestrates webhook deliveries.
#[derive(Debug)]
pub struct WebhookService {
    store: Arc<dyn Store>,
    intents: Arc<IntentService>,
    processing_lease: Duration,
}

impl WebhookService {
    /// Creates a new `WebhookService`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, intents: Arc<IntentService>, processing_lease_secs: u64) -> Self {
        Self {
            store,
            intents,
            processing_lease: Duration::seconds(
                i64::try_from(processing_lease_secs).unwrap_or(i64::MAX / 1000),
            ),
        }
    }

    /// Handles one authenticated delivery.
    ///
    /// Validation happens before anything is written. A duplicate of a
    /// processed event returns the cached response with `deduplicated`
    /// set; a failure marks the event failed and is returned unchanged.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for malformed bodies,
    /// [`GatewayError::IntentNotFound`] for unknown intents, and whatever
    /// the business transition raised.
    pub async fn handle(&self, body: serde_json::Value) -> Result<WebhookResponse, GatewayError> {
        let webhook = self.validate(&body).await?;
        let event_type = webhook.event_type;
        let new_event = NewWebhookEvent::new(
            webhook.intent.id,
            event_type,
            webhook.tx_hash.clone(),
            body,
        );
        let now = self.intents.now();

        let event = match self
            .store
            .reserve(new_event, now, self.processing_lease)
            .await?
        {
            Reservation::Reserved(event) => event,
            Reservation::DuplicateProcessed(event) => return Ok(cached_response(&event)),
            Reservation::DuplicateProcessing(event) => {
                info!(event_id = %event.id, event = %event_type, "Webhook already in flight");
                return Ok(WebhookResponse {
                    acknowledged: true,
                    deduplicated: true,
                    event: event_type,
                    intent: None,
                    domain: None,
                    processing: Some(true),
                });
            }
        };

        match self.apply(webhook).await {
            Ok(response) => {
                let cached = serde_json::to_value(&response)
                    .map_err(|e| GatewayError::Internal(format!("response encoding: {e}")))?;
                self.store
                    .mark_processed(event.id, &cached, self.intents.now())
                    .await?;
                info!(
                    event_id = %event.id,
                    event = %event_type,
                    intent_id = %event.intent_id,
                    attempt = event.attempt_count,
                    "Webhook processed"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    event = %event_type,
                    intent_id = %event.intent_id,
                    error = %e,
                    "Webhook processing failed"
                );
                if let Err(mark_err) = self
                    .store
                    .mark_failed(
                        event.id,
                        &e.error_code().to_string(),
                        &e.to_string(),
                        self.intents.now(),
                    )
                    .await
                {
                    error!(event_id = %event.id, error = %mark_err, "Failed to record webhook failure");
                }
                Err(e)
            }
        }
    }

    async fn validate(&self, body: &serde_json::Value) -> Result<ValidatedWebhook, GatewayError> {
        let payload: WebhookPayload = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::InvalidRequest(format!("invalid webhook body: {e}")))?;
        let event_type: WebhookEventType = payload.event.parse()?;
        let intent_id: IntentId = payload
            .data
            .intent_id
            .parse()
            .map_err(|_| GatewayError::InvalidRequest("data.intentId must be a UUID".to_string()))?;
        let tx_hash = payload
            .data
            .tx_hash
            .as_deref()
            .map(normalize_tx_hash)
            .transpose()?;
        let intent = self.intents.get_intent(intent_id).await?;
        Ok(ValidatedWebhook {
            event_type,
            intent,
            tx_hash,
            set_primary: payload.data.set_primary.unwrap_or(false),
            reason: payload.data.reason,
        })
    }

    async fn apply(&self, webhook: ValidatedWebhook) -> Result<WebhookResponse, GatewayError> {
        let ValidatedWebhook {
            event_type,
            intent,
            tx_hash,
            set_primary,
            reason,
        } = webhook;
        let tx_hash = tx_hash.as_deref();

        let (intent, domain) = match event_type {
            WebhookEventType::CommitConfirmed => {
                match self
                    .intents
                    .sync_commit(&intent, tx_hash, CommitSource::Webhook)
                    .await?
                {
                    Observation::Applied { intent, .. } | Observation::AlreadyApplied(intent) => {
                        (intent, None)
                    }
                    Observation::NotObserved => (intent, None),
                }
            }
            WebhookEventType::RegisterConfirmed => {
                match self
                    .intents
                    .sync_registration(&intent, tx_hash, set_primary)
                    .await?
                {
                    RegistrationSync::Confirmed {
                        intent, identity, ..
                    } => (intent, Some(identity.domain_name)),
                    RegistrationSync::NotLive => {
                        return Err(GatewayError::OwnershipNotVerified {
                            domain: intent.domain_name,
                            reason: "name is not registered on-chain yet".to_string(),
                        });
                    }
                    RegistrationSync::OwnerMismatch { actual_owner } => {
                        warn!(
                            intent_id = %intent.id,
                            domain = %intent.domain_name,
                            %actual_owner,
                            "Registration webhook for a name owned by another wallet"
                        );
                        return Err(GatewayError::OwnershipNotVerified {
                            domain: intent.domain_name,
                            reason: format!("owned by {actual_owner}"),
                        });
                    }
                }
            }
            WebhookEventType::RegisterFailed => {
                match self
                    .intents
                    .fail_registration(&intent, reason.as_deref())
                    .await?
                {
                    Observation::Applied { intent, .. } | Observation::AlreadyApplied(intent) => {
                        (intent, None)
                    }
                    Observation::NotObserved => (intent, None),
                }
            }
        };

        Ok(WebhookResponse {
            acknowledged: true,
            deduplicated: false,
            event: event_type,
            intent: Some(intent),
            domain,
            processing: None,
        })
    }
}

fn cached_response(event: &WebhookEvent) -> WebhookResponse {
    let cached = event
        .result
        .clone()
        .and_then(|value| serde_json::from_value::<WebhookResponse>(value).ok());
    match cached {
        Some(response) => WebhookResponse {
            deduplicated: true,
            ..response
        },
        None => WebhookResponse {
            acknowledged: true,
            deduplicated: true,
            event: event.event_type,
            intent: None,
            domain: None,
            processing: None,
        },
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::IntentStatus;
    use crate::testing::{Harness, SAMPLE_WALLET, sample_epoch};

    fn tx(byte: &str) -> String {
        format!("0x{}", byte.repeat(32))
    }

    fn one_year_out() -> u64 {
        u64::try_from(sample_epoch().timestamp()).unwrap_or(0) + 31_536_000
    }

    #[tokio::test]
    async fn commit_webhook_replay_returns_cached_response() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        let body = json!({
            "event": "commit.confirmed",
            "data": { "intentId": intent.id.to_string(), "txHash": tx("aa") },
        });

        let Ok(first) = harness.state.webhooks.handle(body.clone()).await else {
            panic!("first delivery failed");
        };
        assert!(!first.deduplicated);
        let Some(committed) = first.intent.clone() else {
            panic!("response carries no intent");
        };
        assert_eq!(committed.status, IntentStatus::Committed);
        assert_eq!(committed.commit_tx_hash.as_deref(), Some(tx("aa").as_str()));
        let (Some(committed_at), Some(registerable_at)) =
            (committed.committed_at, committed.registerable_at)
        else {
            panic!("timing not derived");
        };
        assert_eq!(registerable_at - committed_at, Duration::seconds(60));

        harness.clock.advance(Duration::seconds(5));
        let Ok(replay) = harness.state.webhooks.handle(body).await else {
            panic!("replay failed");
        };
        assert!(replay.deduplicated);
        assert_eq!(replay.intent, first.intent);
        let Ok(stored) = harness.state.intents.get_intent(intent.id).await else {
            panic!("intent vanished");
        };
        assert_eq!(stored.updated_at, committed.updated_at);
    }

    #[tokio::test]
    async fn owner_mismatch_fails_then_replay_resumes() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        let intruder = "0x00000000000000000000000000000000000000bb";
        harness.chain.register_name("alice", intruder, one_year_out());
        let body = json!({
            "event": "register.confirmed",
            "data": { "intentId": intent.id.to_string(), "txHash": tx("cc"), "setPrimary": true },
        });

        let Err(err) = harness.state.webhooks.handle(body.clone()).await else {
            panic!("mismatch must not confirm");
        };
        assert!(matches!(err, GatewayError::OwnershipNotVerified { .. }));
        assert!(harness.state.intents.get_identity("alice.eth").await.is_err());

        harness
            .chain
            .register_name("alice", SAMPLE_WALLET, one_year_out());
        let Ok(response) = harness.state.webhooks.handle(body).await else {
            panic!("retry after ownership fix failed");
        };
        assert!(!response.deduplicated);
        assert_eq!(response.domain.as_deref(), Some("alice.eth"));
        let Ok(identity) = harness.state.intents.get_identity("alice.eth").await else {
            panic!("identity missing");
        };
        assert!(identity.is_primary);
        assert_eq!(identity.owner_address, SAMPLE_WALLET);
    }

    #[tokio::test]
    async fn unknown_intent_is_rejected_before_reservation() {
        let harness = Harness::new();
        let body = json!({
            "event": "commit.confirmed",
            "data": { "intentId": IntentId::new().to_string(), "txHash": tx("aa") },
        });
        let result = harness.state.webhooks.handle(body).await;
        assert!(matches!(result, Err(GatewayError::IntentNotFound(_))));
    }

    #[tokio::test]
    async fn malformed_payloads_are_invalid_requests() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        for body in [
            json!({ "event": "commit.confirmed" }),
            json!({ "event": "commit.reverted", "data": { "intentId": intent.id.to_string() } }),
            json!({ "event": "commit.confirmed", "data": { "intentId": "nope" } }),
            json!({ "event": "commit.confirmed", "data": { "intentId": intent.id.to_string(), "txHash": "0x12" } }),
        ] {
            let result = harness.state.webhooks.handle(body).await;
            assert!(
                matches!(result, Err(GatewayError::InvalidRequest(_))),
                "expected invalid request, got {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn register_failed_after_registration_conflicts() {
        let harness = Harness::new();
        let Ok(intent) = harness.seed_intent().await else {
            panic!("seed failed");
        };
        harness
            .chain
            .register_name("alice", SAMPLE_WALLET, one_year_out());
        let confirm = json!({
            "event": "register.confirmed",
            "data": { "intentId": intent.id.to_string(), "txHash": tx("dd") },
        });
        assert!(harness.state.webhooks.handle(confirm).await.is_ok());

        let failed = json!({
            "event": "register.failed",
            "data": { "intentId": intent.id.to_string(), "reason": "out of gas" },
        });
        let result = harness.state.webhooks.handle(failed).await;
        assert!(matches!(
            result,
            Err(GatewayError::InvalidTransition {
                status: IntentStatus::Registered,
                target: IntentStatus::Failed,
                ..
            })
        ));
    }
}
