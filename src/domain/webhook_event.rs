//! Inbound webhook events and their dedupe reservation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::IntentId;
use crate::error::GatewayError;

/// Business event carried by a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum WebhookEventType {
    /// The commit transaction was mined.
    #[serde(rename = "commit.confirmed")]
    CommitConfirmed,
    /// The register transaction was mined.
    #[serde(rename = "register.confirmed")]
    RegisterConfirmed,
    /// The register transaction reverted or was abandoned.
    #[serde(rename = "register.failed")]
    RegisterFailed,
}

impl WebhookEventType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CommitConfirmed => "commit.confirmed",
            Self::RegisterConfirmed => "register.confirmed",
            Self::RegisterFailed => "register.failed",
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookEventType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit.confirmed" => Ok(Self::CommitConfirmed),
            "register.confirmed" => Ok(Self::RegisterConfirmed),
            "register.failed" => Ok(Self::RegisterFailed),
            other => Err(GatewayError::InvalidRequest(format!(
                "unsupported webhook event: {other}"
            ))),
        }
    }
}

/// Processing status of a stored webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    /// Reserved by a handler that is applying it right now.
    Processing,
    /// Applied; `result` holds the cached response.
    Processed,
    /// Last attempt failed; eligible for retry.
    Failed,
}

impl WebhookEventStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for WebhookEventStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(GatewayError::PersistenceError(format!(
                "unknown webhook event status: {other}"
            ))),
        }
    }
}

/// Stored webhook event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Row identifier.
    #[schema(value_type = String, format = Uuid)]
    pub id: uuid::Uuid,
    /// Intent the event refers to.
    pub intent_id: IntentId,
    /// Event type.
    pub event_type: WebhookEventType,
    /// Unique dedupe key.
    pub dedupe_key: String,
    /// Transaction hash carried by the event.
    pub tx_hash: Option<String>,
    /// Raw event payload.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Processing status.
    pub status: WebhookEventStatus,
    /// How many times processing was attempted.
    pub attempt_count: i32,
    /// Cached response, meaningful when processed.
    #[schema(value_type = Object)]
    pub result: Option<serde_json::Value>,
    /// Code of the last failure.
    pub last_error_code: Option<String>,
    /// Message of the last failure.
    pub last_error_message: Option<String>,
    /// First receipt time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Data needed to reserve an event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhookEvent {
    /// Intent the event refers to.
    pub intent_id: IntentId,
    /// Event type.
    pub event_type: WebhookEventType,
    /// Dedupe key (see [`dedupe_key`]).
    pub dedupe_key: String,
    /// Transaction hash, if any.
    pub tx_hash: Option<String>,
    /// Raw payload.
    pub payload: serde_json::Value,
}

impl NewWebhookEvent {
    /// Builds the reservation request, deriving the dedupe key.
    #[must_use]
    pub fn new(
        intent_id: IntentId,
        event_type: WebhookEventType,
        tx_hash: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        let dedupe_key = dedupe_key(event_type, intent_id, tx_hash.as_deref(), &payload);
        Self {
            intent_id,
            event_type,
            dedupe_key,
            tx_hash,
            payload,
        }
    }

    /// Materialises the row inserted on first reservation.
    #[must_use]
    pub fn into_event(self, now: DateTime<Utc>) -> WebhookEvent {
        WebhookEvent {
            id: uuid::Uuid::new_v4(),
            intent_id: self.intent_id,
            event_type: self.event_type,
            dedupe_key: self.dedupe_key,
            tx_hash: self.tx_hash,
            payload: self.payload,
            status: WebhookEventStatus::Processing,
            attempt_count: 1,
            result: None,
            last_error_code: None,
            last_error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of [`crate::persistence::WebhookEventStore::reserve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The caller owns this attempt and must mark it processed or failed.
    Reserved(WebhookEvent),
    /// Already applied; the cached result must be returned as-is.
    DuplicateProcessed(WebhookEvent),
    /// Another handler is applying it right now.
    DuplicateProcessing(WebhookEvent),
}

/// `event:intent:tx:sha256(payload)`.
///
/// The payload is hashed in canonical form (object keys sorted at every
/// depth) so that key order does not split one logical event in two.
#[must_use]
pub fn dedupe_key(
    event_type: WebhookEventType,
    intent_id: IntentId,
    tx_hash: Option<&str>,
    payload: &serde_json::Value,
) -> String {
    let mut canonical = String::new();
    write_canonical(payload, &mut canonical);
    let payload_hash = hex::encode(Sha256::digest(canonical.as_bytes()));
    format!(
        "{}:{}:{}:{}",
        event_type.as_str(),
        intent_id,
        tx_hash.unwrap_or("-"),
        payload_hash
    )
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
