//! Request and response bodies for the user-facing intent endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::PurchaseIntent;

/// Body of `POST /api/v1/intents`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    /// Application user the name is bought for.
    pub user_id: String,
    /// Wallet that will own the name.
    pub wallet_address: String,
    /// Label to register, without the TLD.
    pub label: String,
    /// TLD; defaults to `eth`.
    #[serde(default)]
    pub tld: Option<String>,
    /// Registration duration in seconds (at least 28 days).
    pub duration_seconds: i64,
    /// Client-held 32-byte secret as `0x` hex. Generated when absent.
    #[serde(default)]
    pub secret: Option<String>,
}

/// Response of `POST /api/v1/intents`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    /// The prepared intent.
    pub intent: PurchaseIntent,
    /// Commitment to submit on-chain.
    pub commitment: String,
    /// Server-generated secret. Returned once and never stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Body of the tx-hash attachment endpoints.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttachTxRequest {
    /// Transaction hash as `0x` hex.
    pub tx_hash: String,
}
