//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::IntentStatus;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2103,
///     "message": "intent ... is expired; cannot move to registered",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`GatewayError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Milliseconds until a rate-limited call may be retried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1099 | Validation      | 400 Bad Request             |
/// | 1100–1199 | Authentication  | 401 Unauthorized / 403      |
/// | 2000–2099 | Not Found       | 404 Not Found               |
/// | 2100–2199 | Conflict        | 409 Conflict                |
/// | 3000–3099 | Server          | 500 Internal Server Error   |
/// | 3100–3199 | Upstream        | 502 Bad Gateway             |
/// | 429       | Rate limited    | 429 Too Many Requests       |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or wrong credentials / signature.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Signature timestamp outside the accepted window.
    #[error("signature expired: timestamp skew of {skew_secs}s exceeds {ttl_secs}s")]
    SignatureExpired {
        /// Absolute distance between the signed timestamp and now.
        skew_secs: u64,
        /// Configured tolerance.
        ttl_secs: u64,
    },

    /// Caller address is not on the allowlist.
    #[error("caller address not allowed: {0}")]
    IpNotAllowed(String),

    /// Plain HTTP request to an endpoint that enforces HTTPS.
    #[error("https required")]
    HttpsRequired,

    /// Purchase intent with the given ID was not found.
    #[error("intent not found: {0}")]
    IntentNotFound(uuid::Uuid),

    /// Webhook event with the given ID was not found.
    #[error("webhook event not found: {0}")]
    EventNotFound(uuid::Uuid),

    /// Identity record for the given domain was not found.
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// Another intent already claimed this commitment.
    #[error("commitment already claimed: {0}")]
    DuplicateCommitment(String),

    /// Another intent already claimed this transaction hash.
    #[error("{field} already claimed: {tx_hash}")]
    DuplicateTxHash {
        /// Which column collided (`commit_tx_hash` / `register_tx_hash`).
        field: &'static str,
        /// The colliding hash.
        tx_hash: String,
    },

    /// The intent is not in a state from which the requested move is legal.
    #[error("intent {intent_id} is {status}; cannot move to {target}")]
    InvalidTransition {
        /// Intent identifier.
        intent_id: uuid::Uuid,
        /// Current status.
        status: IntentStatus,
        /// Requested status.
        target: IntentStatus,
    },

    /// The intent already records a different hash of this kind.
    #[error("{field} already set to {existing}")]
    TxHashAlreadySet {
        /// Which column is occupied.
        field: &'static str,
        /// The recorded hash.
        existing: String,
    },

    /// The registration could not be confirmed against on-chain ownership.
    #[error("ownership not verified for {domain}: {reason}")]
    OwnershipNotVerified {
        /// Domain being confirmed.
        domain: String,
        /// Why verification failed.
        reason: String,
    },

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Chain RPC failure or timeout.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Cooldown for this operation has not elapsed yet.
    #[error("rate limit exceeded; retry after {retry_after_ms} ms")]
    RateLimited {
        /// Milliseconds until the client may retry.
        retry_after_ms: u64,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Unauthorized(_) => 1101,
            Self::SignatureExpired { .. } => 1102,
            Self::IpNotAllowed(_) => 1103,
            Self::HttpsRequired => 1104,
            Self::IntentNotFound(_) => 2001,
            Self::EventNotFound(_) => 2002,
            Self::IdentityNotFound(_) => 2003,
            Self::DuplicateCommitment(_) => 2101,
            Self::DuplicateTxHash { .. } => 2102,
            Self::InvalidTransition { .. } => 2103,
            Self::OwnershipNotVerified { .. } => 2104,
            Self::TxHashAlreadySet { .. } => 2105,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::Upstream(_) => 3101,
            Self::RateLimited { .. } => 429,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) | Self::SignatureExpired { .. } => StatusCode::UNAUTHORIZED,
            Self::IpNotAllowed(_) | Self::HttpsRequired => StatusCode::FORBIDDEN,
            Self::IntentNotFound(_) | Self::EventNotFound(_) | Self::IdentityNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::DuplicateCommitment(_)
            | Self::DuplicateTxHash { .. }
            | Self::InvalidTransition { .. }
            | Self::TxHashAlreadySet { .. }
            | Self::OwnershipNotVerified { .. } => StatusCode::CONFLICT,
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Whether the caller can expect a later attempt of the same call to
    /// succeed without any change on its side.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream(_)
                | Self::PersistenceError(_)
                | Self::RateLimited { .. }
                | Self::OwnershipNotVerified { .. }
        )
    }

    /// Returns `true` for the conflict family (2100–2199).
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DuplicateCommitment(_)
                | Self::DuplicateTxHash { .. }
                | Self::InvalidTransition { .. }
                | Self::TxHashAlreadySet { .. }
                | Self::OwnershipNotVerified { .. }
        )
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after_ms = match &self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
                retry_after_ms,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        if let Some(ms) = retry_after_ms {
            let secs = ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_family_maps_to_409() {
        let err = GatewayError::DuplicateTxHash {
            field: "commit_tx_hash",
            tx_hash: "0xaa".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.is_conflict());
        assert_eq!(err.error_code(), 2102);
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = GatewayError::RateLimited {
            retry_after_ms: 1500,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let header = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok());
        assert_eq!(header, Some("2"));
    }

    #[test]
    fn expired_signature_is_unauthorized() {
        let err = GatewayError::SignatureExpired {
            skew_secs: 900,
            ttl_secs: 300,
        };
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(!err.is_retryable());
    }
}
