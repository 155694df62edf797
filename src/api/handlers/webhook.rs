//! Signed webhook ingestion.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};
use crate::service::webhook_auth::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::service::webhook_service::WebhookPayload;
use crate::service::WebhookResponse;

/// Largest accepted webhook body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// `POST /webhook`: Apply a commit or registration notification.
///
/// The raw body is authenticated before it is parsed. Replays of an
/// already processed event return the cached response with
/// `deduplicated: true`.
///
/// # Errors
///
/// Returns 401 for bad or stale signatures, 403 for callers outside the
/// allowlist, 400 for malformed payloads and 409 when the transition
/// conflicts with the intent's state.
#[utoipa::path(
    post,
    path = "/webhook",
    tag = "Webhook",
    summary = "Receive a signed webhook",
    description = "Verifies `X-Webhook-Timestamp` and `X-Webhook-Signature` (hex HMAC-SHA256 of `{timestamp}.{body}`) against every configured secret, reserves the event by dedupe key and applies it once.",
    request_body = WebhookPayload,
    responses(
        (status = 200, description = "Event applied or safely deduplicated", body = WebhookResponse),
        (status = 400, description = "Malformed payload", body = ErrorResponse),
        (status = 401, description = "Bad or expired signature", body = ErrorResponse),
        (status = 403, description = "Caller not allowed", body = ErrorResponse),
        (status = 409, description = "Business conflict", body = ErrorResponse),
    )
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    request: Request,
) -> Result<impl IntoResponse, GatewayError> {
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    state
        .webhook_verifier
        .check_ip(header(&parts.headers, "x-forwarded-for"), peer)?;

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::InvalidRequest(format!("unreadable webhook body: {e}")))?;
    state.webhook_verifier.verify(
        header(&parts.headers, TIMESTAMP_HEADER),
        header(&parts.headers, SIGNATURE_HEADER),
        &bytes,
        state.clock.now(),
    )?;

    let payload: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::InvalidRequest(format!("webhook body is not JSON: {e}")))?;
    let response = state.webhooks.handle(payload).await?;
    Ok((StatusCode::OK, Json(response)))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Webhook route, mounted at the root.
pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook", post(receive_webhook))
}
