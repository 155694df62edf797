//! Internal control plane: retries, expiries, sweeps, queue and audit.
//!
//! Every route here sits behind
//! [`require_internal_auth`](crate::api::middleware::require_internal_auth),
//! which supplies the [`OpsContext`].

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};

use crate::api::dto::{
    AuditListResponse, AuditParams, PauseQueueRequest, QueueBulkRequest, QueueCancelResponse,
    QueueRequeueResponse, ReasonRequest, ReconcileRequest,
};
use crate::app_state::AppState;
use crate::domain::{AuditQuery, IntentId, PurchaseIntent, QueueControl, QueueStatus};
use crate::error::{ErrorResponse, GatewayError};
use crate::service::{OpsContext, QueueStatusReport, ReconcileOptions, ReconcileReport};

/// `POST /internal/intents/{id}/retry`: Revive an expired or failed intent.
///
/// # Errors
///
/// Returns 429 inside the per-intent cooldown and 409 unless the intent is
/// expired or failed.
#[utoipa::path(
    post,
    path = "/internal/intents/{id}/retry",
    tag = "Internal",
    summary = "Retry intent",
    description = "Moves an expired or failed intent back to `committed` when a commit was observed, otherwise to `prepared`.",
    params(("id" = String, Path, description = "Intent UUID")),
    request_body(content = ReasonRequest, description = "Optional reason"),
    responses(
        (status = 200, description = "Intent revived", body = PurchaseIntent),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Intent not found", body = ErrorResponse),
        (status = 409, description = "Intent not retryable", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ErrorResponse),
    )
)]
pub async fn retry_intent(
    State(state): State<AppState>,
    Extension(ctx): Extension<OpsContext>,
    Path(id): Path<uuid::Uuid>,
    body: Option<Json<ReasonRequest>>,
) -> Result<impl IntoResponse, GatewayError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let intent = state
        .ops
        .retry_intent(&ctx, IntentId::from_uuid(id), reason)
        .await?;
    Ok((StatusCode::OK, Json(intent)))
}

/// `POST /internal/intents/{id}/expire`: Expire a pending intent by hand.
///
/// # Errors
///
/// Returns 429 inside the per-intent cooldown and 409 for terminal intents.
#[utoipa::path(
    post,
    path = "/internal/intents/{id}/expire",
    tag = "Internal",
    summary = "Expire intent",
    params(("id" = String, Path, description = "Intent UUID")),
    request_body(content = ReasonRequest, description = "Optional reason"),
    responses(
        (status = 200, description = "Intent expired", body = PurchaseIntent),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Intent not found", body = ErrorResponse),
        (status = 409, description = "Intent already terminal", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ErrorResponse),
    )
)]
pub async fn expire_intent(
    State(state): State<AppState>,
    Extension(ctx): Extension<OpsContext>,
    Path(id): Path<uuid::Uuid>,
    body: Option<Json<ReasonRequest>>,
) -> Result<impl IntoResponse, GatewayError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let intent = state
        .ops
        .expire_intent(&ctx, IntentId::from_uuid(id), reason)
        .await?;
    Ok((StatusCode::OK, Json(intent)))
}

/// `POST /internal/reconcile`: Run the tx watcher and the stale reconciler.
///
/// # Errors
///
/// Returns 429 inside the cooldown (real runs only).
#[utoipa::path(
    post,
    path = "/internal/reconcile",
    tag = "Internal",
    summary = "Run reconciliation once",
    description = "Runs both sweeps and returns their summaries. With `dryRun` nothing is written and no cooldown is consumed.",
    request_body(content = ReconcileRequest, description = "Optional overrides"),
    responses(
        (status = 200, description = "Sweep summaries", body = ReconcileReport),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ErrorResponse),
    )
)]
pub async fn reconcile(
    State(state): State<AppState>,
    Extension(ctx): Extension<OpsContext>,
    body: Option<Json<ReconcileRequest>>,
) -> Result<impl IntoResponse, GatewayError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let options = ReconcileOptions {
        limit: req.limit,
        stale_minutes: req.stale_minutes,
        dry_run: req.dry_run,
    };
    let report = state.ops.reconcile(&ctx, options).await?;
    Ok((StatusCode::OK, Json(report)))
}

/// `POST /internal/queue/cancel`: Delete search-sync entries.
///
/// Without `statuses` only dead-lettered entries are matched.
///
/// # Errors
///
/// Returns 429 inside the cooldown (real runs only).
#[utoipa::path(
    post,
    path = "/internal/queue/cancel",
    tag = "Internal",
    summary = "Cancel queue entries",
    request_body = QueueBulkRequest,
    responses(
        (status = 200, description = "Cancel outcome", body = QueueCancelResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ErrorResponse),
    )
)]
pub async fn cancel_queue(
    State(state): State<AppState>,
    Extension(ctx): Extension<OpsContext>,
    Json(req): Json<QueueBulkRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let filter = req.to_filter(&[QueueStatus::DeadLetter]);
    let outcome = state.ops.cancel_queue(&ctx, filter, req.dry_run).await?;
    Ok((StatusCode::OK, Json(QueueCancelResponse::from(outcome))))
}

/// `POST /internal/queue/requeue-dead-letter`: Move dead-lettered entries
/// back to pending.
///
/// # Errors
///
/// Returns 429 inside the cooldown (real runs only).
#[utoipa::path(
    post,
    path = "/internal/queue/requeue-dead-letter",
    tag = "Internal",
    summary = "Requeue dead-lettered entries",
    request_body = QueueBulkRequest,
    responses(
        (status = 200, description = "Requeue outcome", body = QueueRequeueResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ErrorResponse),
    )
)]
pub async fn requeue_dead_letter(
    State(state): State<AppState>,
    Extension(ctx): Extension<OpsContext>,
    Json(req): Json<QueueBulkRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let filter = req.to_filter(&[QueueStatus::DeadLetter]);
    let outcome = state.ops.requeue_queue(&ctx, filter, req.dry_run).await?;
    Ok((StatusCode::OK, Json(QueueRequeueResponse::from(outcome))))
}

/// `POST /internal/queue/pause`: Pause or resume the search-sync queue.
///
/// # Errors
///
/// Returns [`GatewayError::PersistenceError`] on storage failure.
#[utoipa::path(
    post,
    path = "/internal/queue/pause",
    tag = "Internal",
    summary = "Pause or resume the queue",
    request_body = PauseQueueRequest,
    responses(
        (status = 200, description = "New queue control", body = QueueControl),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
    )
)]
pub async fn pause_queue(
    State(state): State<AppState>,
    Extension(ctx): Extension<OpsContext>,
    Json(req): Json<PauseQueueRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let control = state
        .ops
        .pause_queue(&ctx, req.paused, req.reason, req.paused_by)
        .await?;
    Ok((StatusCode::OK, Json(control)))
}

/// `GET /internal/queue/status`: Pause flag and per-status counts.
///
/// # Errors
///
/// Returns [`GatewayError::PersistenceError`] on storage failure.
#[utoipa::path(
    get,
    path = "/internal/queue/status",
    tag = "Internal",
    summary = "Queue status",
    responses(
        (status = 200, description = "Queue status", body = QueueStatusReport),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
    )
)]
pub async fn queue_status(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    let report = state.ops.queue_status().await?;
    Ok((StatusCode::OK, Json(report)))
}

/// `GET /internal/audit`: Newest-first audit trail.
///
/// # Errors
///
/// Returns [`GatewayError::PersistenceError`] on storage failure.
#[utoipa::path(
    get,
    path = "/internal/audit",
    tag = "Internal",
    summary = "List audit events",
    params(AuditParams),
    responses(
        (status = 200, description = "Audit events", body = AuditListResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
    )
)]
pub async fn list_audit(
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let data = state.ops.list_audit(&AuditQuery::from(params)).await?;
    Ok((StatusCode::OK, Json(AuditListResponse { data })))
}

/// Internal routes, mounted at `/internal` behind the auth layer.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/intents/{id}/retry", post(retry_intent))
        .route("/intents/{id}/expire", post(expire_intent))
        .route("/reconcile", post(reconcile))
        .route("/queue/cancel", post(cancel_queue))
        .route("/queue/requeue-dead-letter", post(requeue_dead_letter))
        .route("/queue/pause", post(pause_queue))
        .route("/queue/status", get(queue_status))
        .route("/audit", get(list_audit))
}
