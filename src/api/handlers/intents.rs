//! User-facing intent handlers: create, get, attach tx hashes, identities.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{AttachTxRequest, CreateIntentRequest, CreateIntentResponse};
use crate::app_state::AppState;
use crate::domain::{Identity, IntentId, PurchaseIntent, TxKind};
use crate::error::{ErrorResponse, GatewayError};
use crate::service::CreateIntent;

/// `POST /intents`: Prepare a purchase intent and return its commitment.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for a bad label, wallet, secret
/// or duration and [`GatewayError::DuplicateCommitment`] when the
/// commitment is already tracked.
#[utoipa::path(
    post,
    path = "/api/v1/intents",
    tag = "Intents",
    summary = "Create a purchase intent",
    description = "Computes the registrar commitment for the label, owner, duration and secret, reads the commitment-age window from the controller and stores the intent as `prepared`. When no secret is supplied one is generated and returned exactly once.",
    request_body = CreateIntentRequest,
    responses(
        (status = 201, description = "Intent prepared", body = CreateIntentResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 409, description = "Commitment already tracked", body = ErrorResponse),
    )
)]
pub async fn create_intent(
    State(state): State<AppState>,
    Json(req): Json<CreateIntentRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let created = state
        .intents
        .create_intent(CreateIntent {
            user_id: req.user_id,
            wallet_address: req.wallet_address,
            label: req.label,
            tld: req.tld,
            duration_seconds: req.duration_seconds,
            secret: req.secret,
        })
        .await?;

    let response = CreateIntentResponse {
        commitment: created.intent.commitment.clone(),
        intent: created.intent,
        secret: created.secret,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /intents/{id}`: Fetch one intent.
///
/// # Errors
///
/// Returns [`GatewayError::IntentNotFound`] if the intent does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/intents/{id}",
    tag = "Intents",
    summary = "Get intent",
    params(("id" = String, Path, description = "Intent UUID")),
    responses(
        (status = 200, description = "Intent", body = PurchaseIntent),
        (status = 404, description = "Intent not found", body = ErrorResponse),
    )
)]
pub async fn get_intent(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, GatewayError> {
    let intent = state.intents.get_intent(IntentId::from_uuid(id)).await?;
    Ok((StatusCode::OK, Json(intent)))
}

/// `POST /intents/{id}/commit-tx`: Record the user's commit transaction.
///
/// # Errors
///
/// Returns a conflict when another hash is recorded or another intent owns
/// this one.
#[utoipa::path(
    post,
    path = "/api/v1/intents/{id}/commit-tx",
    tag = "Intents",
    summary = "Attach commit transaction",
    description = "Stores the commit transaction hash so the watcher can follow it. Re-submitting the same hash is a no-op.",
    params(("id" = String, Path, description = "Intent UUID")),
    request_body = AttachTxRequest,
    responses(
        (status = 200, description = "Intent with hash attached", body = PurchaseIntent),
        (status = 400, description = "Malformed hash", body = ErrorResponse),
        (status = 404, description = "Intent not found", body = ErrorResponse),
        (status = 409, description = "Hash conflict or terminal intent", body = ErrorResponse),
    )
)]
pub async fn attach_commit_tx(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<AttachTxRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    attach(&state, id, TxKind::Commit, &req.tx_hash).await
}

/// `POST /intents/{id}/register-tx`: Record the user's register transaction.
///
/// # Errors
///
/// Returns a conflict when another hash is recorded or another intent owns
/// this one.
#[utoipa::path(
    post,
    path = "/api/v1/intents/{id}/register-tx",
    tag = "Intents",
    summary = "Attach register transaction",
    params(("id" = String, Path, description = "Intent UUID")),
    request_body = AttachTxRequest,
    responses(
        (status = 200, description = "Intent with hash attached", body = PurchaseIntent),
        (status = 400, description = "Malformed hash", body = ErrorResponse),
        (status = 404, description = "Intent not found", body = ErrorResponse),
        (status = 409, description = "Hash conflict or terminal intent", body = ErrorResponse),
    )
)]
pub async fn attach_register_tx(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<AttachTxRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    attach(&state, id, TxKind::Register, &req.tx_hash).await
}

async fn attach(
    state: &AppState,
    id: uuid::Uuid,
    kind: TxKind,
    tx_hash: &str,
) -> Result<(StatusCode, Json<PurchaseIntent>), GatewayError> {
    let intent = state
        .intents
        .attach_tx_hash(IntentId::from_uuid(id), kind, tx_hash)
        .await?;
    Ok((StatusCode::OK, Json(intent)))
}

/// `GET /identities/{domain}`: Fetch a registered identity.
///
/// # Errors
///
/// Returns [`GatewayError::IdentityNotFound`] if nothing is registered.
#[utoipa::path(
    get,
    path = "/api/v1/identities/{domain}",
    tag = "Intents",
    summary = "Get identity",
    params(("domain" = String, Path, description = "Full name, e.g. `alice.eth`")),
    responses(
        (status = 200, description = "Identity", body = Identity),
        (status = 404, description = "Identity not found", body = ErrorResponse),
    )
)]
pub async fn get_identity(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let identity = state.intents.get_identity(&domain).await?;
    Ok((StatusCode::OK, Json(identity)))
}

/// Intent routes mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/intents", post(create_intent))
        .route("/intents/{id}", get(get_intent))
        .route("/intents/{id}/commit-tx", post(attach_commit_tx))
        .route("/intents/{id}/register-tx", post(attach_register_tx))
        .route("/identities/{domain}", get(get_identity))
}
