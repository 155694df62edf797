//! End-to-end tests through the full router.

#![allow(clippy::panic)]

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use chrono::Duration;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::build_router;
use crate::domain::Clock;
use crate::service::webhook_auth::{SIGNATURE_HEADER, TIMESTAMP_HEADER, sign};
use crate::testing::{Harness, OPS_SECRET, SAMPLE_WALLET, WEBHOOK_SECRET};

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

async fn send(app: &Router, request: Request<Body>) -> Reply {
    let Ok(response) = app.clone().oneshot(request).await else {
        panic!("router failed");
    };
    let status = response.status();
    let headers = response.headers().clone();
    let Ok(collected) = response.into_body().collect().await else {
        panic!("body read failed");
    };
    let bytes = collected.to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Reply {
        status,
        headers,
        body,
    }
}

fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    let Ok(request) = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
    else {
        panic!("bad request");
    };
    request
}

fn internal(method: Method, uri: &str, body: Option<&Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-internal-secret", OPS_SECRET)
        .header("x-internal-actor", "router-test");
    let built = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    };
    let Ok(request) = built else {
        panic!("bad request");
    };
    request
}

fn signed_webhook(harness: &Harness, body: &Value, secret: &str) -> Request<Body> {
    let raw = body.to_string();
    let ts = harness.clock.now().timestamp().to_string();
    let Ok(signature) = sign(secret, &ts, raw.as_bytes()) else {
        panic!("signing failed");
    };
    let Ok(request) = Request::builder()
        .method(Method::POST)
        .uri("/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header(TIMESTAMP_HEADER, ts)
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(raw))
    else {
        panic!("bad request");
    };
    request
}

fn tx(byte: &str) -> String {
    format!("0x{}", byte.repeat(32))
}

#[tokio::test]
async fn health_reports_version() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());
    let Ok(request) = Request::builder().uri("/health").body(Body::empty()) else {
        panic!("bad request");
    };
    let reply = send(&app, request).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "healthy");
}

#[tokio::test]
async fn create_then_commit_webhook_then_replay() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());

    let created = send(
        &app,
        json_request(
            Method::POST,
            "/api/v1/intents",
            &json!({
                "userId": "user-1",
                "walletAddress": SAMPLE_WALLET,
                "label": "Alice",
                "durationSeconds": 31_536_000,
            }),
        ),
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["intent"]["status"], "prepared");
    assert_eq!(created.body["intent"]["domainName"], "alice.eth");
    assert!(created.body["secret"].is_string());
    let Some(id) = created.body["intent"]["id"].as_str().map(str::to_string) else {
        panic!("no intent id");
    };

    let webhook = json!({
        "event": "commit.confirmed",
        "data": { "intentId": id, "txHash": tx("aa") },
    });
    let first = send(&app, signed_webhook(&harness, &webhook, WEBHOOK_SECRET)).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["deduplicated"], false);
    assert_eq!(first.body["intent"]["status"], "committed");

    let replay = send(&app, signed_webhook(&harness, &webhook, WEBHOOK_SECRET)).await;
    assert_eq!(replay.status, StatusCode::OK);
    assert_eq!(replay.body["deduplicated"], true);
    assert_eq!(replay.body["intent"], first.body["intent"]);
}

#[tokio::test]
async fn webhook_signature_failures_are_unauthorized() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());
    let webhook = json!({
        "event": "commit.confirmed",
        "data": { "intentId": uuid::Uuid::new_v4().to_string() },
    });

    let forged = send(&app, signed_webhook(&harness, &webhook, "not-the-secret")).await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
    assert_eq!(forged.body["error"]["code"], 1101);

    let unsigned = send(&app, json_request(Method::POST, "/webhook", &webhook)).await;
    assert_eq!(unsigned.status, StatusCode::UNAUTHORIZED);

    let stale = signed_webhook(&harness, &webhook, WEBHOOK_SECRET);
    harness.clock.advance(Duration::minutes(10));
    let stale = send(&app, stale).await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    assert_eq!(stale.body["error"]["code"], 1102);
}

#[tokio::test]
async fn reconcile_expiry_then_retry_hits_cooldown() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());
    let Ok(intent) = harness.seed_intent().await else {
        panic!("seed failed");
    };
    harness.clock.advance(Duration::days(2));

    let reconciled = send(
        &app,
        internal(Method::POST, "/internal/reconcile", Some(&json!({}))),
    )
    .await;
    assert_eq!(reconciled.status, StatusCode::OK);
    assert_eq!(reconciled.body["reconciler"]["expired"], 1);

    let retry_uri = format!("/internal/intents/{}/retry", intent.id);
    let retry = send(&app, internal(Method::POST, &retry_uri, None)).await;
    assert_eq!(retry.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(retry.body["error"]["retryAfterMs"].as_u64().is_some_and(|ms| ms > 0));
    assert!(retry.headers.contains_key(header::RETRY_AFTER));

    harness.clock.advance(Duration::seconds(61));
    let retry = send(&app, internal(Method::POST, &retry_uri, None)).await;
    assert_eq!(retry.status, StatusCode::OK);
    assert_eq!(retry.body["status"], "prepared");
}

#[tokio::test]
async fn internal_routes_require_a_secret() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());

    let Ok(anonymous) = Request::builder()
        .uri("/internal/queue/status")
        .body(Body::empty())
    else {
        panic!("bad request");
    };
    assert_eq!(send(&app, anonymous).await.status, StatusCode::UNAUTHORIZED);

    let Ok(bearer) = Request::builder()
        .uri("/internal/queue/status")
        .header(header::AUTHORIZATION, format!("Bearer {OPS_SECRET}"))
        .body(Body::empty())
    else {
        panic!("bad request");
    };
    let reply = send(&app, bearer).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["control"]["paused"], false);
    assert_eq!(reply.body["counts"]["dead_letter"], 0);
}

#[tokio::test]
async fn attaching_a_different_hash_conflicts() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());
    let Ok(intent) = harness.seed_intent().await else {
        panic!("seed failed");
    };
    let uri = format!("/api/v1/intents/{}/commit-tx", intent.id);

    let first = send(&app, json_request(Method::POST, &uri, &json!({ "txHash": tx("ab") }))).await;
    assert_eq!(first.status, StatusCode::OK);
    let same = send(&app, json_request(Method::POST, &uri, &json!({ "txHash": tx("ab") }))).await;
    assert_eq!(same.status, StatusCode::OK);
    let other = send(&app, json_request(Method::POST, &uri, &json!({ "txHash": tx("cd") }))).await;
    assert_eq!(other.status, StatusCode::CONFLICT);
    assert_eq!(other.body["error"]["code"], 2105);
}

#[tokio::test]
async fn queue_requeue_dry_run_and_audit_listing() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());

    let requeue = send(
        &app,
        internal(
            Method::POST,
            "/internal/queue/requeue-dead-letter",
            Some(&json!({ "dryRun": true })),
        ),
    )
    .await;
    assert_eq!(requeue.status, StatusCode::OK);
    assert_eq!(requeue.body["dryRun"], true);
    assert_eq!(requeue.body["requeued"], 0);

    let audit = send(&app, internal(Method::GET, "/internal/audit?limit=5", None)).await;
    assert_eq!(audit.status, StatusCode::OK);
    let Some(events) = audit.body["data"].as_array() else {
        panic!("audit data missing");
    };
    assert_eq!(events.len(), 1);
    let Some(event) = events.first() else {
        panic!("audit event missing");
    };
    assert_eq!(event["operation"], "queue.requeue");
    assert_eq!(event["actor"], "router-test");
    assert_eq!(event["requestPath"], "/internal/queue/requeue-dead-letter");
}

#[tokio::test]
async fn unknown_identity_is_not_found() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());
    let Ok(request) = Request::builder()
        .uri("/api/v1/identities/nobody.eth")
        .body(Body::empty())
    else {
        panic!("bad request");
    };
    let reply = send(&app, request).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["error"]["code"], 2003);
}

#[tokio::test]
async fn concurrent_and_repeated_webhook_deliveries_apply_once() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());
    let Ok(intent) = harness.seed_intent().await else {
        panic!("seed failed");
    };
    let webhook = json!({
        "event": "commit.confirmed",
        "data": { "intentId": intent.id.to_string(), "txHash": tx("ee") },
    });

    let mut deliveries = tokio::task::JoinSet::new();
    for _ in 0..5 {
        let app = app.clone();
        let request = signed_webhook(&harness, &webhook, WEBHOOK_SECRET);
        deliveries.spawn(async move { send(&app, request).await });
    }
    let mut fresh = 0;
    let mut deduplicated = 0;
    while let Some(joined) = deliveries.join_next().await {
        let Ok(reply) = joined else {
            panic!("delivery task failed");
        };
        assert_eq!(reply.status, StatusCode::OK);
        match reply.body["deduplicated"].as_bool() {
            Some(false) => fresh += 1,
            Some(true) => deduplicated += 1,
            None => panic!("deduplicated flag missing"),
        }
    }
    assert_eq!((fresh, deduplicated), (1, 4));

    for _ in 0..3 {
        let replay = send(&app, signed_webhook(&harness, &webhook, WEBHOOK_SECRET)).await;
        assert_eq!(replay.status, StatusCode::OK);
        assert_eq!(replay.body["deduplicated"], true);
        assert_eq!(replay.body["intent"]["status"], "committed");
    }

    let Ok(stored) = harness.state.intents.get_intent(intent.id).await else {
        panic!("intent vanished");
    };
    assert_eq!(stored.status, crate::domain::IntentStatus::Committed);
    assert_eq!(stored.commit_tx_hash, Some(tx("ee")));
}

#[tokio::test]
async fn requeue_dry_run_leaves_dead_letters_in_place() {
    let harness = Harness::new();
    let app = build_router(harness.state.clone());
    let queue = &harness.state.search_queue;
    for domain in ["alice.eth", "bob.eth"] {
        let _ = queue.enqueue("identity", domain, json!({ "domainName": domain })).await;
    }
    for _ in 0..3 {
        let Ok(batch) = queue.claim_next_batch(10).await else {
            panic!("claim failed");
        };
        for entry in &batch {
            let _ = queue.mark_failed(entry, "index down").await;
        }
    }

    let status = || internal(Method::GET, "/internal/queue/status", None);
    let before = send(&app, status()).await;
    assert_eq!(before.body["counts"]["dead_letter"], 2);

    let preview = send(
        &app,
        internal(
            Method::POST,
            "/internal/queue/requeue-dead-letter",
            Some(&json!({ "dryRun": true })),
        ),
    )
    .await;
    assert_eq!(preview.status, StatusCode::OK);
    assert_eq!(preview.body["selected"], 2);
    assert_eq!(preview.body["wouldRequeue"], 2);
    assert_eq!(preview.body["requeued"], 0);

    let after = send(&app, status()).await;
    assert_eq!(after.body["counts"], before.body["counts"]);

    let real = send(
        &app,
        internal(
            Method::POST,
            "/internal/queue/requeue-dead-letter",
            Some(&json!({ "dryRun": false })),
        ),
    )
    .await;
    assert_eq!(real.status, StatusCode::OK);
    assert_eq!(real.body["requeued"], 2);
    let requeued = send(&app, status()).await;
    assert_eq!(requeued.body["counts"]["dead_letter"], 0);
    assert_eq!(requeued.body["counts"]["pending"], 2);
}
