//! OpenAPI document for every public and internal endpoint.

use utoipa::OpenApi;

use crate::api::handlers::{intents, ops, system, webhook};

/// Generated OpenAPI description, served as `/api-docs/openapi.json`.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "ENS intent gateway",
        description = "Tracks commit-reveal ENS purchases from webhooks and chain reads."
    ),
    paths(
        system::health_handler,
        webhook::receive_webhook,
        intents::create_intent,
        intents::get_intent,
        intents::attach_commit_tx,
        intents::attach_register_tx,
        intents::get_identity,
        ops::retry_intent,
        ops::expire_intent,
        ops::reconcile,
        ops::cancel_queue,
        ops::requeue_dead_letter,
        ops::pause_queue,
        ops::queue_status,
        ops::list_audit,
    ),
    tags(
        (name = "System", description = "Liveness"),
        (name = "Webhook", description = "Signed transaction notifications"),
        (name = "Intents", description = "Purchase intents and identities"),
        (name = "Internal", description = "Authenticated operator control plane"),
    )
)]
pub struct ApiDoc;

/// Path of the generated document.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_internal_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/internal/reconcile"));
        assert!(doc.paths.paths.contains_key("/api/v1/intents/{id}/commit-tx"));
        assert!(doc.paths.paths.contains_key("/webhook"));
    }
}
