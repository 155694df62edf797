//! Service layer: business logic orchestration.
//!
//! [`IntentService`] owns every write to a purchase intent. The webhook
//! engine, the chain sweeps and the ops control plane all go through it,
//! so each path applies the same guarded transitions.

pub mod intent_service;
pub mod ops_service;
pub mod reconciler;
pub mod retry_queue;
pub mod search_sync;
pub mod webhook_auth;
pub mod webhook_service;

pub use intent_service::{CommitSource, CreateIntent, CreatedIntent, IntentService, Observation};
pub use ops_service::{OpsContext, OpsService, ReconcileOptions, ReconcileReport};
pub use reconciler::Reconciler;
pub use retry_queue::{QueueStatusReport, RetryQueue};
pub use search_sync::{HttpSearchIndexer, SearchIndexer, SearchSyncWorker, SyncReport};
pub use webhook_auth::WebhookVerifier;
pub use webhook_service::{WebhookResponse, WebhookService};
