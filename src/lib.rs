//! # ens-intent-gateway
//!
//! Tracks commit-reveal ENS purchases from the first commitment quote to a
//! verified on-chain registration.
//!
//! Two independent signal sources drive every purchase intent forward:
//! signed webhooks pushed by the transaction relayer, and periodic chain
//! sweeps that read the registrar directly. Both funnel into status-guarded
//! conditional transitions, so whichever observes a fact first wins and the
//! other becomes a no-op. Operators reach the system only through an
//! authenticated, cooldown-gated and audited `/internal` API.
//!
//! ## Architecture
//!
//! ```text
//! Relayer (webhooks)     Users (REST)      Operators (/internal)
//!     │                      │                    │
//!     ├── WebhookVerifier    │              require_internal_auth
//!     ├── WebhookService ────┼── IntentService ── OpsService
//!     │                      │        │               │
//!     │              Reconciler (tx watcher, stale sweep)
//!     │                      │        │
//!     │                ChainClient    RetryQueue ── SearchSyncWorker
//!     │                                   │
//!     └──────────────── Store (PostgreSQL or in-memory)
//! ```

pub mod api;
pub mod app_state;
pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod persistence;
pub mod service;
pub mod testing;
