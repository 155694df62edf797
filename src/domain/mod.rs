//! Domain layer: the purchase-intent state machine, webhook events, queue
//! entries, identities and the audit trail.
//!
//! Nothing here performs I/O. Stores and services build on these types.

pub mod audit;
pub mod clock;
pub mod commitment;
pub mod identity;
pub mod intent;
pub mod intent_id;
pub mod lifecycle;
pub mod queue_entry;
pub mod sweep;
pub mod webhook_event;

pub use audit::{AuditEvent, AuditOutcome, AuditQuery, NewAuditEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{Identity, OwnershipCheck, OwnershipVerdict};
pub use intent::{
    CommitmentWindow, IntentPatch, IntentStatus, IntentTiming, PurchaseIntent, Transition,
    TransitionOutcome, TxKind,
};
pub use intent_id::IntentId;
pub use lifecycle::RegistrationDecision;
pub use queue_entry::{
    BulkOutcome, EnqueueOutcome, QueueControl, QueueEntry, QueueFilter, QueueStatus,
};
pub use sweep::SweepSummary;
pub use webhook_event::{
    NewWebhookEvent, Reservation, WebhookEvent, WebhookEventStatus, WebhookEventType,
};
