//! Directory drift synchronization core for dirsync.
//!
//! Keeps a downstream LDAP-style directory consistent with an upstream
//! identity source. The orchestrator runs periodic sync cycles that
//! provision users and groups, then hands the post-sync rosters to the
//! reconciliation engine, which classifies remaining drift into reviewable
//! change records. Changes move through an approve/reject/apply lifecycle
//! with a full audit trail; rows are never deleted.
//!
//! Directory access goes through the `dirsync-gateway` traits, persistence
//! through the [`store`] traits (Postgres implementations included), and
//! status/log/change notifications through [`events::EventSink`].

pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod model;
pub mod orchestrator;
pub mod reconcile;
pub mod store;

pub use config::SyncSettings;
pub use error::{SyncError, SyncResult};
pub use events::{EventSink, NoopEventSink, Topic};
pub use lifecycle::ChangeLifecycle;
pub use model::{
    AuditEntry, AuditSource, Change, ChangeCandidate, ChangeStatus, ChangeType, CycleCounts,
    CycleError, CycleStatus, EntityType, SyncCycleRecord,
};
pub use orchestrator::{SyncOrchestrator, SyncStateSnapshot, SyncStatus};
pub use reconcile::{Detection, ReconciliationEngine};
pub use store::{
    AuditQuery, AuditStats, AuditTrail, ChangeFilter, ChangeStore, PgAuditTrail, PgChangeStore,
    PgSyncHistory, SyncHistoryStore, UpsertOutcome,
};
