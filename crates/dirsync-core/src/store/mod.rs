//! Persistence interfaces and their Postgres implementations.
//!
//! The engine, lifecycle manager and orchestrator consume the narrow traits
//! defined here; `postgres.rs` implements them on a `sqlx::PgPool`. The
//! store is the single source of truth for change, audit and cycle-history
//! data and serializes concurrent writers far enough to uphold the
//! pending-uniqueness invariant (one transaction per upsert batch) and
//! status monotonicity (status-guarded transition updates).

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncResult;
use crate::model::{
    AuditEntry, Change, ChangeCandidate, ChangeStatus, ChangeType, EntityType, SyncCycleRecord,
};

pub use postgres::{PgAuditTrail, PgChangeStore, PgSyncHistory};

/// Outcome of merging one detection batch against the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// New pending rows inserted.
    pub inserted: usize,
    /// Existing pending rows refreshed in place.
    pub refreshed: usize,
}

/// Filter for listing change records.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    pub status: Option<ChangeStatus>,
    pub entity_type: Option<EntityType>,
    pub change_type: Option<ChangeType>,
    /// Maximum rows returned, newest first. Unset means 100.
    pub limit: Option<i64>,
}

impl ChangeFilter {
    /// Filter selecting pending changes only.
    pub fn pending() -> Self {
        Self {
            status: Some(ChangeStatus::Pending),
            ..Self::default()
        }
    }
}

/// Repository for change records.
///
/// Rows are never deleted; detection refreshes pending rows in place and the
/// lifecycle manager advances status.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Merge a detection batch against existing pending rows, all-or-nothing.
    ///
    /// A candidate matching a pending row on (entity_type, entity_id,
    /// change_type, field_name) refreshes that row's values, metadata and
    /// detected_at; otherwise a new pending row is inserted. Non-pending rows
    /// are never touched.
    async fn upsert_candidates(&self, candidates: &[ChangeCandidate]) -> SyncResult<UpsertOutcome>;

    /// Load one change by id.
    async fn get(&self, id: Uuid) -> SyncResult<Option<Change>>;

    /// List changes, newest detection first.
    async fn list(&self, filter: &ChangeFilter) -> SyncResult<Vec<Change>>;

    /// Set status=approved with approver and approval time.
    ///
    /// Atomic against concurrent decisions: only a pending row transitions;
    /// anything else is an invalid-transition error.
    async fn mark_approved(&self, id: Uuid, approver: &str) -> SyncResult<Change>;

    /// Set status=rejected with rejecter and decision time. Only from
    /// pending.
    async fn mark_rejected(&self, id: Uuid, rejecter: &str) -> SyncResult<Change>;

    /// Set status=applied with apply time, clearing any previous apply error.
    /// Only from approved.
    async fn mark_applied(&self, id: Uuid) -> SyncResult<Change>;

    /// Record a failed apply attempt. Status is left untouched.
    async fn record_apply_error(&self, id: Uuid, message: &str) -> SyncResult<Change>;
}

/// Filter for querying the audit trail.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub actor: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Maximum rows returned, newest first.
    pub limit: i64,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            action: None,
            entity_type: None,
            actor: None,
            from: None,
            to: None,
            limit: 100,
        }
    }
}

/// Count of audit entries sharing one key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCount {
    pub key: String,
    pub count: i64,
}

/// Aggregate view over the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: i64,
    pub by_action: Vec<AuditCount>,
    pub by_entity: Vec<AuditCount>,
    pub recent: Vec<AuditEntry>,
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Insert an immutable audit record.
    async fn append(&self, entry: &AuditEntry) -> SyncResult<()>;

    /// Return matching entries, newest first.
    async fn query(&self, filter: &AuditQuery) -> SyncResult<Vec<AuditEntry>>;

    /// Aggregate counts by action and entity type plus the most recent entries.
    async fn stats(&self) -> SyncResult<AuditStats>;
}

/// Persistence for completed sync cycle summaries.
#[async_trait]
pub trait SyncHistoryStore: Send + Sync {
    /// Persist a finalized cycle record. Called exactly once per cycle.
    async fn record_cycle(&self, record: &SyncCycleRecord) -> SyncResult<()>;

    /// Return the most recent cycles, newest first.
    async fn recent(&self, limit: i64) -> SyncResult<Vec<SyncCycleRecord>>;
}
