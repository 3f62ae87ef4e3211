//! Core data model: change records, sync cycle summaries, audit entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Kind of entity a change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Group,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            _ => Err(format!("invalid entity type: {s}")),
        }
    }
}

/// Classification of detected drift.
///
/// Closed enum: adding a variant forces a decision in every match,
/// in particular in the apply dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Entity present in the target directory with no source counterpart.
    Orphan,
    /// A tracked field differs between source and target.
    FieldMismatch,
    /// Source account without a credential, excluded from provisioning.
    InactiveUser,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orphan => write!(f, "orphan"),
            Self::FieldMismatch => write!(f, "field_mismatch"),
            Self::InactiveUser => write!(f, "inactive_user"),
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orphan" => Ok(Self::Orphan),
            "field_mismatch" => Ok(Self::FieldMismatch),
            "inactive_user" => Ok(Self::InactiveUser),
            _ => Err(format!("invalid change type: {s}")),
        }
    }
}

/// Lifecycle status of a change record.
///
/// Status only advances: pending -> approved | rejected, approved -> applied.
/// A failed apply stays at approved with `error_message` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
}

impl ChangeStatus {
    /// Whether an approve is valid from this status.
    pub fn can_approve(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether a reject is valid from this status.
    pub fn can_reject(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether an apply is valid from this status.
    pub fn can_apply(self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Applied)
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Applied => write!(f, "applied"),
        }
    }
}

impl std::str::FromStr for ChangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "applied" => Ok(Self::Applied),
            _ => Err(format!("invalid change status: {s}")),
        }
    }
}

/// A persistent, reviewable unit of detected drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Surrogate id.
    pub id: Uuid,
    /// Kind of entity.
    pub entity_type: EntityType,
    /// Identifier of the affected entity (username or group name).
    pub entity_id: String,
    /// Drift classification.
    pub change_type: ChangeType,
    /// Which field differs. Set only for field mismatches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    /// Value on the source side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_value: Option<String>,
    /// Value on the target side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_value: Option<String>,
    /// Lifecycle status.
    pub status: ChangeStatus,
    /// When the drift was (last) detected.
    pub detected_at: DateTime<Utc>,
    /// Who approved or rejected the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    /// When the change was approved or rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    /// When the change was applied to the target directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    /// Error from the most recent failed apply attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Diagnostic context for operator review (directory DN, mail, cn).
    pub metadata: JsonValue,
}

/// A detected drift candidate, not yet merged against the store.
///
/// The pending-uniqueness key is (entity_type, entity_id, change_type,
/// field_name): a candidate matching an existing pending row refreshes that
/// row instead of inserting a duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeCandidate {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub change_type: ChangeType,
    pub field_name: Option<String>,
    pub source_value: Option<String>,
    pub target_value: Option<String>,
    pub metadata: JsonValue,
}

impl ChangeCandidate {
    /// Candidate for a target entry with no source counterpart.
    pub fn orphan(entity_id: impl Into<String>, target_value: String, metadata: JsonValue) -> Self {
        Self {
            entity_type: EntityType::User,
            entity_id: entity_id.into(),
            change_type: ChangeType::Orphan,
            field_name: None,
            source_value: None,
            target_value: Some(target_value),
            metadata,
        }
    }

    /// Candidate for a tracked field differing between the directories.
    pub fn field_mismatch(
        entity_id: impl Into<String>,
        field_name: impl Into<String>,
        source_value: impl Into<String>,
        target_value: impl Into<String>,
        metadata: JsonValue,
    ) -> Self {
        Self {
            entity_type: EntityType::User,
            entity_id: entity_id.into(),
            change_type: ChangeType::FieldMismatch,
            field_name: Some(field_name.into()),
            source_value: Some(source_value.into()),
            target_value: Some(target_value.into()),
            metadata,
        }
    }

    /// Candidate for a source account without a credential.
    pub fn inactive_user(entity_id: impl Into<String>, metadata: JsonValue) -> Self {
        Self {
            entity_type: EntityType::User,
            entity_id: entity_id.into(),
            change_type: ChangeType::InactiveUser,
            field_name: None,
            source_value: None,
            target_value: None,
            metadata,
        }
    }

    /// The pending-uniqueness key of this candidate.
    pub fn dedup_key(&self) -> (EntityType, &str, ChangeType, Option<&str>) {
        (
            self.entity_type,
            self.entity_id.as_str(),
            self.change_type,
            self.field_name.as_deref(),
        )
    }
}

/// Outcome status of a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Success,
    Failed,
    Partial,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

impl std::str::FromStr for CycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            _ => Err(format!("invalid cycle status: {s}")),
        }
    }
}

/// Mutation and detection counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounts {
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
    pub groups_synced: u32,
    pub errors: u32,
    pub changes_detected: u32,
}

/// One entry in a cycle's error detail list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleError {
    /// Entity the failure relates to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// What went wrong.
    pub message: String,
    /// When the failure occurred.
    pub at: DateTime<Utc>,
}

impl CycleError {
    /// Record a per-entity failure.
    pub fn for_entity(entity_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Record a cycle-level failure.
    pub fn cycle(message: impl Into<String>) -> Self {
        Self {
            entity_id: None,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Immutable summary of one completed sync cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCycleRecord {
    /// Unique cycle identifier.
    pub cycle_id: String,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// When the cycle finished.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: i64,
    /// Outcome.
    pub status: CycleStatus,
    /// Mutation and detection counters.
    pub counts: CycleCounts,
    /// Size of the source roster fetched this cycle.
    pub total_source_records: u32,
    /// Size of the target roster fetched this cycle.
    pub total_target_records: u32,
    /// Structured failure details.
    pub error_details: Vec<CycleError>,
}

/// Origin of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSource {
    Sync,
    Manual,
    Api,
    SelfService,
}

impl std::fmt::Display for AuditSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Manual => write!(f, "manual"),
            Self::Api => write!(f, "api"),
            Self::SelfService => write!(f, "self_service"),
        }
    }
}

impl std::str::FromStr for AuditSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Self::Sync),
            "manual" => Ok(Self::Manual),
            "api" => Ok(Self::Api),
            "self_service" => Ok(Self::SelfService),
            _ => Err(format!("invalid audit source: {s}")),
        }
    }
}

/// One append-only audit record.
///
/// Written for every mutating action regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
    /// What happened, e.g. "user_created", "change_approved".
    pub action: String,
    /// Who did it (operator name or "system").
    pub actor: String,
    /// Kind of entity affected.
    pub entity_type: String,
    /// Identifier of the affected entity.
    pub entity_id: String,
    /// Structured before/after or outcome payload.
    pub changes: JsonValue,
    /// Origin of the action.
    pub source: AuditSource,
    /// Whether the action succeeded.
    pub success: bool,
    /// Error when the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditEntry {
    /// Build an entry for a successful action.
    pub fn success(
        action: impl Into<String>,
        actor: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        changes: JsonValue,
        source: AuditSource,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            actor: actor.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            changes,
            source,
            success: true,
            error_message: None,
        }
    }

    /// Build an entry for a failed action.
    pub fn failure(
        action: impl Into<String>,
        actor: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        changes: JsonValue,
        source: AuditSource,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            actor: actor.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            changes,
            source,
            success: false,
            error_message: Some(error_message.into()),
        }
    }
}
