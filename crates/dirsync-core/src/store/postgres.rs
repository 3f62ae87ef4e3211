//! Postgres-backed stores.
//!
//! Schema lives in `migrations/0001_init.sql`. Row structs mirror the table
//! columns and convert into the model types; enum columns are stored as text
//! and parsed leniently on the way out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::model::{
    AuditEntry, AuditSource, Change, ChangeCandidate, ChangeStatus, ChangeType, CycleCounts,
    CycleStatus, EntityType, SyncCycleRecord,
};

use super::{
    AuditCount, AuditQuery, AuditStats, AuditTrail, ChangeFilter, ChangeStore, SyncHistoryStore,
    UpsertOutcome,
};

const CHANGE_COLUMNS: &str = "id, entity_type, entity_id, change_type, field_name, \
     source_value, target_value, status, detected_at, approved_by, approved_at, \
     applied_at, error_message, metadata";

/// Change repository on Postgres.
pub struct PgChangeStore {
    pool: PgPool,
}

impl PgChangeStore {
    /// Create a new store on the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn merge_batch(&self, candidates: &[ChangeCandidate]) -> SyncResult<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        let mut tx = self.pool.begin().await?;

        for candidate in candidates {
            let existing: Option<(Uuid,)> = sqlx::query_as(
                r"
                SELECT id FROM changes
                WHERE entity_type = $1
                  AND entity_id = $2
                  AND change_type = $3
                  AND field_name IS NOT DISTINCT FROM $4
                  AND status = 'pending'
                ORDER BY detected_at DESC
                LIMIT 1
                ",
            )
            .bind(candidate.entity_type.to_string())
            .bind(&candidate.entity_id)
            .bind(candidate.change_type.to_string())
            .bind(&candidate.field_name)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((id,)) = existing {
                sqlx::query(
                    r"
                    UPDATE changes
                    SET source_value = $2,
                        target_value = $3,
                        metadata = $4,
                        detected_at = NOW()
                    WHERE id = $1
                    ",
                )
                .bind(id)
                .bind(&candidate.source_value)
                .bind(&candidate.target_value)
                .bind(&candidate.metadata)
                .execute(&mut *tx)
                .await?;
                outcome.refreshed += 1;
            } else {
                sqlx::query(
                    r"
                    INSERT INTO changes
                        (entity_type, entity_id, change_type, field_name,
                         source_value, target_value, metadata)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ",
                )
                .bind(candidate.entity_type.to_string())
                .bind(&candidate.entity_id)
                .bind(candidate.change_type.to_string())
                .bind(&candidate.field_name)
                .bind(&candidate.source_value)
                .bind(&candidate.target_value)
                .bind(&candidate.metadata)
                .execute(&mut *tx)
                .await?;
                outcome.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Tell a missing row apart from a row in the wrong status after a
    /// guarded transition matched nothing.
    async fn transition_error(&self, id: Uuid, to: ChangeStatus) -> SyncError {
        match ChangeStore::get(self, id).await {
            Ok(Some(change)) => {
                SyncError::invalid_transition(id, change.status.to_string(), to.to_string())
            }
            Ok(None) => SyncError::ChangeNotFound { change_id: id },
            Err(e) => e,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChangeRow {
    id: Uuid,
    entity_type: String,
    entity_id: String,
    change_type: String,
    field_name: Option<String>,
    source_value: Option<String>,
    target_value: Option<String>,
    status: String,
    detected_at: DateTime<Utc>,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    applied_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    metadata: JsonValue,
}

impl ChangeRow {
    fn into_change(self) -> Change {
        Change {
            id: self.id,
            entity_type: self.entity_type.parse().unwrap_or(EntityType::User),
            entity_id: self.entity_id,
            change_type: self.change_type.parse().unwrap_or(ChangeType::Orphan),
            field_name: self.field_name,
            source_value: self.source_value,
            target_value: self.target_value,
            status: self.status.parse().unwrap_or(ChangeStatus::Pending),
            detected_at: self.detected_at,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            applied_at: self.applied_at,
            error_message: self.error_message,
            metadata: self.metadata,
        }
    }
}

#[async_trait]
impl ChangeStore for PgChangeStore {
    async fn upsert_candidates(&self, candidates: &[ChangeCandidate]) -> SyncResult<UpsertOutcome> {
        if candidates.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        // A database failure here aborts only the detection phase.
        let outcome = self.merge_batch(candidates).await.map_err(|e| match e {
            SyncError::Database(message) => SyncError::detection(message),
            other => other,
        })?;

        tracing::debug!(
            inserted = outcome.inserted,
            refreshed = outcome.refreshed,
            "Merged detection batch"
        );

        Ok(outcome)
    }

    async fn get(&self, id: Uuid) -> SyncResult<Option<Change>> {
        let row: Option<ChangeRow> =
            sqlx::query_as(&format!("SELECT {CHANGE_COLUMNS} FROM changes WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(ChangeRow::into_change))
    }

    async fn list(&self, filter: &ChangeFilter) -> SyncResult<Vec<Change>> {
        let rows: Vec<ChangeRow> = sqlx::query_as(&format!(
            r"
            SELECT {CHANGE_COLUMNS} FROM changes
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::text IS NULL OR change_type = $3)
            ORDER BY detected_at DESC
            LIMIT $4
            "
        ))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.entity_type.map(|t| t.to_string()))
        .bind(filter.change_type.map(|t| t.to_string()))
        .bind(filter.limit.unwrap_or(100))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChangeRow::into_change).collect())
    }

    async fn mark_approved(&self, id: Uuid, approver: &str) -> SyncResult<Change> {
        // The status predicate makes the transition atomic: a concurrent
        // decision that lands first leaves nothing for this UPDATE to match.
        let row: Option<ChangeRow> = sqlx::query_as(&format!(
            r"
            UPDATE changes
            SET status = 'approved', approved_by = $2, approved_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {CHANGE_COLUMNS}
            "
        ))
        .bind(id)
        .bind(approver)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into_change()),
            None => Err(self.transition_error(id, ChangeStatus::Approved).await),
        }
    }

    async fn mark_rejected(&self, id: Uuid, rejecter: &str) -> SyncResult<Change> {
        let row: Option<ChangeRow> = sqlx::query_as(&format!(
            r"
            UPDATE changes
            SET status = 'rejected', approved_by = $2, approved_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {CHANGE_COLUMNS}
            "
        ))
        .bind(id)
        .bind(rejecter)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into_change()),
            None => Err(self.transition_error(id, ChangeStatus::Rejected).await),
        }
    }

    async fn mark_applied(&self, id: Uuid) -> SyncResult<Change> {
        let row: Option<ChangeRow> = sqlx::query_as(&format!(
            r"
            UPDATE changes
            SET status = 'applied', applied_at = NOW(), error_message = NULL
            WHERE id = $1 AND status = 'approved'
            RETURNING {CHANGE_COLUMNS}
            "
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into_change()),
            None => Err(self.transition_error(id, ChangeStatus::Applied).await),
        }
    }

    async fn record_apply_error(&self, id: Uuid, message: &str) -> SyncResult<Change> {
        let row: Option<ChangeRow> = sqlx::query_as(&format!(
            r"
            UPDATE changes
            SET error_message = $2
            WHERE id = $1
            RETURNING {CHANGE_COLUMNS}
            "
        ))
        .bind(id)
        .bind(message)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChangeRow::into_change)
            .ok_or(SyncError::ChangeNotFound { change_id: id })
    }
}

/// Audit trail on Postgres.
pub struct PgAuditTrail {
    pool: PgPool,
}

impl PgAuditTrail {
    /// Create a new trail on the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    timestamp: DateTime<Utc>,
    action: String,
    actor: String,
    entity_type: String,
    entity_id: String,
    changes: JsonValue,
    source: String,
    success: bool,
    error_message: Option<String>,
}

impl AuditRow {
    fn into_entry(self) -> AuditEntry {
        AuditEntry {
            timestamp: self.timestamp,
            action: self.action,
            actor: self.actor,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            changes: self.changes,
            source: self.source.parse().unwrap_or(AuditSource::Api),
            success: self.success,
            error_message: self.error_message,
        }
    }
}

const AUDIT_COLUMNS: &str =
    "timestamp, action, actor, entity_type, entity_id, changes, source, success, error_message";

#[async_trait]
impl AuditTrail for PgAuditTrail {
    async fn append(&self, entry: &AuditEntry) -> SyncResult<()> {
        sqlx::query(
            r"
            INSERT INTO audit_log
                (timestamp, action, actor, entity_type, entity_id,
                 changes, source, success, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(entry.timestamp)
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.changes)
        .bind(entry.source.to_string())
        .bind(entry.success)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(&self, filter: &AuditQuery) -> SyncResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            r"
            SELECT {AUDIT_COLUMNS} FROM audit_log
            WHERE ($1::text IS NULL OR action = $1)
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::text IS NULL OR actor = $3)
              AND ($4::timestamptz IS NULL OR timestamp >= $4)
              AND ($5::timestamptz IS NULL OR timestamp <= $5)
            ORDER BY timestamp DESC
            LIMIT $6
            "
        ))
        .bind(&filter.action)
        .bind(&filter.entity_type)
        .bind(&filter.actor)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditRow::into_entry).collect())
    }

    async fn stats(&self) -> SyncResult<AuditStats> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;

        let by_action: Vec<(String, i64)> = sqlx::query_as(
            "SELECT action, COUNT(*) FROM audit_log GROUP BY action ORDER BY COUNT(*) DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_entity: Vec<(String, i64)> = sqlx::query_as(
            "SELECT entity_type, COUNT(*) FROM audit_log GROUP BY entity_type ORDER BY COUNT(*) DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let recent: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY timestamp DESC LIMIT 5"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(AuditStats {
            total,
            by_action: by_action
                .into_iter()
                .map(|(key, count)| AuditCount { key, count })
                .collect(),
            by_entity: by_entity
                .into_iter()
                .map(|(key, count)| AuditCount { key, count })
                .collect(),
            recent: recent.into_iter().map(AuditRow::into_entry).collect(),
        })
    }
}

/// Sync cycle history on Postgres.
pub struct PgSyncHistory {
    pool: PgPool,
}

impl PgSyncHistory {
    /// Create a new history store on the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SyncHistoryRow {
    cycle_id: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    duration_ms: i64,
    status: String,
    created: i32,
    updated: i32,
    deleted: i32,
    groups_synced: i32,
    errors: i32,
    changes_detected: i32,
    total_source_records: i32,
    total_target_records: i32,
    error_details: JsonValue,
}

impl SyncHistoryRow {
    fn into_record(self) -> SyncCycleRecord {
        SyncCycleRecord {
            cycle_id: self.cycle_id,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
            status: self.status.parse().unwrap_or(CycleStatus::Failed),
            counts: CycleCounts {
                created: self.created.max(0) as u32,
                updated: self.updated.max(0) as u32,
                deleted: self.deleted.max(0) as u32,
                groups_synced: self.groups_synced.max(0) as u32,
                errors: self.errors.max(0) as u32,
                changes_detected: self.changes_detected.max(0) as u32,
            },
            total_source_records: self.total_source_records.max(0) as u32,
            total_target_records: self.total_target_records.max(0) as u32,
            error_details: serde_json::from_value(self.error_details).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SyncHistoryStore for PgSyncHistory {
    async fn record_cycle(&self, record: &SyncCycleRecord) -> SyncResult<()> {
        let error_details = serde_json::to_value(&record.error_details)?;

        sqlx::query(
            r"
            INSERT INTO sync_history
                (cycle_id, started_at, completed_at, duration_ms, status,
                 created, updated, deleted, groups_synced, errors, changes_detected,
                 total_source_records, total_target_records, error_details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(&record.cycle_id)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.duration_ms)
        .bind(record.status.to_string())
        .bind(record.counts.created as i32)
        .bind(record.counts.updated as i32)
        .bind(record.counts.deleted as i32)
        .bind(record.counts.groups_synced as i32)
        .bind(record.counts.errors as i32)
        .bind(record.counts.changes_detected as i32)
        .bind(record.total_source_records as i32)
        .bind(record.total_target_records as i32)
        .bind(&error_details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, limit: i64) -> SyncResult<Vec<SyncCycleRecord>> {
        let rows: Vec<SyncHistoryRow> = sqlx::query_as(
            r"
            SELECT cycle_id, started_at, completed_at, duration_ms, status,
                   created, updated, deleted, groups_synced, errors, changes_detected,
                   total_source_records, total_target_records, error_details
            FROM sync_history
            ORDER BY started_at DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SyncHistoryRow::into_record).collect())
    }
}
