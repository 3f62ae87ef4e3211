//! In-memory doubles for the store, gateway and event traits.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use dirsync_core::events::{EventSink, Topic};
use dirsync_core::model::{
    AuditEntry, Change, ChangeCandidate, ChangeStatus, SyncCycleRecord,
};
use dirsync_core::store::{
    AuditQuery, AuditStats, AuditTrail, ChangeFilter, ChangeStore, SyncHistoryStore, UpsertOutcome,
};
use dirsync_core::{SyncError, SyncResult};
use dirsync_gateway::{
    GatewayError, GatewayResult, NewTargetEntry, SourceDirectory, SourceGroup, SourceUser,
    TargetDirectory, TargetRecord,
};

// ---------------------------------------------------------------------------
// Roster builders

pub fn source_user(identifier: &str, email: &str, display_name: &str) -> SourceUser {
    SourceUser {
        id: format!("src-{identifier}"),
        identifier: identifier.to_string(),
        email: email.to_string(),
        display_name: display_name.to_string(),
        active: true,
        has_credential: true,
        attributes: HashMap::new(),
    }
}

pub fn target_record(identifier: &str, mail: &str, cn: &str, sn: &str) -> TargetRecord {
    TargetRecord {
        identifier: identifier.to_string(),
        dn: format!("uid={identifier},ou=people,dc=example,dc=com"),
        mail: mail.to_string(),
        cn: cn.to_string(),
        sn: sn.to_string(),
        given_name: String::new(),
        member_of: vec![],
    }
}

// ---------------------------------------------------------------------------
// Store doubles

/// Change store over a Vec, honoring the pending-uniqueness merge.
#[derive(Default)]
pub struct InMemoryChangeStore {
    rows: Mutex<Vec<Change>>,
    pub fail_upserts: AtomicBool,
}

impl InMemoryChangeStore {
    pub fn seed(&self, change: Change) {
        self.rows.lock().unwrap().push(change);
    }

    pub fn all(&self) -> Vec<Change> {
        self.rows.lock().unwrap().clone()
    }

    fn candidate_to_row(candidate: &ChangeCandidate) -> Change {
        Change {
            id: Uuid::new_v4(),
            entity_type: candidate.entity_type,
            entity_id: candidate.entity_id.clone(),
            change_type: candidate.change_type,
            field_name: candidate.field_name.clone(),
            source_value: candidate.source_value.clone(),
            target_value: candidate.target_value.clone(),
            status: ChangeStatus::Pending,
            detected_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            applied_at: None,
            error_message: None,
            metadata: candidate.metadata.clone(),
        }
    }
}

#[async_trait]
impl ChangeStore for InMemoryChangeStore {
    async fn upsert_candidates(&self, candidates: &[ChangeCandidate]) -> SyncResult<UpsertOutcome> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(SyncError::detection("store unavailable"));
        }

        let mut rows = self.rows.lock().unwrap();
        let mut outcome = UpsertOutcome::default();
        for candidate in candidates {
            let existing = rows.iter_mut().find(|r| {
                r.status == ChangeStatus::Pending
                    && r.entity_type == candidate.entity_type
                    && r.entity_id == candidate.entity_id
                    && r.change_type == candidate.change_type
                    && r.field_name == candidate.field_name
            });
            match existing {
                Some(row) => {
                    row.source_value = candidate.source_value.clone();
                    row.target_value = candidate.target_value.clone();
                    row.metadata = candidate.metadata.clone();
                    row.detected_at = Utc::now();
                    outcome.refreshed += 1;
                }
                None => {
                    rows.push(Self::candidate_to_row(candidate));
                    outcome.inserted += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn get(&self, id: Uuid) -> SyncResult<Option<Change>> {
        Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, filter: &ChangeFilter) -> SyncResult<Vec<Change>> {
        let rows = self.rows.lock().unwrap();
        let mut matched: Vec<Change> = rows
            .iter()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.entity_type.map_or(true, |t| r.entity_type == t))
            .filter(|r| filter.change_type.map_or(true, |t| r.change_type == t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        matched.truncate(filter.limit.unwrap_or(100) as usize);
        Ok(matched)
    }

    async fn mark_approved(&self, id: Uuid, approver: &str) -> SyncResult<Change> {
        self.transition(id, ChangeStatus::Pending, ChangeStatus::Approved, |row| {
            row.approved_by = Some(approver.to_string());
            row.approved_at = Some(Utc::now());
        })
    }

    async fn mark_rejected(&self, id: Uuid, rejecter: &str) -> SyncResult<Change> {
        self.transition(id, ChangeStatus::Pending, ChangeStatus::Rejected, |row| {
            row.approved_by = Some(rejecter.to_string());
            row.approved_at = Some(Utc::now());
        })
    }

    async fn mark_applied(&self, id: Uuid) -> SyncResult<Change> {
        self.transition(id, ChangeStatus::Approved, ChangeStatus::Applied, |row| {
            row.applied_at = Some(Utc::now());
            row.error_message = None;
        })
    }

    async fn record_apply_error(&self, id: Uuid, message: &str) -> SyncResult<Change> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(SyncError::ChangeNotFound { change_id: id })?;
        row.error_message = Some(message.to_string());
        Ok(row.clone())
    }
}

impl InMemoryChangeStore {
    /// Status-guarded transition, matching the Postgres store's predicate.
    fn transition(
        &self,
        id: Uuid,
        from: ChangeStatus,
        to: ChangeStatus,
        f: impl FnOnce(&mut Change),
    ) -> SyncResult<Change> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(SyncError::ChangeNotFound { change_id: id })?;
        if row.status != from {
            return Err(SyncError::invalid_transition(
                id,
                row.status.to_string(),
                to.to_string(),
            ));
        }
        row.status = to;
        f(row);
        Ok(row.clone())
    }
}

#[derive(Default)]
pub struct InMemoryAuditTrail {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditTrail {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.entries.lock().unwrap().iter().map(|e| e.action.clone()).collect()
    }
}

#[async_trait]
impl AuditTrail for InMemoryAuditTrail {
    async fn append(&self, entry: &AuditEntry) -> SyncResult<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditQuery) -> SyncResult<Vec<AuditEntry>> {
        let entries = self.entries.lock().unwrap();
        let mut matched: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| filter.action.as_ref().map_or(true, |a| &e.action == a))
            .filter(|e| filter.entity_type.as_ref().map_or(true, |t| &e.entity_type == t))
            .filter(|e| filter.actor.as_ref().map_or(true, |a| &e.actor == a))
            .cloned()
            .collect();
        matched.reverse();
        matched.truncate(filter.limit as usize);
        Ok(matched)
    }

    async fn stats(&self) -> SyncResult<AuditStats> {
        let entries = self.entries.lock().unwrap();
        Ok(AuditStats {
            total: entries.len() as i64,
            by_action: vec![],
            by_entity: vec![],
            recent: entries.iter().rev().take(5).cloned().collect(),
        })
    }
}

#[derive(Default)]
pub struct InMemoryHistory {
    records: Mutex<Vec<SyncCycleRecord>>,
}

impl InMemoryHistory {
    pub fn records(&self) -> Vec<SyncCycleRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncHistoryStore for InMemoryHistory {
    async fn record_cycle(&self, record: &SyncCycleRecord) -> SyncResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn recent(&self, limit: i64) -> SyncResult<Vec<SyncCycleRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().rev().take(limit as usize).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Event sink double

#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(Topic, JsonValue)>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<(Topic, JsonValue)> {
        self.events.lock().unwrap().clone()
    }

    pub fn on_topic(&self, topic: Topic) -> Vec<JsonValue> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, topic: Topic, payload: JsonValue) {
        self.events.lock().unwrap().push((topic, payload));
    }
}

// ---------------------------------------------------------------------------
// Gateway doubles

/// Upstream source returning scripted rosters.
#[derive(Default)]
pub struct ScriptedSource {
    pub users: Mutex<Vec<SourceUser>>,
    pub groups: Mutex<Vec<SourceGroup>>,
    pub members: Mutex<HashMap<String, Vec<String>>>,
    pub fail_users: AtomicBool,
}

impl ScriptedSource {
    pub fn with_users(users: Vec<SourceUser>) -> Self {
        Self {
            users: Mutex::new(users),
            ..Self::default()
        }
    }

    pub fn add_group(&self, id: &str, name: &str, members: Vec<String>) {
        self.groups.lock().unwrap().push(SourceGroup {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
        });
        self.members.lock().unwrap().insert(id.to_string(), members);
    }
}

#[async_trait]
impl SourceDirectory for ScriptedSource {
    async fn list_users(&self) -> GatewayResult<Vec<SourceUser>> {
        if self.fail_users.load(Ordering::SeqCst) {
            return Err(GatewayError::upstream_fetch("scripted upstream outage"));
        }
        Ok(self.users.lock().unwrap().clone())
    }

    async fn list_groups(&self) -> GatewayResult<Vec<SourceGroup>> {
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn list_group_members(&self, group_id: &str) -> GatewayResult<Vec<String>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(group_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Target directory over in-memory rosters, with mutation counters and
/// switchable failures.
#[derive(Default)]
pub struct FakeTarget {
    pub records: Mutex<Vec<TargetRecord>>,
    pub groups: Mutex<HashMap<String, Vec<String>>>,
    pub connects: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub group_writes: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_list: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_delete: AtomicBool,
    /// Artificial latency on roster listing, for overlap tests.
    pub list_delay_ms: AtomicUsize,
}

impl FakeTarget {
    pub fn with_records(records: Vec<TargetRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Total count of mutating directory calls.
    pub fn mutations(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
            + self.group_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetDirectory for FakeTarget {
    async fn connect(&self) -> GatewayResult<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::BindRejected);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn list_users(&self) -> GatewayResult<Vec<TargetRecord>> {
        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(GatewayError::operation_failed("scripted search failure"));
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn create_user(&self, entry: &NewTargetEntry) -> GatewayResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.records.lock().unwrap().push(TargetRecord {
            identifier: entry.identifier.clone(),
            dn: format!("uid={},ou=people,dc=example,dc=com", entry.identifier),
            mail: entry.mail.clone(),
            cn: entry.cn.clone(),
            sn: entry.sn.clone(),
            given_name: entry.given_name.clone(),
            member_of: vec![],
        });
        Ok(())
    }

    async fn update_user_attribute(
        &self,
        identifier: &str,
        attribute: &str,
        value: &str,
    ) -> GatewayResult<()> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(GatewayError::operation_failed("scripted modify failure"));
        }
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.identifier == identifier)
            .ok_or_else(|| GatewayError::EntryNotFound {
                identifier: identifier.to_string(),
            })?;
        match attribute {
            "mail" => record.mail = value.to_string(),
            "cn" => record.cn = value.to_string(),
            "sn" => record.sn = value.to_string(),
            "givenName" => record.given_name = value.to_string(),
            _ => {}
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_user(&self, identifier: &str) -> GatewayResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(GatewayError::operation_failed("scripted delete failure"));
        }
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.identifier != identifier);
        if records.len() == before {
            return Err(GatewayError::EntryNotFound {
                identifier: identifier.to_string(),
            });
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_groups(&self) -> GatewayResult<Vec<String>> {
        Ok(self.groups.lock().unwrap().keys().cloned().collect())
    }

    async fn create_group(&self, name: &str, members: &[String]) -> GatewayResult<()> {
        self.group_writes.fetch_add(1, Ordering::SeqCst);
        self.groups
            .lock()
            .unwrap()
            .insert(name.to_string(), members.to_vec());
        Ok(())
    }

    async fn replace_group_members(&self, name: &str, members: &[String]) -> GatewayResult<()> {
        self.group_writes.fetch_add(1, Ordering::SeqCst);
        self.groups
            .lock()
            .unwrap()
            .insert(name.to_string(), members.to_vec());
        Ok(())
    }
}
