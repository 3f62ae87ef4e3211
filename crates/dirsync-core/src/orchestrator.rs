//! Sync cycle orchestration.
//!
//! Owns the cycle state machine, the periodic timer and the in-memory error
//! and history rings. One cycle runs at a time; a trigger while a cycle is
//! running is rejected, never queued.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use dirsync_gateway::{NewTargetEntry, SourceDirectory, SourceUser, TargetDirectory, TargetRecord};

use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::events::{ChangesDetectedEvent, EventSink, LogEvent, SyncStatusEvent, Topic};
use crate::model::{
    AuditEntry, AuditSource, CycleCounts, CycleError, CycleStatus, SyncCycleRecord,
};
use crate::reconcile::ReconciliationEngine;
use crate::store::{AuditTrail, ChangeStore, SyncHistoryStore};

/// In-memory error ring size. Only the newest entries are kept.
const ERROR_RING: usize = 10;
/// In-memory cycle history ring size.
const HISTORY_RING: usize = 50;
/// Errors exposed in a state snapshot.
const SNAPSHOT_ERRORS: usize = 5;
/// History entries exposed in a state snapshot.
const SNAPSHOT_HISTORY: usize = 10;

/// Observable state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No cycle has run yet.
    Idle,
    /// A cycle is executing now.
    Running,
    /// The most recent cycle completed.
    Success,
    /// The most recent cycle hit a fatal error.
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable orchestrator state behind the lock.
struct SyncState {
    status: SyncStatus,
    current_cycle: Option<String>,
    last_sync_time: Option<DateTime<Utc>>,
    last_sync_duration_ms: Option<i64>,
    is_connected: bool,
    errors: VecDeque<CycleError>,
    history: VecDeque<SyncCycleRecord>,
}

impl SyncState {
    fn new() -> Self {
        Self {
            status: SyncStatus::Idle,
            current_cycle: None,
            last_sync_time: None,
            last_sync_duration_ms: None,
            is_connected: false,
            errors: VecDeque::with_capacity(ERROR_RING),
            history: VecDeque::with_capacity(HISTORY_RING),
        }
    }

    fn push_error(&mut self, error: CycleError) {
        if self.errors.len() == ERROR_RING {
            self.errors.pop_front();
        }
        self.errors.push_back(error);
    }

    fn push_history(&mut self, record: SyncCycleRecord) {
        if self.history.len() == HISTORY_RING {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }
}

/// Point-in-time view of the orchestrator for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStateSnapshot {
    pub status: SyncStatus,
    pub current_cycle: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_duration_ms: Option<i64>,
    pub is_connected: bool,
    /// Newest-first tail of the error ring.
    pub recent_errors: Vec<CycleError>,
    /// Newest-first tail of the history ring.
    pub recent_history: Vec<SyncCycleRecord>,
    pub settings: SyncSettings,
}

/// Counters and failures accumulated while a cycle runs.
#[derive(Default)]
struct CycleOutcome {
    counts: CycleCounts,
    errors: Vec<CycleError>,
    total_source_records: u32,
    total_target_records: u32,
}

impl CycleOutcome {
    fn record_failure(&mut self, error: CycleError) {
        self.counts.errors += 1;
        self.errors.push(error);
    }
}

/// Runs sync cycles against the two directories.
pub struct SyncOrchestrator {
    source: Arc<dyn SourceDirectory>,
    target: Arc<dyn TargetDirectory>,
    changes: Arc<dyn ChangeStore>,
    audit: Arc<dyn AuditTrail>,
    history: Arc<dyn SyncHistoryStore>,
    events: Arc<dyn EventSink>,
    settings: SyncSettings,
    state: Mutex<SyncState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn SourceDirectory>,
        target: Arc<dyn TargetDirectory>,
        changes: Arc<dyn ChangeStore>,
        audit: Arc<dyn AuditTrail>,
        history: Arc<dyn SyncHistoryStore>,
        events: Arc<dyn EventSink>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            target,
            changes,
            audit,
            history,
            events,
            settings,
            state: Mutex::new(SyncState::new()),
            timer: Mutex::new(None),
        }
    }

    /// Effective settings.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run one immediate cycle and schedule periodic cycles thereafter.
    ///
    /// Idempotent: a second call while the timer is installed only runs the
    /// immediate cycle (which is itself rejected if one is in flight).
    pub async fn start(self: &Arc<Self>) {
        {
            let mut timer = self.timer.lock().await;
            if timer.is_none() {
                let orchestrator = Arc::clone(self);
                let period = Duration::from_secs(self.settings.interval_minutes * 60);
                *timer = Some(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    // The first tick fires immediately; the explicit cycle
                    // below covers startup.
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        if let Err(e) = orchestrator.run_cycle().await {
                            tracing::warn!(error = %e, "Scheduled sync cycle not run");
                        }
                    }
                }));
                tracing::info!(
                    interval_minutes = self.settings.interval_minutes,
                    "Sync timer started"
                );
            }
        }

        if let Err(e) = self.run_cycle().await {
            tracing::warn!(error = %e, "Startup sync cycle not run");
        }
    }

    /// Stop the periodic timer and drop the target connection.
    ///
    /// A cycle already in flight finishes on its own.
    pub async fn stop(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
            tracing::info!("Sync timer stopped");
        }

        let mut state = self.state.lock().await;
        if state.is_connected {
            if let Err(e) = self.target.disconnect().await {
                tracing::warn!(error = %e, "Target disconnect failed");
            }
            state.is_connected = false;
        }
    }

    /// Snapshot the orchestrator state.
    pub async fn state(&self) -> SyncStateSnapshot {
        let state = self.state.lock().await;
        SyncStateSnapshot {
            status: state.status,
            current_cycle: state.current_cycle.clone(),
            last_sync_time: state.last_sync_time,
            last_sync_duration_ms: state.last_sync_duration_ms,
            is_connected: state.is_connected,
            recent_errors: state.errors.iter().rev().take(SNAPSHOT_ERRORS).cloned().collect(),
            recent_history: state
                .history
                .iter()
                .rev()
                .take(SNAPSHOT_HISTORY)
                .cloned()
                .collect(),
            settings: self.settings.clone(),
        }
    }

    /// Run one full sync cycle.
    ///
    /// Returns the finalized cycle record; a fatal mid-cycle failure is
    /// reflected in the record's status, not raised. The only error returned
    /// is [`SyncError::CycleInProgress`] when a cycle is already running.
    pub async fn run_cycle(&self) -> SyncResult<SyncCycleRecord> {
        let cycle_id = format!("sync-{}", Utc::now().timestamp_millis());
        {
            let mut state = self.state.lock().await;
            if state.status == SyncStatus::Running {
                let running = state.current_cycle.clone().unwrap_or_default();
                return Err(SyncError::CycleInProgress { cycle_id: running });
            }
            state.status = SyncStatus::Running;
            state.current_cycle = Some(cycle_id.clone());
        }

        let started_at = Utc::now();
        let clock = Instant::now();

        tracing::info!(cycle_id = %cycle_id, dry_run = self.settings.dry_run, "Sync cycle started");
        self.publish_status(SyncStatusEvent {
            status: SyncStatus::Running.to_string(),
            cycle_id: cycle_id.clone(),
            duration_ms: None,
            counts: None,
            error: None,
        });
        self.publish_log("info", format!("Sync cycle {cycle_id} started"), json!({}));

        let mut outcome = CycleOutcome::default();
        let fatal = self.execute(&cycle_id, &mut outcome).await.err();

        Ok(self.finalize(cycle_id, started_at, clock, outcome, fatal).await)
    }

    /// The cycle body. Returns Err only for cycle-fatal failures; everything
    /// else lands in the outcome as per-record errors.
    async fn execute(&self, cycle_id: &str, outcome: &mut CycleOutcome) -> SyncResult<()> {
        self.ensure_connected().await?;

        let (source_result, target_result) =
            tokio::join!(self.source.list_users(), self.target.list_users());
        let source_users =
            source_result.map_err(|e| SyncError::upstream_fetch(e.to_string()))?;
        let target_records = match target_result {
            Ok(records) => records,
            Err(e) => {
                self.state.lock().await.is_connected = false;
                return Err(SyncError::connection(e.to_string()));
            }
        };

        outcome.total_source_records = source_users.len() as u32;
        outcome.total_target_records = target_records.len() as u32;

        tracing::info!(
            cycle_id = %cycle_id,
            source_records = source_users.len(),
            target_records = target_records.len(),
            "Rosters fetched"
        );

        self.provision_users(&source_users, &target_records, outcome)
            .await;

        if self.settings.delete_users {
            self.delete_orphans(&source_users, &target_records, outcome)
                .await;
        }

        if self.settings.sync_groups {
            self.sync_groups(&source_users, outcome).await;
        }

        // Detection compares the rosters fetched at cycle start, never a
        // refetch: drift corrected this cycle is still recorded as a
        // reviewable change.
        let detection = ReconciliationEngine::detect(&source_users, &target_records);
        outcome.counts.changes_detected = detection.total() as u32;
        for error in &detection.errors {
            outcome.record_failure(CycleError::cycle(error.clone()));
        }

        let summary = ChangesDetectedEvent {
            orphans: detection.orphans,
            mismatches: detection.mismatches,
            inactive: detection.inactive,
            total: detection.total(),
        };

        if let Err(e) = self.changes.upsert_candidates(&detection.candidates).await {
            outcome.record_failure(CycleError::cycle(e.to_string()));
        }

        self.events.publish(
            Topic::Changes,
            serde_json::to_value(summary).unwrap_or(serde_json::Value::Null),
        );

        Ok(())
    }

    async fn ensure_connected(&self) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        if state.is_connected {
            return Ok(());
        }
        self.target
            .connect()
            .await
            .map_err(|e| SyncError::connection(e.to_string()))?;
        state.is_connected = true;
        tracing::info!("Target directory connected");
        Ok(())
    }

    /// Create missing target entries and update tracked attributes on
    /// existing ones. Per-record failures never abort the loop.
    async fn provision_users(
        &self,
        source_users: &[SourceUser],
        target_records: &[TargetRecord],
        outcome: &mut CycleOutcome,
    ) {
        let target_by_id: HashMap<&str, &TargetRecord> = target_records
            .iter()
            .map(|r| (r.identifier.as_str(), r))
            .collect();

        for user in source_users {
            // Accounts without a credential are excluded from provisioning;
            // the reconciliation engine reports them instead.
            if !user.has_credential {
                continue;
            }

            match target_by_id.get(user.identifier.as_str()) {
                None if self.settings.create_users => {
                    self.create_user(user, outcome).await;
                }
                Some(record) if self.settings.update_users => {
                    self.update_user(user, record, outcome).await;
                }
                _ => {}
            }
        }
    }

    async fn create_user(&self, user: &SourceUser, outcome: &mut CycleOutcome) {
        let entry = self.build_entry(user);

        if self.settings.dry_run {
            tracing::info!(
                identifier = %entry.identifier,
                mail = %entry.mail,
                "[DRY RUN] Would create user"
            );
            return;
        }

        match self.target.create_user(&entry).await {
            Ok(()) => {
                outcome.counts.created += 1;
                self.audit_best_effort(AuditEntry::success(
                    "user_created",
                    "system",
                    "user",
                    &user.identifier,
                    json!({ "cn": entry.cn, "mail": entry.mail }),
                    AuditSource::Sync,
                ))
                .await;
                tracing::info!(identifier = %user.identifier, "User created");
            }
            Err(e) => {
                outcome.record_failure(CycleError::for_entity(
                    &user.identifier,
                    format!("create failed: {e}"),
                ));
                self.audit_best_effort(AuditEntry::failure(
                    "user_created",
                    "system",
                    "user",
                    &user.identifier,
                    json!({}),
                    AuditSource::Sync,
                    e.to_string(),
                ))
                .await;
            }
        }
    }

    async fn update_user(
        &self,
        user: &SourceUser,
        record: &TargetRecord,
        outcome: &mut CycleOutcome,
    ) {
        let updates = attribute_updates(user, record);
        if updates.is_empty() {
            return;
        }

        if self.settings.dry_run {
            for (attribute, value) in &updates {
                tracing::info!(
                    identifier = %user.identifier,
                    attribute = %attribute,
                    value = %value,
                    "[DRY RUN] Would update attribute"
                );
            }
            return;
        }

        let mut failed = false;
        for (attribute, value) in &updates {
            if let Err(e) = self
                .target
                .update_user_attribute(&user.identifier, attribute, value)
                .await
            {
                failed = true;
                outcome.record_failure(CycleError::for_entity(
                    &user.identifier,
                    format!("update of {attribute} failed: {e}"),
                ));
            }
        }

        if !failed {
            outcome.counts.updated += 1;
            self.audit_best_effort(AuditEntry::success(
                "user_updated",
                "system",
                "user",
                &user.identifier,
                json!({ "attributes": updates.iter().map(|(a, _)| *a).collect::<Vec<_>>() }),
                AuditSource::Sync,
            ))
            .await;
        }
    }

    /// Delete target entries whose identifier no longer exists upstream.
    /// Only reached when deletion is enabled in the settings.
    async fn delete_orphans(
        &self,
        source_users: &[SourceUser],
        target_records: &[TargetRecord],
        outcome: &mut CycleOutcome,
    ) {
        let source_ids: HashSet<&str> = source_users
            .iter()
            .map(|u| u.identifier.as_str())
            .collect();

        for record in target_records {
            if source_ids.contains(record.identifier.as_str()) {
                continue;
            }

            if self.settings.dry_run {
                tracing::info!(
                    identifier = %record.identifier,
                    dn = %record.dn,
                    "[DRY RUN] Would delete user"
                );
                continue;
            }

            match self.target.delete_user(&record.identifier).await {
                Ok(()) => {
                    outcome.counts.deleted += 1;
                    self.audit_best_effort(AuditEntry::success(
                        "user_deleted",
                        "system",
                        "user",
                        &record.identifier,
                        json!({ "dn": record.dn }),
                        AuditSource::Sync,
                    ))
                    .await;
                    tracing::info!(identifier = %record.identifier, "Orphaned user deleted");
                }
                Err(e) => {
                    outcome.record_failure(CycleError::for_entity(
                        &record.identifier,
                        format!("delete failed: {e}"),
                    ));
                }
            }
        }
    }

    /// Mirror upstream groups into the target directory. The whole phase is
    /// non-fatal; a failure here still leaves users synced.
    async fn sync_groups(&self, source_users: &[SourceUser], outcome: &mut CycleOutcome) {
        let groups = match self.source.list_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                outcome.record_failure(CycleError::cycle(format!("group fetch failed: {e}")));
                return;
            }
        };

        let existing: HashSet<String> = match self.target.list_groups().await {
            Ok(names) => names.into_iter().collect(),
            Err(e) => {
                outcome.record_failure(CycleError::cycle(format!(
                    "target group listing failed: {e}"
                )));
                return;
            }
        };

        let provisioned: HashSet<&str> = source_users
            .iter()
            .filter(|u| u.has_credential)
            .map(|u| u.identifier.as_str())
            .collect();

        for group in &groups {
            let members = match self.source.list_group_members(&group.id).await {
                Ok(members) => members,
                Err(e) => {
                    outcome.record_failure(CycleError::for_entity(
                        &group.name,
                        format!("member fetch failed: {e}"),
                    ));
                    continue;
                }
            };

            // Only members actually provisioned downstream; groupOfNames
            // requires at least one member, hence the placeholder.
            let mut members: Vec<String> = members
                .into_iter()
                .filter(|m| provisioned.contains(m.as_str()))
                .collect();
            if members.is_empty() {
                members.push(self.settings.placeholder_member.clone());
            }

            if self.settings.dry_run {
                tracing::info!(
                    group = %group.name,
                    members = members.len(),
                    "[DRY RUN] Would sync group"
                );
                continue;
            }

            let result = if existing.contains(&group.name) {
                self.target.replace_group_members(&group.name, &members).await
            } else {
                self.target.create_group(&group.name, &members).await
            };

            match result {
                Ok(()) => {
                    outcome.counts.groups_synced += 1;
                    self.audit_best_effort(AuditEntry::success(
                        "group_synced",
                        "system",
                        "group",
                        &group.name,
                        json!({ "members": members.len() }),
                        AuditSource::Sync,
                    ))
                    .await;
                }
                Err(e) => {
                    outcome.record_failure(CycleError::for_entity(
                        &group.name,
                        format!("group sync failed: {e}"),
                    ));
                }
            }
        }
    }

    /// Seal the cycle: update state and rings, persist the record, publish
    /// the terminal status event.
    async fn finalize(
        &self,
        cycle_id: String,
        started_at: DateTime<Utc>,
        clock: Instant,
        outcome: CycleOutcome,
        fatal: Option<SyncError>,
    ) -> SyncCycleRecord {
        let completed_at = Utc::now();
        let duration_ms = clock.elapsed().as_millis() as i64;

        let mut errors = outcome.errors;
        let mut counts = outcome.counts;
        let status = match &fatal {
            Some(e) => {
                counts.errors += 1;
                errors.push(CycleError::cycle(e.to_string()));
                CycleStatus::Failed
            }
            None => CycleStatus::Success,
        };

        let record = SyncCycleRecord {
            cycle_id: cycle_id.clone(),
            started_at,
            completed_at,
            duration_ms,
            status,
            counts,
            total_source_records: outcome.total_source_records,
            total_target_records: outcome.total_target_records,
            error_details: errors.clone(),
        };

        {
            let mut state = self.state.lock().await;
            state.status = match status {
                CycleStatus::Failed => SyncStatus::Failed,
                _ => SyncStatus::Success,
            };
            state.current_cycle = None;
            state.last_sync_time = Some(completed_at);
            state.last_sync_duration_ms = Some(duration_ms);
            if matches!(fatal, Some(SyncError::Connection { .. })) {
                state.is_connected = false;
            }
            for error in errors {
                state.push_error(error);
            }
            state.push_history(record.clone());
        }

        if let Err(e) = self.history.record_cycle(&record).await {
            tracing::warn!(cycle_id = %cycle_id, error = %e, "Failed to persist cycle record");
        }

        self.publish_status(SyncStatusEvent {
            status: record.status.to_string(),
            cycle_id: cycle_id.clone(),
            duration_ms: Some(duration_ms),
            counts: Some(record.counts),
            error: fatal.as_ref().map(ToString::to_string),
        });
        self.publish_log(
            if status == CycleStatus::Failed { "error" } else { "info" },
            format!("Sync cycle {cycle_id} finished: {status}"),
            json!({ "duration_ms": duration_ms, "errors": record.counts.errors }),
        );

        match &fatal {
            Some(e) => tracing::error!(
                cycle_id = %cycle_id,
                duration_ms,
                error = %e,
                "Sync cycle failed"
            ),
            None => tracing::info!(
                cycle_id = %cycle_id,
                duration_ms,
                created = record.counts.created,
                updated = record.counts.updated,
                deleted = record.counts.deleted,
                groups_synced = record.counts.groups_synced,
                changes_detected = record.counts.changes_detected,
                errors = record.counts.errors,
                "Sync cycle complete"
            ),
        }

        record
    }

    fn build_entry(&self, user: &SourceUser) -> NewTargetEntry {
        let mail = if user.email.is_empty() {
            format!("{}@{}", user.identifier, self.settings.mail_domain)
        } else {
            user.email.clone()
        };

        let mut extra_attributes = HashMap::new();
        for (source_attr, target_attr) in &self.settings.attribute_mapping {
            if let Some(value) = user.attributes.get(source_attr) {
                if !value.is_empty() {
                    extra_attributes.insert(target_attr.clone(), value.clone());
                }
            }
        }

        NewTargetEntry {
            identifier: user.identifier.clone(),
            cn: user.display_name_or_identifier().to_string(),
            sn: user.surname().to_string(),
            given_name: user.given_name().to_string(),
            mail,
            extra_attributes,
        }
    }

    async fn audit_best_effort(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry).await {
            tracing::warn!(action = %entry.action, error = %e, "Audit append failed");
        }
    }

    fn publish_status(&self, event: SyncStatusEvent) {
        self.events.publish(
            Topic::SyncStatus,
            serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        );
    }

    fn publish_log(&self, level: &str, message: String, context: serde_json::Value) {
        self.events.publish(
            Topic::Logs,
            serde_json::to_value(LogEvent::new(level, message, context))
                .unwrap_or(serde_json::Value::Null),
        );
    }
}

/// Tracked-attribute updates needed to bring a target entry in line with its
/// source user. Same comparison rules as the reconciliation engine.
fn attribute_updates(user: &SourceUser, record: &TargetRecord) -> Vec<(&'static str, String)> {
    let mut updates = Vec::new();

    if !user.email.is_empty() && !record.mail.is_empty() && user.email != record.mail {
        updates.push(("mail", user.email.clone()));
    }

    let display_name = user.display_name_or_identifier();
    if !record.cn.is_empty() && display_name != record.cn {
        updates.push(("cn", display_name.to_string()));
    }

    let surname = user.surname();
    if !record.sn.is_empty() && surname != record.sn {
        updates.push(("sn", surname.to_string()));
    }

    updates
}
