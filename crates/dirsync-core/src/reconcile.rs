//! Reconciliation engine.
//!
//! Pure diff/classification over two in-memory rosters. No network access,
//! no persistence: the orchestrator fetches the rosters and hands the
//! resulting candidates to the change store, which merges them against
//! existing pending rows.

use serde_json::json;
use std::collections::{HashMap, HashSet};

use dirsync_gateway::{SourceUser, TargetRecord};

use crate::model::ChangeCandidate;

/// Result of one detection run.
#[derive(Debug, Default)]
pub struct Detection {
    /// Drift candidates, not yet merged against the store.
    pub candidates: Vec<ChangeCandidate>,
    /// Failures from individual sub-detectors. A failure in one detector
    /// never suppresses the output of the others.
    pub errors: Vec<String>,
    /// Orphan candidate count.
    pub orphans: usize,
    /// Field-mismatch candidate count.
    pub mismatches: usize,
    /// Inactive-user candidate count.
    pub inactive: usize,
}

impl Detection {
    /// Total number of candidates.
    pub fn total(&self) -> usize {
        self.candidates.len()
    }
}

/// Compares the source-of-truth roster against the target directory roster
/// and classifies drift.
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    /// Run all sub-detectors over the given rosters.
    pub fn detect(source: &[SourceUser], target: &[TargetRecord]) -> Detection {
        let mut detection = Detection::default();

        match Self::detect_orphans(source, target) {
            Ok(mut orphans) => {
                detection.orphans = orphans.len();
                detection.candidates.append(&mut orphans);
            }
            Err(e) => detection.errors.push(format!("orphan detection: {e}")),
        }

        let mut mismatches = Self::detect_field_mismatches(source, target);
        detection.mismatches = mismatches.len();
        detection.candidates.append(&mut mismatches);

        let mut inactive = Self::detect_inactive_users(source);
        detection.inactive = inactive.len();
        detection.candidates.append(&mut inactive);

        tracing::info!(
            orphans = detection.orphans,
            mismatches = detection.mismatches,
            inactive = detection.inactive,
            total = detection.total(),
            errors = detection.errors.len(),
            "Change detection complete"
        );

        detection
    }

    /// Target entries whose identifier is absent from the source roster.
    fn detect_orphans(
        source: &[SourceUser],
        target: &[TargetRecord],
    ) -> Result<Vec<ChangeCandidate>, serde_json::Error> {
        let source_ids: HashSet<&str> = source.iter().map(|u| u.identifier.as_str()).collect();

        let mut orphans = Vec::new();
        for record in target {
            if source_ids.contains(record.identifier.as_str()) {
                continue;
            }
            let serialized = serde_json::to_string(record)?;
            orphans.push(ChangeCandidate::orphan(
                &record.identifier,
                serialized,
                json!({
                    "dn": record.dn,
                    "mail": record.mail,
                    "cn": record.cn,
                }),
            ));
        }

        Ok(orphans)
    }

    /// Tracked-field differences for users present in both rosters.
    ///
    /// Comparisons are exact and case-sensitive. A mismatch is only reported
    /// when the target attribute is set; email additionally requires the
    /// source value to be set, since an empty source email is defaulted at
    /// creation time rather than treated as drift.
    fn detect_field_mismatches(
        source: &[SourceUser],
        target: &[TargetRecord],
    ) -> Vec<ChangeCandidate> {
        let target_by_id: HashMap<&str, &TargetRecord> = target
            .iter()
            .map(|r| (r.identifier.as_str(), r))
            .collect();

        let mut mismatches = Vec::new();
        for user in source {
            let Some(record) = target_by_id.get(user.identifier.as_str()) else {
                continue;
            };
            let metadata = json!({ "dn": record.dn });

            if !user.email.is_empty() && !record.mail.is_empty() && user.email != record.mail {
                mismatches.push(ChangeCandidate::field_mismatch(
                    &user.identifier,
                    "email",
                    &user.email,
                    &record.mail,
                    metadata.clone(),
                ));
            }

            let display_name = user.display_name_or_identifier();
            if !record.cn.is_empty() && display_name != record.cn {
                mismatches.push(ChangeCandidate::field_mismatch(
                    &user.identifier,
                    "name",
                    display_name,
                    &record.cn,
                    metadata.clone(),
                ));
            }

            let surname = user.surname();
            if !record.sn.is_empty() && surname != record.sn {
                mismatches.push(ChangeCandidate::field_mismatch(
                    &user.identifier,
                    "sn",
                    surname,
                    &record.sn,
                    metadata,
                ));
            }
        }

        mismatches
    }

    /// Source accounts without a credential, intentionally left unprovisioned.
    fn detect_inactive_users(source: &[SourceUser]) -> Vec<ChangeCandidate> {
        source
            .iter()
            .filter(|u| !u.has_credential)
            .map(|u| {
                ChangeCandidate::inactive_user(
                    &u.identifier,
                    json!({
                        "email": u.email,
                        "name": u.display_name,
                        "reason": "no credential set in source directory",
                    }),
                )
            })
            .collect()
    }
}
