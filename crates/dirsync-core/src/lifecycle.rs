//! Change approval, rejection and apply.
//!
//! Approve and apply are two separately-committed steps: approval records the
//! decision, apply performs the directory mutation. A failed apply leaves the
//! change approved with the error on the row, so the operator can retry the
//! apply without re-approving.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use dirsync_gateway::TargetDirectory;

use crate::error::{SyncError, SyncResult};
use crate::model::{AuditEntry, AuditSource, Change, ChangeStatus, ChangeType};
use crate::store::{AuditTrail, ChangeStore};

/// Target directory attribute a tracked source field maps to.
///
/// Unknown fields pass through unchanged so schema extensions on the target
/// side do not require a code change here.
pub fn target_attribute(field_name: &str) -> &str {
    match field_name {
        "email" => "mail",
        "name" => "cn",
        "sn" => "sn",
        other => other,
    }
}

/// Drives change records through their lifecycle.
pub struct ChangeLifecycle {
    changes: Arc<dyn ChangeStore>,
    audit: Arc<dyn AuditTrail>,
    target: Arc<dyn TargetDirectory>,
}

impl ChangeLifecycle {
    pub fn new(
        changes: Arc<dyn ChangeStore>,
        audit: Arc<dyn AuditTrail>,
        target: Arc<dyn TargetDirectory>,
    ) -> Self {
        Self {
            changes,
            audit,
            target,
        }
    }

    /// Approve a pending change and immediately attempt to apply it.
    ///
    /// The approval commits on its own; if the subsequent apply fails the
    /// change is returned in approved state with `error_message` set rather
    /// than propagating the apply error.
    pub async fn approve(&self, id: Uuid, approver: &str) -> SyncResult<Change> {
        let change = self.load(id).await?;
        if !change.status.can_approve() {
            return Err(SyncError::invalid_transition(
                id,
                change.status.to_string(),
                ChangeStatus::Approved.to_string(),
            ));
        }

        let approved = self.changes.mark_approved(id, approver).await?;
        self.audit
            .append(&AuditEntry::success(
                "change_approved",
                approver,
                approved.entity_type.to_string(),
                &approved.entity_id,
                json!({
                    "change_id": id,
                    "change_type": approved.change_type.to_string(),
                    "field_name": approved.field_name,
                }),
                AuditSource::Api,
            ))
            .await?;

        tracing::info!(
            change_id = %id,
            approver = %approver,
            change_type = %approved.change_type,
            "Change approved"
        );

        match self.apply(id, approver).await {
            Ok(applied) => Ok(applied),
            Err(SyncError::Apply { .. }) => {
                // Approval stands; the operator retries the apply later.
                self.load(id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Reject a pending change. Never touches the target directory.
    pub async fn reject(&self, id: Uuid, rejecter: &str, reason: Option<&str>) -> SyncResult<Change> {
        let change = self.load(id).await?;
        if !change.status.can_reject() {
            return Err(SyncError::invalid_transition(
                id,
                change.status.to_string(),
                ChangeStatus::Rejected.to_string(),
            ));
        }

        let rejected = self.changes.mark_rejected(id, rejecter).await?;
        self.audit
            .append(&AuditEntry::success(
                "change_rejected",
                rejecter,
                rejected.entity_type.to_string(),
                &rejected.entity_id,
                json!({
                    "change_id": id,
                    "change_type": rejected.change_type.to_string(),
                    "reason": reason,
                }),
                AuditSource::Api,
            ))
            .await?;

        tracing::info!(change_id = %id, rejecter = %rejecter, "Change rejected");

        Ok(rejected)
    }

    /// Apply an approved change to the target directory.
    ///
    /// On failure the change stays approved with the error recorded, and the
    /// call returns [`SyncError::Apply`]. Retryable.
    pub async fn apply(&self, id: Uuid, actor: &str) -> SyncResult<Change> {
        let change = self.load(id).await?;
        if !change.status.can_apply() {
            return Err(SyncError::invalid_transition(
                id,
                change.status.to_string(),
                ChangeStatus::Applied.to_string(),
            ));
        }

        let result = self.mutate_target(&change).await;

        match result {
            Ok(()) => {
                let applied = self.changes.mark_applied(id).await?;
                self.audit
                    .append(&AuditEntry::success(
                        "change_applied",
                        actor,
                        applied.entity_type.to_string(),
                        &applied.entity_id,
                        json!({
                            "change_id": id,
                            "change_type": applied.change_type.to_string(),
                            "field_name": applied.field_name,
                            "source_value": applied.source_value,
                            "target_value": applied.target_value,
                        }),
                        AuditSource::Api,
                    ))
                    .await?;

                tracing::info!(
                    change_id = %id,
                    entity_id = %applied.entity_id,
                    change_type = %applied.change_type,
                    "Change applied"
                );

                Ok(applied)
            }
            Err(message) => {
                self.changes.record_apply_error(id, &message).await?;
                self.audit
                    .append(&AuditEntry::failure(
                        "change_apply_failed",
                        actor,
                        change.entity_type.to_string(),
                        &change.entity_id,
                        json!({
                            "change_id": id,
                            "change_type": change.change_type.to_string(),
                        }),
                        AuditSource::Api,
                        &message,
                    ))
                    .await?;

                tracing::warn!(
                    change_id = %id,
                    entity_id = %change.entity_id,
                    error = %message,
                    "Change apply failed"
                );

                Err(SyncError::apply(id, message))
            }
        }
    }

    /// Perform the directory mutation a change calls for.
    async fn mutate_target(&self, change: &Change) -> Result<(), String> {
        match change.change_type {
            ChangeType::FieldMismatch => {
                let field = change
                    .field_name
                    .as_deref()
                    .ok_or_else(|| "field mismatch without field_name".to_string())?;
                let value = change
                    .source_value
                    .as_deref()
                    .ok_or_else(|| "field mismatch without source value".to_string())?;
                self.target
                    .update_user_attribute(&change.entity_id, target_attribute(field), value)
                    .await
                    .map_err(|e| e.to_string())
            }
            ChangeType::Orphan => self
                .target
                .delete_user(&change.entity_id)
                .await
                .map_err(|e| e.to_string()),
            ChangeType::InactiveUser => {
                // Advisory record; there is nothing to mutate. Applying it
                // acknowledges the account stays unprovisioned.
                tracing::info!(
                    entity_id = %change.entity_id,
                    "Inactive-user change acknowledged, no directory mutation"
                );
                Ok(())
            }
        }
    }

    async fn load(&self, id: Uuid) -> SyncResult<Change> {
        self.changes
            .get(id)
            .await?
            .ok_or(SyncError::ChangeNotFound { change_id: id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_to_attribute_mapping() {
        assert_eq!(target_attribute("email"), "mail");
        assert_eq!(target_attribute("name"), "cn");
        assert_eq!(target_attribute("sn"), "sn");
        assert_eq!(target_attribute("telephoneNumber"), "telephoneNumber");
    }
}
