//! Sync configuration.
//!
//! Settings controlling what a cycle is allowed to do. Deletion is opt-in:
//! an unset `SYNC_DELETE_USERS` leaves orphaned target entries alone and the
//! reconciliation engine reports them as drift instead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Settings for the sync orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Minutes between timer-triggered cycles.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Whether group membership is reconciled.
    #[serde(default = "default_true")]
    pub sync_groups: bool,
    /// Log intended mutations instead of performing them.
    #[serde(default)]
    pub dry_run: bool,
    /// Create target entries for source users missing downstream.
    #[serde(default = "default_true")]
    pub create_users: bool,
    /// Update tracked attributes on existing target entries.
    #[serde(default = "default_true")]
    pub update_users: bool,
    /// Delete target entries absent from the source roster.
    #[serde(default)]
    pub delete_users: bool,
    /// Domain used to default a mail address when the source has none.
    #[serde(default = "default_mail_domain")]
    pub mail_domain: String,
    /// Member identifier inserted into groups that would otherwise be empty.
    #[serde(default = "default_placeholder_member")]
    pub placeholder_member: String,
    /// Optional source attribute -> target attribute mapping applied on create.
    #[serde(default = "default_attribute_mapping")]
    pub attribute_mapping: HashMap<String, String>,
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_mail_domain() -> String {
    "example.com".to_string()
}

fn default_placeholder_member() -> String {
    "placeholder".to_string()
}

fn default_attribute_mapping() -> HashMap<String, String> {
    HashMap::from([
        ("phone".to_string(), "telephoneNumber".to_string()),
        ("title".to_string(), "title".to_string()),
        ("department".to_string(), "ou".to_string()),
        ("employee_number".to_string(), "employeeNumber".to_string()),
    ])
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            sync_groups: true,
            dry_run: false,
            create_users: true,
            update_users: true,
            delete_users: false,
            mail_domain: default_mail_domain(),
            placeholder_member: default_placeholder_member(),
            attribute_mapping: default_attribute_mapping(),
        }
    }
}

impl SyncSettings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval_minutes: env_u64("SYNC_INTERVAL_MINUTES", defaults.interval_minutes),
            sync_groups: env_flag("SYNC_GROUPS", defaults.sync_groups),
            dry_run: env_flag("SYNC_DRY_RUN", defaults.dry_run),
            create_users: env_flag("SYNC_CREATE_USERS", defaults.create_users),
            update_users: env_flag("SYNC_UPDATE_USERS", defaults.update_users),
            delete_users: env_flag("SYNC_DELETE_USERS", defaults.delete_users),
            mail_domain: std::env::var("MAIL_DOMAIN").unwrap_or(defaults.mail_domain),
            placeholder_member: std::env::var("SYNC_PLACEHOLDER_MEMBER")
                .unwrap_or(defaults.placeholder_member),
            attribute_mapping: defaults.attribute_mapping,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
