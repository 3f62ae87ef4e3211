//! Sync error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the sync core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Target directory unreachable or bind rejected. Cycle-fatal; forces a
    /// reconnect on the next cycle.
    #[error("target connection error: {message}")]
    Connection { message: String },

    /// Source directory unreachable or returned a non-success response.
    /// Cycle-fatal.
    #[error("upstream fetch error: {message}")]
    UpstreamFetch { message: String },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Persisting a detection batch failed. Aborts only the detection phase.
    #[error("detection persistence failed: {message}")]
    Detection { message: String },

    /// Post-approval directory mutation failed. The change stays approved
    /// with the error recorded on the row.
    #[error("failed to apply change {change_id}: {message}")]
    Apply { change_id: Uuid, message: String },

    /// Change not found.
    #[error("change not found: {change_id}")]
    ChangeNotFound { change_id: Uuid },

    /// Invalid change status transition.
    #[error("invalid status transition for change {change_id}: {from} -> {to}")]
    InvalidTransition {
        change_id: Uuid,
        from: String,
        to: String,
    },

    /// A cycle is already running; the request is rejected, not queued.
    #[error("sync cycle already running: {cycle_id}")]
    CycleInProgress { cycle_id: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an upstream fetch error.
    pub fn upstream_fetch(message: impl Into<String>) -> Self {
        Self::UpstreamFetch {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a detection persistence error.
    pub fn detection(message: impl Into<String>) -> Self {
        Self::Detection {
            message: message.into(),
        }
    }

    /// Create an apply error.
    pub fn apply(change_id: Uuid, message: impl Into<String>) -> Self {
        Self::Apply {
            change_id,
            message: message.into(),
        }
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(
        change_id: Uuid,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            change_id,
            from: from.into(),
            to: to.into(),
        }
    }

    /// Check whether this error aborts the whole cycle.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Connection { .. } | SyncError::UpstreamFetch { .. }
        )
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_fatal_classification() {
        assert!(SyncError::connection("bind rejected").is_cycle_fatal());
        assert!(SyncError::upstream_fetch("502").is_cycle_fatal());
        assert!(!SyncError::detection("tx rolled back").is_cycle_fatal());
        assert!(!SyncError::apply(Uuid::new_v4(), "entry gone").is_cycle_fatal());
        assert!(!SyncError::database("pool closed").is_cycle_fatal());
    }

    #[test]
    fn test_error_display() {
        let id = Uuid::new_v4();
        let err = SyncError::apply(id, "entry not found");
        assert!(err.to_string().contains(&id.to_string()));
        assert!(err.to_string().contains("entry not found"));

        let err = SyncError::CycleInProgress {
            cycle_id: "sync-123".to_string(),
        };
        assert!(err.to_string().contains("sync-123"));
    }
}
