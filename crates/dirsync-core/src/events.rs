//! Outbound event interface.
//!
//! Cycle state transitions, structured log lines and change-detection
//! summaries are pushed to subscribers through [`EventSink`]. Delivery is
//! at-most-once and fire-and-forget: no acknowledgement, no replay for
//! disconnected subscribers. The transport behind the sink (websocket,
//! message bus) is an external collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::model::CycleCounts;

/// Topics events are published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Cycle state transitions with counts.
    SyncStatus,
    /// Structured log lines.
    Logs,
    /// Change-detection summaries.
    Changes,
}

impl Topic {
    /// Wire name of the topic.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SyncStatus => "sync-status",
            Self::Logs => "logs",
            Self::Changes => "changes",
        }
    }
}

/// Fire-and-forget publisher of status/log/change events.
///
/// Implementations must not block the caller; a slow or disconnected
/// subscriber loses events.
pub trait EventSink: Send + Sync {
    /// Publish an event. Best-effort; failures are swallowed by the sink.
    fn publish(&self, topic: Topic, payload: JsonValue);
}

/// Sink that drops every event.
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _topic: Topic, _payload: JsonValue) {}
}

/// Payload for `sync-status` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusEvent {
    /// Cycle state: "running", "success" or "failed".
    pub status: String,
    /// Cycle the transition belongs to.
    pub cycle_id: String,
    /// Duration, present once the cycle finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Counters, present once the cycle finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<CycleCounts>,
    /// Error summary for failed cycles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for `logs` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub context: JsonValue,
}

impl LogEvent {
    /// Build a log event stamped now.
    pub fn new(level: &str, message: impl Into<String>, context: JsonValue) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.to_string(),
            message: message.into(),
            context,
        }
    }
}

/// Payload for `changes` events: one detection run's summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChangesDetectedEvent {
    pub orphans: usize,
    pub mismatches: usize,
    pub inactive: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_wire_names() {
        assert_eq!(Topic::SyncStatus.as_str(), "sync-status");
        assert_eq!(Topic::Logs.as_str(), "logs");
        assert_eq!(Topic::Changes.as_str(), "changes");
    }

    #[test]
    fn test_status_event_omits_unset_fields() {
        let event = SyncStatusEvent {
            status: "running".to_string(),
            cycle_id: "sync-1".to_string(),
            duration_ms: None,
            counts: None,
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("duration_ms").is_none());
        assert!(json.get("counts").is_none());
    }
}
