//! Execution events and their kinds.

use chrono::{DateTime, Utc};
use job_core::TaskId;
use serde::{Deserialize, Serialize};

/// Store-assigned event identifier.
pub type EventId = i64;

/// Event kind as reported by the running process.
///
/// Only a handful of kinds carry meaning for the pipeline; everything else is
/// stored as [`EventKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    PlayStart,
    TaskStart,
    /// The run finished; per-job parent tracking is reset.
    Stats,
    RunnerFailed,
    RunnerUnreachable,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PlayStart => "playbook_on_play_start",
            EventKind::TaskStart => "playbook_on_task_start",
            EventKind::Stats => "playbook_on_stats",
            EventKind::RunnerFailed => "runner_on_failed",
            EventKind::RunnerUnreachable => "runner_on_unreachable",
            EventKind::Custom(name) => name,
        }
    }

    /// Kinds later events point at as their parent.
    pub fn is_anchor(&self) -> bool {
        matches!(self, EventKind::PlayStart | EventKind::TaskStart)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, EventKind::RunnerFailed | EventKind::RunnerUnreachable)
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "playbook_on_play_start" => EventKind::PlayStart,
            "playbook_on_task_start" => EventKind::TaskStart,
            "playbook_on_stats" => EventKind::Stats,
            "runner_on_failed" => EventKind::RunnerFailed,
            "runner_on_unreachable" => EventKind::RunnerUnreachable,
            _ => EventKind::Custom(name),
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        EventKind::from(name.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message shape on the intake channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub job_id: TaskId,
    pub event: String,
    #[serde(default)]
    pub event_data: serde_json::Value,
    /// Per-job sequence number assigned by the emitter.
    pub counter: u64,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl InboundEvent {
    pub fn new(job_id: TaskId, event: impl Into<String>, counter: u64) -> Self {
        Self {
            job_id,
            event: event.into(),
            event_data: serde_json::Value::Null,
            counter,
            created: None,
        }
    }

    pub fn with_data(mut self, event_data: serde_json::Value) -> Self {
        self.event_data = event_data;
        self
    }
}

/// An event ready to be persisted, parent already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub job_id: TaskId,
    pub counter: u64,
    pub kind: EventKind,
    pub event_data: serde_json::Value,
    pub host: Option<String>,
    pub parent_id: Option<EventId>,
    pub failed: bool,
    pub created: DateTime<Utc>,
}

impl NewEvent {
    pub fn from_inbound(msg: InboundEvent, parent_id: Option<EventId>) -> Self {
        let kind = EventKind::from(msg.event);
        let host = msg
            .event_data
            .get("host")
            .and_then(|h| h.as_str())
            .map(str::to_string);
        let reported_failed = msg
            .event_data
            .get("failed")
            .and_then(|f| f.as_bool())
            .unwrap_or(false);

        Self {
            job_id: msg.job_id,
            counter: msg.counter,
            failed: kind.is_failure() || reported_failed,
            kind,
            event_data: msg.event_data,
            host,
            parent_id,
            created: msg.created.unwrap_or_else(Utc::now),
        }
    }

    pub fn into_event(self, id: EventId) -> ExecutionEvent {
        ExecutionEvent {
            id,
            job_id: self.job_id,
            counter: self.counter,
            kind: self.kind,
            event_data: self.event_data,
            host: self.host,
            parent_id: self.parent_id,
            failed: self.failed,
            created: self.created,
        }
    }
}

/// One persisted event. Immutable apart from `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub id: EventId,
    pub job_id: TaskId,
    pub counter: u64,
    pub kind: EventKind,
    pub event_data: serde_json::Value,
    pub host: Option<String>,
    pub parent_id: Option<EventId>,
    /// Set for failure kinds, and on a parent when any child failed.
    pub failed: bool,
    pub created: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_names_round_trip() {
        for name in ["playbook_on_play_start", "runner_on_ok", "playbook_on_stats"] {
            assert_eq!(String::from(EventKind::from(name)), name);
        }
        assert!(EventKind::from("playbook_on_task_start").is_anchor());
        assert!(!EventKind::from("runner_on_ok").is_anchor());
    }

    #[test]
    fn test_host_and_failed_are_derived() {
        let msg = InboundEvent::new(5, "runner_on_ok", 3)
            .with_data(json!({"host": "web-1", "failed": true}));
        let event = NewEvent::from_inbound(msg, Some(9));
        assert_eq!(event.host.as_deref(), Some("web-1"));
        assert!(event.failed);
        assert_eq!(event.parent_id, Some(9));

        let unreachable = NewEvent::from_inbound(InboundEvent::new(5, "runner_on_unreachable", 4), None);
        assert!(unreachable.failed);
        assert_eq!(unreachable.host, None);
    }

    #[test]
    fn test_inbound_decodes_wire_shape() {
        let msg: InboundEvent = serde_json::from_value(json!({
            "job_id": 12,
            "event": "playbook_on_play_start",
            "event_data": {"play": "site"},
            "counter": 1,
            "created": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.job_id, 12);
        assert!(msg.created.is_some());
    }
}
