//! Event entities (C7, C8): the append-only audit record and the SSE wire
//! envelope.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Governance,
    Enforcement,
    Reflex,
    Executor,
    Rbac,
    System,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceIds {
    pub mission_id: Option<String>,
    pub plan_id: Option<String>,
    pub job_id: Option<String>,
    pub attempt_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub trace_ids: TraceIds,
    pub category: AuditCategory,
    pub severity: Severity,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        trace_ids: TraceIds,
        category: AuditCategory,
        severity: Severity,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            trace_ids,
            category,
            severity,
            event_type: event_type.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    Audit,
    Lifecycle,
    Metrics,
    Reflex,
    Governor,
    Enforcement,
    All,
}

impl EventChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            EventChannel::Audit => "audit",
            EventChannel::Lifecycle => "lifecycle",
            EventChannel::Metrics => "metrics",
            EventChannel::Reflex => "reflex",
            EventChannel::Governor => "governor",
            EventChannel::Enforcement => "enforcement",
            EventChannel::All => "all",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_id: String,
    pub channel: EventChannel,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: HashMap<String, serde_json::Value>,
}

impl StreamEvent {
    pub fn new(channel: EventChannel, event_type: impl Into<String>, data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            channel,
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// `id: <event_id>\nevent: <event_type>\ndata: <json>\n\n`
    pub fn to_sse_format(&self) -> String {
        let payload = serde_json::json!({
            "channel": self.channel.as_str(),
            "event_type": self.event_type,
            "timestamp": self.timestamp.to_rfc3339(),
            "data": self.data,
        });
        format!(
            "id: {}\nevent: {}\ndata: {}\n\n",
            self.event_id,
            self.event_type,
            payload
        )
    }

    /// Does this event's entity ids intersect the requested set?
    pub fn matches_entity_ids(&self, entity_ids: &[String]) -> bool {
        if entity_ids.is_empty() {
            return true;
        }
        const FIELDS: [&str; 4] = ["mission_id", "plan_id", "job_id", "attempt_id"];
        FIELDS.iter().any(|field| {
            self.data
                .get(*field)
                .and_then(|v| v.as_str())
                .map(|v| entity_ids.iter().any(|e| e == v))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_format_has_id_event_and_data_lines() {
        let event = StreamEvent::new(EventChannel::Audit, "job.completed", HashMap::new());
        let rendered = event.to_sse_format();
        assert!(rendered.starts_with("id: "));
        assert!(rendered.contains("event: job.completed"));
        assert!(rendered.ends_with("\n\n"));
    }

    #[test]
    fn entity_id_filter_matches_any_field() {
        let mut data = HashMap::new();
        data.insert("job_id".to_string(), serde_json::json!("j_abc"));
        let event = StreamEvent::new(EventChannel::Lifecycle, "job.suspended", data);
        assert!(event.matches_entity_ids(&["j_abc".to_string()]));
        assert!(!event.matches_entity_ids(&["j_other".to_string()]));
        assert!(event.matches_entity_ids(&[]));
    }
}
