//! Audit log (C7): append-only, synchronous writes, query by any subset of
//! trace-id/category/severity/time-range fields, newest-first pagination.

use chrono::{DateTime, Utc};
use govrail_types::{AuditCategory, AuditEvent, Severity};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::error;

#[derive(Debug, Default, Clone)]
pub struct AuditQuery {
    pub mission_id: Option<String>,
    pub plan_id: Option<String>,
    pub job_id: Option<String>,
    pub attempt_id: Option<String>,
    pub category: Option<AuditCategory>,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(ref v) = self.mission_id {
            if event.trace_ids.mission_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(ref v) = self.plan_id {
            if event.trace_ids.plan_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(ref v) = self.job_id {
            if event.trace_ids.job_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(ref v) = self.attempt_id {
            if event.trace_ids.attempt_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(category) = self.category {
            if event.category != category {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Set to `true` for the remainder of the process after the first write
/// failure; surfaced on every subsequently produced decision/event read so
/// consumers know the trail may be incomplete.
#[derive(Default)]
pub struct AuditLog {
    events: RwLock<Vec<AuditEvent>>,
    degraded: AtomicBool,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Synchronous append. In this in-process implementation the only
    /// failure mode is lock poisoning from a prior panic; callers that
    /// need to preserve audit/side-effect ordering can propagate the
    /// error to fail the originating operation.
    pub fn append(&self, event: AuditEvent) -> Result<(), govrail_types::GovrailError> {
        match self.events.write() {
            Ok(mut events) => {
                events.push(event);
                Ok(())
            }
            Err(_) => {
                self.degraded.store(true, Ordering::Relaxed);
                error!("audit log write failed, marking runtime degraded");
                Err(govrail_types::GovrailError::AuditLogFailure {
                    detail: "audit log lock poisoned".to_string(),
                })
            }
        }
    }

    /// Newest-first, paginated by `query.limit`/`query.offset`.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let events = self.events.read().expect("audit log poisoned");
        let mut matched: Vec<&AuditEvent> = events.iter().filter(|e| query.matches(e)).collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let limit = if query.limit == 0 { matched.len() } else { query.limit };
        matched
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent `n` events irrespective of any filter; used by the SSE
    /// fabric's initial-connect replay and trace surfaces.
    pub fn tail(&self, n: usize) -> Vec<AuditEvent> {
        let events = self.events.read().expect("audit log poisoned");
        events.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().expect("audit log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
