//! Trace entities (C1): Mission, Plan, Job, Attempt.
//!
//! These are plain data types. Allocation, parent validation, and trace
//! reconstruction live in the `govrail-identity` crate's `TraceRegistry`,
//! which is the stateful service that owns these tables.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AttemptId, JobId, MissionId, PlanId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: MissionId,
    pub title: String,
    pub goal: String,
    pub tags: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(title: impl Into<String>, goal: impl Into<String>, tags: HashMap<String, String>) -> Self {
        Self {
            mission_id: MissionId::new(),
            title: title.into(),
            goal: goal.into(),
            tags,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Sequential,
    Dag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: PlanId,
    pub mission_id: MissionId,
    pub plan_type: PlanType,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(mission_id: MissionId, plan_type: PlanType) -> Self {
        Self {
            plan_id: PlanId::new(),
            mission_id,
            plan_type,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub plan_id: PlanId,
    pub job_type: String,
    pub depends_on: HashSet<JobId>,
    pub rollback_possible: bool,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        plan_id: PlanId,
        job_type: impl Into<String>,
        depends_on: HashSet<JobId>,
        rollback_possible: bool,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            plan_id,
            job_type: job_type.into(),
            depends_on,
            rollback_possible,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_id: AttemptId,
    pub job_id: JobId,
    pub attempt_number: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
}

impl Attempt {
    pub fn new(job_id: JobId, attempt_number: u32) -> Self {
        Self {
            attempt_id: AttemptId::new(),
            job_id,
            attempt_number,
            start_time: Utc::now(),
            end_time: None,
            status: AttemptStatus::Running,
        }
    }

    pub fn finish(&mut self, status: AttemptStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}

/// The full lineage of an attempt, reconstructable from any of its
/// constituent IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceChain {
    pub mission: Mission,
    pub plan: Plan,
    pub job: Job,
    pub attempt: Option<Attempt>,
}
