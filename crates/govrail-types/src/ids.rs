//! ID allocation for mission/plan/job/attempt entities.
//!
//! IDs are short-prefixed (`m_`, `p_`, `j_`, `a_`) and combine a process-wide
//! monotonic counter with a random suffix, guaranteeing uniqueness within a
//! single runtime instance without requiring coordination with any other
//! process.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

static COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_sequence() -> u64 {
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn allocate(prefix: &str) -> String {
    format!("{prefix}{:012x}_{}", next_sequence(), random_suffix())
}

macro_rules! typed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(allocate($prefix))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn parse(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn has_valid_prefix(&self) -> bool {
                self.0.starts_with($prefix)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

typed_id!(MissionId, "m_");
typed_id!(PlanId, "p_");
typed_id!(JobId, "j_");
typed_id!(AttemptId, "a_");
