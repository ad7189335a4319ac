//! RBAC (C9): a fixed role→permission mapping and the single `authorize`
//! entrypoint every other component calls before performing a write or
//! privileged read. Roles are fixed at design time — there is no role
//! hierarchy beyond the table in §4.9 and no per-tenant customization.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    /// Permission patterns this role is granted, verbatim from §4.9.
    /// `"read:*"` is a wildcard matching any `read:<resource>` permission.
    fn patterns(self) -> &'static [&'static str] {
        match self {
            Role::Viewer => &["read:*"],
            Role::Operator => &[
                "read:*",
                "write:enforcement",
                "write:reflex",
                "execute:job",
                "execute:reflex",
            ],
            Role::Admin => &[
                "read:*",
                "write:enforcement",
                "write:reflex",
                "execute:job",
                "execute:reflex",
                "write:governor",
                "manage:rbac",
                "manage:system",
            ],
        }
    }

    fn grants(self, required: &str) -> bool {
        self.patterns().iter().any(|pattern| pattern_matches(pattern, required))
    }
}

fn pattern_matches(pattern: &str, required: &str) -> bool {
    if pattern == required {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("*") {
        return required.starts_with(prefix);
    }
    false
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub role: Role,
}

impl User {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self { user_id: user_id.into(), role }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub missing: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RbacStats {
    pub authorization_count: u64,
    pub denied_count: u64,
    pub denial_rate: f64,
}

/// Counters plus the single stateless decision function. Cheaply
/// cloneable; all clones share the same counters.
#[derive(Default)]
pub struct RbacService {
    authorization_count: AtomicU64,
    denied_count: AtomicU64,
}

impl RbacService {
    pub fn new() -> Self {
        Self::default()
    }

    /// `require_all=true` requires every permission in `required`;
    /// otherwise any single granted permission is sufficient.
    pub fn authorize(&self, user: &User, required: &[String], require_all: bool) -> Decision {
        self.authorization_count.fetch_add(1, Ordering::Relaxed);

        let missing: Vec<String> = required
            .iter()
            .filter(|perm| !user.role.grants(perm))
            .cloned()
            .collect();

        let allowed = if require_all {
            missing.is_empty()
        } else {
            required.is_empty() || missing.len() < required.len()
        };

        let missing = if allowed && !require_all { Vec::new() } else { missing };

        let reason = if allowed {
            "granted".to_string()
        } else {
            format!("role {:?} missing permissions: {}", user.role, missing.join(", "))
        };

        if !allowed {
            self.denied_count.fetch_add(1, Ordering::Relaxed);
            info!(user_id = %user.user_id, role = ?user.role, ?required, "authorization denied");
        }

        Decision { allowed, missing, reason }
    }

    pub fn stats(&self) -> RbacStats {
        let authorization_count = self.authorization_count.load(Ordering::Relaxed);
        let denied_count = self.denied_count.load(Ordering::Relaxed);
        let denial_rate = if authorization_count == 0 {
            0.0
        } else {
            denied_count as f64 / authorization_count as f64
        };
        RbacStats { authorization_count, denied_count, denial_rate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_can_read_but_not_write() {
        let rbac = RbacService::new();
        let viewer = User::new("u1", Role::Viewer);
        let read = rbac.authorize(&viewer, &["read:audit".to_string()], true);
        assert!(read.allowed);
        let write = rbac.authorize(&viewer, &["write:reflex".to_string()], true);
        assert!(!write.allowed);
        assert_eq!(write.missing, vec!["write:reflex".to_string()]);
    }

    #[test]
    fn operator_inherits_viewer_plus_write_and_execute() {
        let rbac = RbacService::new();
        let operator = User::new("u2", Role::Operator);
        let decision = rbac.authorize(
            &operator,
            &["read:audit".to_string(), "write:reflex".to_string(), "execute:job".to_string()],
            true,
        );
        assert!(decision.allowed);
        assert!(!rbac.authorize(&operator, &["write:governor".to_string()], true).allowed);
    }

    #[test]
    fn admin_has_manage_permissions_operator_lacks() {
        let rbac = RbacService::new();
        let admin = User::new("u3", Role::Admin);
        let operator = User::new("u4", Role::Operator);
        assert!(rbac.authorize(&admin, &["manage:rbac".to_string()], true).allowed);
        assert!(!rbac.authorize(&operator, &["manage:rbac".to_string()], true).allowed);
    }

    #[test]
    fn require_all_false_passes_with_any_granted_permission() {
        let rbac = RbacService::new();
        let viewer = User::new("u5", Role::Viewer);
        let decision = rbac.authorize(
            &viewer,
            &["write:governor".to_string(), "read:audit".to_string()],
            false,
        );
        assert!(decision.allowed);
    }

    #[test]
    fn stats_track_denials_and_denial_rate() {
        let rbac = RbacService::new();
        let viewer = User::new("u6", Role::Viewer);
        rbac.authorize(&viewer, &["read:audit".to_string()], true);
        rbac.authorize(&viewer, &["write:reflex".to_string()], true);
        let stats = rbac.stats();
        assert_eq!(stats.authorization_count, 2);
        assert_eq!(stats.denied_count, 1);
        assert!((stats.denial_rate - 0.5).abs() < f64::EPSILON);
    }
}
