//! Ambient runtime configuration (§6 environment knobs), loaded once at
//! startup and passed by reference into every component constructor.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSyncMode {
    Sync,
    Batch,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_global_parallel: u32,
    pub default_timeout_ms: u64,
    pub default_grace_period_ms: u64,
    pub shadow_min_duration_ms: u64,
    pub activation_gate_divergence_max_pct: f64,
    pub sse_buffer_size: usize,
    pub sse_max_consecutive_drops: u32,
    pub audit_sync: AuditSyncMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_global_parallel: 100,
            default_timeout_ms: 30_000,
            default_grace_period_ms: 5_000,
            shadow_min_duration_ms: 24 * 60 * 60 * 1000,
            activation_gate_divergence_max_pct: 5.0,
            sse_buffer_size: 100,
            sse_max_consecutive_drops: 5,
            audit_sync: AuditSyncMode::Sync,
        }
    }
}

impl RuntimeConfig {
    /// Reads documented environment variables, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_global_parallel: env_u32("MAX_GLOBAL_PARALLEL", defaults.max_global_parallel),
            default_timeout_ms: env_u64("DEFAULT_TIMEOUT_MS", defaults.default_timeout_ms),
            default_grace_period_ms: env_u64(
                "DEFAULT_GRACE_PERIOD_MS",
                defaults.default_grace_period_ms,
            ),
            shadow_min_duration_ms: env_u64(
                "SHADOW_MIN_DURATION_MS",
                defaults.shadow_min_duration_ms,
            ),
            activation_gate_divergence_max_pct: env_f64(
                "ACTIVATION_GATE_DIVERGENCE_MAX",
                defaults.activation_gate_divergence_max_pct,
            ),
            sse_buffer_size: env_u32("SSE_BUFFER_SIZE", defaults.sse_buffer_size as u32) as usize,
            sse_max_consecutive_drops: defaults.sse_max_consecutive_drops,
            audit_sync: match std::env::var("AUDIT_SYNC").ok().as_deref() {
                Some("batch") => AuditSyncMode::Batch,
                _ => defaults.audit_sync,
            },
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
