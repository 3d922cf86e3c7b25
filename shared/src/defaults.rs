//! Default values for configuration parameters
//!
//! Centralizes the `default_*` functions serde calls when a configuration
//! file omits an optional field, the way the grounding project centralizes
//! its own task and agent defaults.

/// Default maximum attempts for a task before it is marked `failed` (§3).
pub fn default_max_attempts() -> u32 {
    3
}

/// Default poll interval for the executor daemon's main loop (§4.7).
pub fn default_poll_interval_ms() -> u64 {
    5_000
}

/// Default interval between health-tick status file rewrites (§4.7).
pub fn default_health_check_interval_ms() -> u64 {
    30_000
}

/// Default time to wait for in-flight tasks to drain during shutdown (§4.7).
pub fn default_graceful_shutdown_timeout_ms() -> u64 {
    30_000
}

/// Default cap on concurrently in-flight backend invocations (§4.7).
pub fn default_max_concurrent() -> usize {
    4
}

/// Default base delay for a retried task's exponential backoff (§4.8).
pub fn default_retry_backoff_base_ms() -> u64 {
    1_000
}

/// Default cap on a retried task's exponential backoff (§4.8).
pub fn default_retry_backoff_max_ms() -> u64 {
    60_000
}

/// Default per-call backend timeout (§4.6).
pub fn default_backend_timeout_secs() -> u64 {
    120
}

/// Default maximum captured backend output size, 10 MiB (§4.6).
pub fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

/// Default rate-limit window duration, one minute.
pub fn default_window_duration_ms() -> u64 {
    60_000
}

/// Default scheduler priority weights (§4.5).
pub fn default_priority_weights() -> crate::config::PriorityWeights {
    crate::config::PriorityWeights {
        critical: 1000,
        high: 100,
        medium: 10,
        low: 1,
    }
}

/// Default SQLite busy-timeout, matching the grounding project's agent
/// database default.
pub fn default_busy_timeout_secs() -> u64 {
    5
}

/// Default loopback port for the out-of-scope secure-action side channel
/// referenced at the boundary (§6).
pub fn default_secure_action_port() -> u16 {
    9999
}
