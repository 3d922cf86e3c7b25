//! Typed error taxonomy (§7)
//!
//! `OrchestratorError` names the *kind* of failure so callers at subsystem
//! boundaries can match on it (is this retryable? does it count as an
//! attempt? should it crash the executor?). Internal plumbing still returns
//! `anyhow::Result` and wraps one of these variants with `.context(...)`
//! when it crosses a boundary worth distinguishing.

/// Result alias used throughout the shared crate and re-exported downstream.
pub type Result<T> = anyhow::Result<T>;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// API boundary rejected the request outright: missing field, unknown
    /// enum value, or a dependency cycle detected on submission.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lookup by id found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The rate coordinator or backend invoker observed a rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A backend invocation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// A backend invocation failed for a reason other than rate limiting or
    /// timeout (non-zero exit, non-2xx status, unparseable output).
    #[error("invocation failed: {0}")]
    InvocationFailed(String),

    /// The backend has no credentials/endpoint configured.
    #[error("backend not configured: {0}")]
    NotConfigured(String),

    /// A task exhausted its retry budget.
    #[error("exhausted retries: {0}")]
    Exhausted(String),

    /// The scheduler detected a dependency cycle.
    #[error("dependency cycle: {0}")]
    Cycle(String),

    /// The store could not complete a write; per §4.8 this is meant to
    /// crash the executor after logging, so callers should treat it as
    /// fatal rather than retry indefinitely.
    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl OrchestratorError {
    /// Whether this error kind represents a condition the task queue should
    /// count as a used attempt (as opposed to a rejection that never
    /// consumed one).
    pub fn counts_as_attempt(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Timeout(_)
                | OrchestratorError::InvocationFailed(_)
                | OrchestratorError::RateLimited(_)
        )
    }
}
