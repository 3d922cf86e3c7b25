//! Shared data model, configuration and wire types for the model orchestration core
//!
//! This crate contains the entities described by the orchestrator's data
//! model (tasks, projects, executions, rate windows), the configuration
//! structures loaded from `orchestrator.toml`, the typed error taxonomy, and
//! the request/response types used at the gateway and secure-action
//! boundaries. It has no async runtime or storage dependency of its own —
//! `core` and `cli` build on top of it.

pub mod api;
pub mod config;
pub mod defaults;
pub mod error;
pub mod model;
pub mod utils;

pub use error::{OrchestratorError, Result};
pub use model::{
    Execution, ExecutorStatus, Priority, Project, ProjectStatus, ScheduleDecision, Task,
    TaskCategory, TaskInput, TaskStatus,
};

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {
        // Smoke test to ensure all modules link.
    }
}
