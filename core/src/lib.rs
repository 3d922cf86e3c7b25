//! Router, rate coordinator, task queue, scheduler, backend invoker and
//! executor daemon for the model orchestration core (§2).
//!
//! This crate is the "core" of spec.md §1: the subsystem that admits work
//! and routes it reliably to remote model endpoints under concurrency, rate
//! and failure constraints. `cli` wires it into a running process; nothing
//! in here parses command-line arguments or owns a terminal.

pub mod app;
pub mod backend;
pub mod config;
pub mod events;
pub mod executor;
pub mod rate_coordinator;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod task_queue;

pub use app::App;
pub use shared::error::{OrchestratorError, Result};
