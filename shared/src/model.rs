//! Data model entities (§3)
//!
//! All timestamps are integer milliseconds since the Unix epoch, stored as
//! `u64` the way the grounding project stores its own Unix timestamps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task routing category. The router maps a prompt to one of these, and the
/// static category table (`shared::config::RoutingConfig`) maps each to an
/// ordered list of candidate model keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Planning,
    Reasoning,
    Coding,
    Review,
    Quick,
    Vision,
    ImageGen,
}

impl TaskCategory {
    /// Declaration order, used by the router to break ties deterministically.
    pub const ALL: [TaskCategory; 7] = [
        TaskCategory::Planning,
        TaskCategory::Reasoning,
        TaskCategory::Coding,
        TaskCategory::Review,
        TaskCategory::Quick,
        TaskCategory::Vision,
        TaskCategory::ImageGen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Planning => "planning",
            TaskCategory::Reasoning => "reasoning",
            TaskCategory::Coding => "coding",
            TaskCategory::Review => "review",
            TaskCategory::Quick => "quick",
            TaskCategory::Vision => "vision",
            TaskCategory::ImageGen => "image_gen",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scheduling priority. `weight()` gives the default sort weight used by the
/// scheduler; the actual weights are configurable per §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn default_weight(&self) -> u32 {
        match self {
            Priority::Critical => 1000,
            Priority::High => 100,
            Priority::Medium => 10,
            Priority::Low => 1,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// Task lifecycle status. See §4.4 for the legal transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Blocked,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Caller-supplied fields when submitting a task (§6 `addTask`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    pub project_id: Option<String>,
    pub title: String,
    pub prompt: String,
    /// When `None`, the router classifies the prompt to derive a category.
    pub category: Option<TaskCategory>,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub preferred_model: Option<String>,
    pub deadline: Option<u64>,
    #[serde(default)]
    pub estimated_duration: Option<u64>,
    #[serde(default = "crate::defaults::default_max_attempts")]
    pub max_attempts: u32,
}

fn default_priority() -> Priority {
    Priority::Medium
}

/// A unit of work (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub prompt: String,
    pub category: TaskCategory,
    pub priority: Priority,
    pub status: TaskStatus,
    pub depends_on: Vec<String>,
    pub blocked_by: Option<String>,
    pub preferred_model: Option<String>,
    pub deadline: Option<u64>,
    pub estimated_duration: Option<u64>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub completed_at: Option<u64>,
}

impl Task {
    /// §3 invariant: a task may be `pending` only when every dependency is
    /// `completed`; this helper just checks the id list against a lookup
    /// the caller has already fetched (typically from the store).
    pub fn dependencies_satisfied(&self, statuses: &HashMap<String, TaskStatus>) -> bool {
        self.depends_on
            .iter()
            .all(|id| statuses.get(id) == Some(&TaskStatus::Completed))
    }
}

/// Grouping of related tasks (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub target: Option<String>,
    pub status: ProjectStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// One attempt at running a task (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub task_id: String,
    pub model: String,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub success: Option<bool>,
    pub error: Option<String>,
    pub tokens_used: Option<u64>,
    pub cost: Option<f64>,
}

/// Per-model fixed rate window (§3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateWindow {
    pub model: String,
    pub current_usage: u32,
    pub max_requests: u32,
    pub window_start: u64,
    pub window_duration_ms: u64,
    pub updated_at: u64,
}

impl RateWindow {
    /// Whether, as of `now`, the window should be treated as logically
    /// reset (§4.2 `isAvailable`). Purely advisory — never used to decide
    /// whether a reservation succeeds; only `tryReserve`'s atomic critical
    /// section does that.
    pub fn is_elapsed(&self, now: u64) -> bool {
        now.saturating_sub(self.window_start) > self.window_duration_ms
    }

    pub fn is_available(&self, now: u64) -> bool {
        if self.is_elapsed(now) {
            return true;
        }
        self.current_usage < self.max_requests
    }

    pub fn next_available_at(&self, now: u64) -> u64 {
        if self.is_available(now) {
            now
        } else {
            self.window_start + self.window_duration_ms
        }
    }
}

/// In-memory per-tick artifact produced by the scheduler (§3). Never
/// persisted; the scheduler owns the current tick's list and discards it on
/// the next tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDecision {
    pub task_id: String,
    pub model: String,
    pub scheduled_for: u64,
    pub estimated_completion: u64,
}

impl ScheduleDecision {
    pub fn is_immediately_schedulable(&self, now: u64) -> bool {
        self.scheduled_for <= now
    }
}

/// Snapshot of the executor daemon's health, rewritten on each health tick
/// and persisted to `executor.status.json` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorStatus {
    pub running: bool,
    pub paused: bool,
    pub current_tasks: usize,
    pub completed_today: u64,
    pub failed_today: u64,
    pub next_scheduled: Option<u64>,
    pub uptime_secs: u64,
    pub pid: u32,
}

/// Aggregate counts by status, used by `getQueueStatus`/`stats` (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub scheduled: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub blocked: u64,
    pub cancelled: u64,
}
