//! Wire types for the gateway's HTTP boundary and the out-of-scope
//! secure-action side channel (§6)
//!
//! These are the request/response bodies the CLI, a chat-plugin adapter, or
//! the council subsystem would send across the boundary. The secure-action
//! side channel itself is explicitly out of scope (§1); only its framing
//! contract is modeled here so a caller can be written against it.

use crate::model::{Priority, Task, TaskCategory};
use serde::{Deserialize, Serialize};

/// Generic API response envelope, matching the grounding project's
/// `ApiResponse<T>` wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(message),
        }
    }
}

/// `POST /api/v1/tasks` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTaskRequest {
    pub title: String,
    pub prompt: String,
    pub category: Option<TaskCategory>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub preferred_model: Option<String>,
    pub project_id: Option<String>,
}

/// `POST /api/v1/tasks` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTaskResponse {
    pub id: String,
}

/// `POST /api/v1/projects` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub target: Option<String>,
    pub tasks: Vec<AddTaskRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddProjectResponse {
    pub project_id: String,
    pub task_ids: Vec<String>,
}

/// `GET /api/v1/tasks/:id` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskResponse {
    pub task: Task,
}

/// Per-model rate limit status surfaced by `GET /api/v1/queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub available: bool,
    pub used: u32,
    pub limit: u32,
    pub resets_in_seconds: u64,
}

/// `GET /api/v1/queue` response body (§6 `getQueueStatus`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusResponse {
    pub stats: crate::model::QueueStats,
    pub scheduled: usize,
    pub running: usize,
    pub pending: usize,
    pub next_task: Option<String>,
    pub available_models: Vec<String>,
    pub rate_limits: std::collections::HashMap<String, RateLimitStatus>,
}

/// HTTP headers used by the gateway.
pub mod headers {
    pub const API_KEY: &str = "X-API-Key";
    pub const CONTENT_TYPE: &str = "Content-Type";
}

/// Gateway endpoint paths.
pub mod endpoints {
    pub const TASKS: &str = "/api/v1/tasks";
    pub const PROJECTS: &str = "/api/v1/projects";
    pub const QUEUE: &str = "/api/v1/queue";
    pub const EXECUTOR: &str = "/api/v1/executor";
    pub const RETRY_FAILED: &str = "/api/v1/tasks/retry-failed";
}

/// Secure-action side-channel framing (§6, §1): a line-delimited JSON
/// request/response pair over a loopback TCP socket. The side channel's own
/// authorization and action semantics are a separate process and out of
/// scope here — this type only fixes the wire shape so the boundary is
/// unambiguous to an external implementer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureActionRequest {
    pub action: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureActionResponse {
    pub ok: bool,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_response_helpers_round_trip() {
        let ok: ApiResponse<u32> = ApiResponse::success(7);
        assert_eq!(ok.status, "success");
        assert_eq!(ok.data, Some(7));

        let err: ApiResponse<u32> = ApiResponse::error("bad".into());
        assert_eq!(err.status, "error");
        assert_eq!(err.error.as_deref(), Some("bad"));
    }

    #[test]
    fn secure_action_request_serializes_as_single_line() {
        let req = SecureActionRequest {
            action: "ping".into(),
            payload: serde_json::json!({"n": 1}),
        };
        let line = serde_json::to_string(&req).unwrap();
        assert!(!line.contains('\n'));
    }
}
