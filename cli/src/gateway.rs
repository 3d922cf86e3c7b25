//! HTTP boundary exposing the submit/query API of §6 (`addTask`,
//! `addProject`, `getTask`, `getAllTasks`, `getQueueStatus`, `cancelTask`,
//! `retryFailed`, `pauseExecutor`, `resumeExecutor`) over `axum`, following
//! the grounding project's `create_router` + `AppState` + `ApiError` shape.

use axum::{
    extract::{Path as AxumPath, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use orchestrator_core::app::App;
use orchestrator_core::executor::Executor;
use orchestrator_core::rate_coordinator::RateCoordinator;
use orchestrator_core::store::Store;
use orchestrator_core::task_queue::TaskQueue;
use shared::api::{
    endpoints, AddProjectRequest, AddProjectResponse, AddTaskRequest, AddTaskResponse,
    ApiResponse, GetTaskResponse, QueueStatusResponse, RateLimitStatus,
};
use shared::model::{Priority, Task, TaskInput};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Only the pieces the gateway handlers actually touch, cloned out of `App`
/// as `Arc`s so the router can own its state independently of the caller's
/// `App` value (which also needs to hand an `Executor` to its own task).
#[derive(Clone)]
pub struct AppState {
    store: Arc<Mutex<Store>>,
    rate: Arc<RateCoordinator>,
    executor: Arc<Executor>,
}

pub fn build_router(app: &App, executor: Arc<Executor>) -> Router {
    let state = AppState {
        store: Arc::clone(&app.store),
        rate: Arc::clone(&app.rate),
        executor,
    };

    Router::new()
        .route("/health", get(health_check))
        .route(endpoints::TASKS, post(handle_add_task).get(handle_get_all_tasks))
        .route(
            &format!("{}/{{id}}", endpoints::TASKS),
            get(handle_get_task).delete(handle_cancel_task),
        )
        .route(endpoints::PROJECTS, post(handle_add_project))
        .route(endpoints::QUEUE, get(handle_queue_status))
        .route(endpoints::RETRY_FAILED, post(handle_retry_failed))
        .route(endpoints::EXECUTOR, get(handle_executor_status))
        .route(&format!("{}/pause", endpoints::EXECUTOR), post(handle_pause_executor))
        .route(&format!("{}/resume", endpoints::EXECUTOR), post(handle_resume_executor))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

fn to_input(req: AddTaskRequest) -> TaskInput {
    TaskInput {
        project_id: req.project_id,
        title: req.title,
        prompt: req.prompt,
        category: req.category,
        priority: req.priority.unwrap_or(Priority::Medium),
        depends_on: req.depends_on,
        preferred_model: req.preferred_model,
        deadline: None,
        estimated_duration: None,
        max_attempts: shared::defaults::default_max_attempts(),
    }
}

async fn handle_add_task(
    State(state): State<AppState>,
    Json(req): Json<AddTaskRequest>,
) -> Result<Json<ApiResponse<AddTaskResponse>>, GatewayError> {
    let mut store = state.store.lock().await;
    let id = TaskQueue::add(&mut store, to_input(req))?;
    debug!(task_id = %id, "task submitted via gateway");
    Ok(Json(ApiResponse::success(AddTaskResponse { id })))
}

async fn handle_get_task(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<ApiResponse<GetTaskResponse>>, GatewayError> {
    let mut store = state.store.lock().await;
    let task = TaskQueue::get(&mut store, &id)?
        .ok_or_else(|| GatewayError::NotFound(format!("task '{id}' not found")))?;
    Ok(Json(ApiResponse::success(GetTaskResponse { task })))
}

async fn handle_get_all_tasks(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Task>>>, GatewayError> {
    let mut store = state.store.lock().await;
    let tasks = TaskQueue::get_all(&mut store)?;
    Ok(Json(ApiResponse::success(tasks)))
}

async fn handle_cancel_task(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<ApiResponse<()>>, GatewayError> {
    let mut store = state.store.lock().await;
    TaskQueue::cancel(&mut store, &id)?;
    debug!(task_id = %id, "task cancelled via gateway");
    Ok(Json(ApiResponse::success(())))
}

async fn handle_add_project(
    State(state): State<AppState>,
    Json(req): Json<AddProjectRequest>,
) -> Result<Json<ApiResponse<AddProjectResponse>>, GatewayError> {
    let mut store = state.store.lock().await;
    let tasks = req.tasks.into_iter().map(to_input).collect();
    let (project_id, task_ids) =
        TaskQueue::add_project(&mut store, req.name, req.description, req.target, tasks)?;
    Ok(Json(ApiResponse::success(AddProjectResponse { project_id, task_ids })))
}

async fn handle_queue_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<QueueStatusResponse>>, GatewayError> {
    let now = shared::utils::current_timestamp_millis();
    let mut store = state.store.lock().await;
    let stats = TaskQueue::stats(&mut store)?;
    let ready = TaskQueue::get_ready(&mut store)?;
    let rate = state.rate.status(&mut store, now)?;

    let rate_limits: HashMap<String, RateLimitStatus> = rate
        .into_iter()
        .map(|(k, v)| {
            (
                k,
                RateLimitStatus {
                    available: v.available,
                    used: v.used,
                    limit: v.limit,
                    resets_in_seconds: v.resets_in_seconds,
                },
            )
        })
        .collect();

    Ok(Json(ApiResponse::success(QueueStatusResponse {
        scheduled: stats.scheduled as usize,
        running: stats.running as usize,
        pending: stats.pending as usize,
        next_task: ready.first().map(|t| t.id.clone()),
        available_models: rate_limits
            .iter()
            .filter(|(_, v)| v.available)
            .map(|(k, _)| k.clone())
            .collect(),
        stats,
        rate_limits,
    })))
}

async fn handle_retry_failed(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<usize>>, GatewayError> {
    let mut store = state.store.lock().await;
    let count = TaskQueue::retry_failed(&mut store)?;
    Ok(Json(ApiResponse::success(count)))
}

async fn handle_executor_status(State(state): State<AppState>) -> Json<ApiResponse<bool>> {
    Json(ApiResponse::success(state.executor.is_paused()))
}

async fn handle_pause_executor(State(state): State<AppState>) -> Json<ApiResponse<()>> {
    state.executor.pause();
    Json(ApiResponse::success(()))
}

async fn handle_resume_executor(State(state): State<AppState>) -> Json<ApiResponse<()>> {
    state.executor.resume();
    Json(ApiResponse::success(()))
}

/// Gateway-local error wrapper, following the grounding project's `ApiError`:
/// an internal `anyhow::Error` is classified into an HTTP status at the
/// response boundary rather than threading a status code through every
/// handler.
#[derive(Debug, thiserror::Error)]
enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::NotFound(msg) => (axum::http::StatusCode::NOT_FOUND, msg.clone()),
            GatewayError::Internal(e) => {
                if let Some(orch_err) = e.downcast_ref::<shared::OrchestratorError>() {
                    match orch_err {
                        shared::OrchestratorError::InvalidInput(m) => {
                            (axum::http::StatusCode::BAD_REQUEST, m.clone())
                        }
                        shared::OrchestratorError::NotFound(m) => {
                            (axum::http::StatusCode::NOT_FOUND, m.clone())
                        }
                        other => {
                            warn!(error = %other, "gateway request failed");
                            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
                        }
                    }
                } else {
                    warn!(error = %e, "gateway request failed");
                    (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
            }
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}
