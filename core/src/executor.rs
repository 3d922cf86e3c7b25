//! Supervised worker loop: lifecycle, PID/status file, signal-driven
//! shutdown (§4.7)
//!
//! Structured the way the grounding project's `TaskScheduler` is: a poll
//! timer and a health timer driven by `tokio::select!`, a deadline-bounded
//! drain loop on `stop()`, and a status file rewritten on every health tick.
//! Unlike the grounding project, OS signal registration itself stays in the
//! `cli` binary (the process entry point); `Executor::stop()` is what a
//! signal handler there calls.

use crate::backend::BackendInvoker;
use crate::events::{Event, EventBus};
use crate::rate_coordinator::RateCoordinator;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::task_queue::TaskQueue;
use shared::config::ExecutorConfig;
use shared::error::Result;
use shared::model::{Execution, ExecutorStatus, Task, TaskStatus};
use shared::utils::{current_timestamp_millis, new_id};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const PID_FILE: &str = "executor.pid";
const STATUS_FILE: &str = "executor.status.json";

/// A single-process supervisor over the scheduler/rate-coordinator/backend
/// triad (§2, §4.7). Owns the PID and status files and all in-flight
/// Execution bookkeeping (§3 ownership note).
pub struct Executor {
    store: Arc<Mutex<Store>>,
    scheduler: Scheduler,
    rate: RateCoordinator,
    backend: Arc<dyn BackendInvoker>,
    config: ExecutorConfig,
    pid_path: PathBuf,
    status_path: PathBuf,
    events: Arc<EventBus>,
    paused: AtomicBool,
    in_flight: AtomicUsize,
    started_at: Mutex<Option<Instant>>,
}

impl Executor {
    pub fn new(
        store: Arc<Mutex<Store>>,
        scheduler: Scheduler,
        rate: RateCoordinator,
        backend: Arc<dyn BackendInvoker>,
        config: ExecutorConfig,
        state_dir: &Path,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            scheduler,
            rate,
            backend,
            config,
            pid_path: state_dir.join(PID_FILE),
            status_path: state_dir.join(STATUS_FILE),
            events,
            paused: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            started_at: Mutex::new(None),
        }
    }

    /// **At-most-one executor** (§4.7): aborts if the PID file names a live
    /// process. `libc::kill(pid, 0)` is the standard Unix liveness probe —
    /// it sends no signal, only reports whether the target exists and is
    /// reachable.
    pub fn is_running(pid_path: &Path) -> bool {
        let Ok(contents) = std::fs::read_to_string(pid_path) else {
            return false;
        };
        let Ok(_pid) = contents.trim().parse::<i32>() else {
            return false;
        };
        #[cfg(unix)]
        {
            unsafe { libc::kill(_pid, 0) == 0 }
        }
        #[cfg(not(unix))]
        {
            // No portable liveness probe; treat a parseable pid file as live.
            true
        }
    }

    pub fn get_stored_status(status_path: &Path) -> Option<ExecutorStatus> {
        let contents = std::fs::read_to_string(status_path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn write_pid_file(&self) -> Result<()> {
        let pid = std::process::id();
        std::fs::write(&self.pid_path, pid.to_string())
            .map_err(|e| anyhow::anyhow!("failed to write pid file: {e}"))?;
        Ok(())
    }

    fn remove_pid_file(&self) {
        if let Err(e) = std::fs::remove_file(&self.pid_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove pid file");
            }
        }
    }

    async fn write_status_file(&self) -> Result<()> {
        let started_at = *self.started_at.lock().await;
        let uptime_secs = started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0);

        let (completed_today, failed_today) = {
            let mut store = self.store.lock().await;
            store.today_execution_stats()?
        };

        let status = ExecutorStatus {
            running: true,
            paused: self.paused.load(Ordering::SeqCst),
            current_tasks: self.in_flight.load(Ordering::SeqCst),
            completed_today,
            failed_today,
            next_scheduled: None,
            uptime_secs,
            pid: std::process::id(),
        };

        let json = serde_json::to_string_pretty(&status)
            .map_err(|e| anyhow::anyhow!("failed to serialize status: {e}"))?;

        // Write-then-rename for an atomic rewrite (§6: "rewritten atomically
        // on each health tick").
        let tmp_path = self.status_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .map_err(|e| anyhow::anyhow!("failed to write status file: {e}"))?;
        std::fs::rename(&tmp_path, &self.status_path)
            .map_err(|e| anyhow::anyhow!("failed to rename status file into place: {e}"))?;
        Ok(())
    }

    /// Orphan recovery at startup (§4.8).
    async fn recover_orphans(&self) -> Result<()> {
        let mut store = self.store.lock().await;
        let recovered = TaskQueue::recover_orphans(&mut store)?;
        if recovered > 0 {
            info!(recovered, "recovered orphaned tasks at startup");
        }
        Ok(())
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.events.emit(Event::Paused);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.events.emit(Event::Resumed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// **Poll tick** (§4.7): plans the schedule, then for each immediately
    /// schedulable decision, tries to reserve a rate slot and launches the
    /// backend call concurrently, capped at `maxConcurrent`.
    async fn poll_tick(self: &Arc<Self>) -> Result<()> {
        if self.paused.load(Ordering::SeqCst) {
            return Ok(());
        }

        let now = current_timestamp_millis();
        let decisions = {
            let mut store = self.store.lock().await;
            self.scheduler.plan_schedule(&mut store, &self.rate, now)?
        };

        for decision in Scheduler::immediately_schedulable(&decisions, now) {
            if self.in_flight.load(Ordering::SeqCst) >= self.config.max_concurrent {
                break;
            }

            let task = {
                let mut store = self.store.lock().await;
                store.get_task(&decision.task_id)?
            };
            let Some(task) = task else { continue };
            if task.status != TaskStatus::Pending {
                continue;
            }

            // A task re-queued after a failure waits out an exponential
            // backoff before its next attempt is eligible (§4.8).
            if task.attempts > 0 {
                let delay = shared::utils::backoff_delay_ms(
                    task.attempts,
                    self.config.retry_backoff_base_ms,
                    self.config.retry_backoff_max_ms,
                );
                if now < task.updated_at.saturating_add(delay) {
                    continue;
                }
            }

            let reserved = {
                let mut store = self.store.lock().await;
                self.rate.try_reserve(&mut store, &decision.model, now)?
            };
            if !reserved {
                let mut store = self.store.lock().await;
                self.scheduler.reschedule(&mut store, &self.rate, &task, now)?;
                continue;
            }

            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let this = Arc::clone(self);
            let model = decision.model.clone();
            tokio::spawn(async move {
                this.execute_task(task, model).await;
                this.in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }

        {
            let mut store = self.store.lock().await;
            store.checkpoint_wal()?;
        }

        Ok(())
    }

    /// **executeTask** (§4.7): inserts an Execution row, marks the task
    /// running, invokes the backend, records the outcome, unblocks
    /// dependents on success.
    async fn execute_task(&self, task: Task, model: String) {
        let started_at = current_timestamp_millis();
        let execution_id = new_id("exec");
        let execution = Execution {
            id: execution_id.clone(),
            task_id: task.id.clone(),
            model: model.clone(),
            started_at,
            completed_at: None,
            success: None,
            error: None,
            tokens_used: None,
            cost: None,
        };

        let task = {
            let mut store = self.store.lock().await;
            if let Err(e) = store.insert_execution(&execution) {
                error!(error = %e, task_id = %task.id, "store write failed recording execution start");
                return;
            }
            match TaskQueue::mark_running(&mut store, &task.id) {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, task_id = %task.id, "store write failed marking task running");
                    return;
                }
            }
        };

        self.events.emit(Event::TaskStart(task.clone()));
        debug!(task_id = %task.id, model, "executing task");

        let outcome = self.backend.invoke(&model, &task.prompt).await;
        let completed_at = current_timestamp_millis();

        // Cancellation discards the result instead of recording it (§5): the
        // task may have been cancelled while the backend call was in flight.
        let current_status = {
            let mut store = self.store.lock().await;
            store.get_task(&task.id).ok().flatten().map(|t| t.status)
        };
        if current_status == Some(TaskStatus::Cancelled) {
            let mut store = self.store.lock().await;
            let _ = store.complete_execution(&Execution {
                completed_at: Some(completed_at),
                success: Some(false),
                error: Some("discarded: task cancelled".to_string()),
                ..execution
            });
            return;
        }

        match outcome {
            Ok(result) => {
                let mut store = self.store.lock().await;
                let _ = store.complete_execution(&Execution {
                    completed_at: Some(completed_at),
                    success: Some(true),
                    error: None,
                    ..execution
                });
                match TaskQueue::mark_completed(&mut store, &task.id, result.clone()) {
                    Ok(completed_task) => {
                        drop(store);
                        self.events.emit(Event::TaskComplete(completed_task, result));
                    }
                    Err(e) => error!(error = %e, task_id = %task.id, "store write failed marking task completed"),
                }
            }
            Err(err) => {
                let message = err.to_string();
                let is_rate_limited = err
                    .downcast_ref::<shared::OrchestratorError>()
                    .map(|k| matches!(k, shared::OrchestratorError::RateLimited(_)))
                    .unwrap_or(false);

                let mut store = self.store.lock().await;
                let _ = store.complete_execution(&Execution {
                    completed_at: Some(completed_at),
                    success: Some(false),
                    error: Some(message.clone()),
                    ..execution
                });
                if is_rate_limited {
                    if let Err(e) = self.rate.mark_exhausted(&mut store, &model, completed_at) {
                        warn!(error = %e, model, "failed to mark model exhausted");
                    }
                }
                match TaskQueue::mark_failed(&mut store, &task.id, message.clone()) {
                    Ok(failed_task) => {
                        drop(store);
                        self.events.emit(Event::TaskFailed(failed_task, message));
                    }
                    Err(e) => error!(error = %e, task_id = %task.id, "store write failed marking task failed"),
                }
            }
        }
    }

    /// **health tick** (§4.7): rewrites the status file.
    async fn health_tick(&self) {
        if let Err(e) = self.write_status_file().await {
            error!(error = %e, "failed to write status file");
        }
    }

    /// **start** (§4.7): writes PID/status files, runs the main loop until
    /// `shutdown` fires, then drains in-flight tasks up to
    /// `gracefulShutdownTimeout` before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::mpsc::Receiver<()>) -> Result<()> {
        if Self::is_running(&self.pid_path) {
            return Err(anyhow::anyhow!(
                "another executor instance is already running ({})",
                self.pid_path.display()
            ));
        }

        self.recover_orphans().await?;
        self.write_pid_file()?;
        *self.started_at.lock().await = Some(Instant::now());
        self.write_status_file().await?;
        self.events.emit(Event::Started);
        info!("executor started");

        let mut poll_interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        let mut health_interval =
            tokio::time::interval(Duration::from_millis(self.config.health_check_interval_ms));

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.poll_tick().await {
                        error!(error = %e, "poll tick failed");
                    }
                }
                _ = health_interval.tick() => {
                    self.health_tick().await;
                }
                _ = shutdown.recv() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.stop().await
    }

    /// **stop** (§4.7, §5): waits up to `gracefulShutdownTimeout` for
    /// in-flight tasks to drain, polling every 100ms like the grounding
    /// project's scheduler drain loop, then removes the PID file.
    async fn stop(&self) -> Result<()> {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight tasks to drain");
            let deadline =
                Instant::now() + Duration::from_millis(self.config.graceful_shutdown_timeout_ms);
            let mut check = tokio::time::interval(Duration::from_millis(100));
            loop {
                check.tick().await;
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    info!("all in-flight tasks drained");
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(
                        still_running = self.in_flight.load(Ordering::SeqCst),
                        "graceful shutdown timeout reached"
                    );
                    break;
                }
            }
        }

        self.write_status_file_stopped().await;
        self.remove_pid_file();
        self.events.emit(Event::Stopped);
        info!("executor stopped");
        Ok(())
    }

    async fn write_status_file_stopped(&self) {
        let started_at = *self.started_at.lock().await;
        let uptime_secs = started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0);
        let (completed_today, failed_today) = {
            let mut store = self.store.lock().await;
            store.today_execution_stats().unwrap_or((0, 0))
        };
        let status = ExecutorStatus {
            running: false,
            paused: self.paused.load(Ordering::SeqCst),
            current_tasks: 0,
            completed_today,
            failed_today,
            next_scheduled: None,
            uptime_secs,
            pid: std::process::id(),
        };
        if let Ok(json) = serde_json::to_string_pretty(&status) {
            let _ = std::fs::write(&self.status_path, json);
        }
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::ScriptedBackend;
    use shared::config::PriorityWeights;
    use shared::model::{Priority, TaskCategory, TaskInput};
    use std::collections::HashMap;

    fn routing() -> HashMap<TaskCategory, Vec<String>> {
        let mut routing = HashMap::new();
        routing.insert(TaskCategory::Quick, vec!["m".to_string()]);
        routing
    }

    fn weights() -> PriorityWeights {
        PriorityWeights { critical: 1000, high: 100, medium: 10, low: 1 }
    }

    async fn test_executor(
        outcomes: Vec<std::result::Result<String, String>>,
        max_concurrent: usize,
    ) -> (tempfile::TempDir, Arc<Executor>) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path(), 5).unwrap();
        store.initialize().unwrap();

        let rate = RateCoordinator::new(vec![shared::config::ModelConfig {
            key: "m".to_string(),
            max_requests: 100,
            window_duration_ms: 60_000,
            endpoint: None,
        }]);
        rate.seed_if_absent(&mut store, 0).unwrap();

        let store = Arc::new(Mutex::new(store));
        let scheduler = Scheduler::new(routing(), weights(), max_concurrent);
        let backend = Arc::new(ScriptedBackend::new(outcomes));
        let config = ExecutorConfig {
            poll_interval_ms: 20,
            health_check_interval_ms: 50,
            graceful_shutdown_timeout_ms: 2_000,
            max_concurrent,
            retry_backoff_base_ms: 0,
            retry_backoff_max_ms: 0,
        };
        let events = Arc::new(EventBus::default());

        let executor = Arc::new(Executor::new(
            store, scheduler, rate, backend, config, dir.path(), events,
        ));
        (dir, executor)
    }

    fn task_input(title: &str) -> TaskInput {
        TaskInput {
            project_id: None,
            title: title.to_string(),
            prompt: "ping".to_string(),
            category: Some(TaskCategory::Quick),
            priority: Priority::Medium,
            depends_on: vec![],
            preferred_model: None,
            deadline: None,
            estimated_duration: None,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn simple_success_completes_task_with_one_execution() {
        let (_dir, executor) = test_executor(vec![Ok("pong".to_string())], 4).await;
        let task_id = {
            let mut store = executor.store.lock().await;
            TaskQueue::add(&mut store, task_input("hello")).unwrap()
        };

        executor.poll_tick().await.unwrap();
        // Give the spawned execution a moment to finish.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let mut store = executor.store.lock().await;
            if store.get_task(&task_id).unwrap().unwrap().status == TaskStatus::Completed {
                break;
            }
        }

        let mut store = executor.store.lock().await;
        let task = store.get_task(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("pong"));
        let executions = store.get_executions_for_task(&task_id).unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].success, Some(true));
    }

    #[tokio::test]
    async fn retry_then_success_creates_bounded_executions() {
        let (_dir, executor) = test_executor(
            vec![
                Err("network error".to_string()),
                Err("network error".to_string()),
                Ok("pong".to_string()),
            ],
            1,
        )
        .await;
        let task_id = {
            let mut store = executor.store.lock().await;
            let mut input = task_input("retry");
            input.max_attempts = 3;
            TaskQueue::add(&mut store, input).unwrap()
        };

        for _ in 0..3 {
            loop {
                let pending = {
                    let mut store = executor.store.lock().await;
                    store.get_task(&task_id).unwrap().unwrap().status == TaskStatus::Pending
                };
                if pending {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            executor.poll_tick().await.unwrap();
            for _ in 0..50 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let mut store = executor.store.lock().await;
                let status = store.get_task(&task_id).unwrap().unwrap().status;
                if status == TaskStatus::Pending
                    || status == TaskStatus::Completed
                    || status == TaskStatus::Failed
                {
                    break;
                }
            }
        }

        let mut store = executor.store.lock().await;
        let task = store.get_task(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 3);
        let executions = store.get_executions_for_task(&task_id).unwrap();
        assert_eq!(executions.len(), 3);
    }

    #[test]
    fn is_running_false_when_pid_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!Executor::is_running(&dir.path().join("executor.pid")));
    }
}
