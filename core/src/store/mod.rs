//! Durable persistence for tasks, executions, rate windows and projects (§4.1)
//!
//! A relational, single-writer store backed by SQLite in WAL mode, following
//! the grounding project's `AgentDatabase`: a lazily-opened connection behind
//! a handful of per-entity modules, each exposing typed CRUD as free
//! functions over `&Connection`. `Store` itself only owns the connection and
//! dispatches; the entity modules own the SQL.

mod executions;
mod projects;
mod rate_limits;
mod tasks;

use rusqlite::Connection;
use shared::error::Result;
use shared::model::{Execution, Project, QueueStats, RateWindow, Task, TaskStatus};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub use tasks::ReadyTasksOrder;

const STORE_FILE: &str = "task-queue.db";

/// SQLite-backed implementation of the Store component. Owns a single
/// connection; callers serialize access externally (`App` wraps it in
/// `tokio::sync::RwLock<Store>`), matching the grounding project's
/// `Arc<RwLock<AgentDatabase>>` pattern.
pub struct Store {
    db_path: PathBuf,
    connection: Option<Connection>,
    busy_timeout_secs: u64,
}

impl Store {
    pub fn new<P: AsRef<Path>>(data_dir: P, busy_timeout_secs: u64) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).map_err(|e| {
                anyhow::anyhow!("failed to create data directory {}: {e}", data_dir.display())
            })?;
        }

        Ok(Self {
            db_path: data_dir.join(STORE_FILE),
            connection: None,
            busy_timeout_secs,
        })
    }

    /// Opens an in-memory store for tests where no filesystem isolation is
    /// otherwise required (most tests instead use a `tempfile::TempDir`, see
    /// module tests below, to exercise the real open-path).
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Creates the schema if absent. Idempotent: safe to call on every
    /// startup. Schema evolution is append-only (§4.1); there is no
    /// migration framework because the schema has never needed one yet.
    pub fn initialize(&mut self) -> Result<()> {
        info!(path = %self.db_path.display(), "initializing store");
        let conn = self.get_connection()?;
        tasks::create_table(conn)?;
        projects::create_table(conn)?;
        executions::create_table(conn)?;
        rate_limits::create_table(conn)?;
        info!("store initialization complete");
        Ok(())
    }

    fn get_connection(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            let conn = Connection::open(&self.db_path).map_err(|e| {
                anyhow::anyhow!("failed to open store at {}: {e}", self.db_path.display())
            })?;

            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                .map_err(|e| anyhow::anyhow!("failed to enable WAL mode: {e}"))?;
            conn.query_row("PRAGMA wal_autocheckpoint=1000", [], |_| Ok(()))
                .map_err(|e| anyhow::anyhow!("failed to set WAL auto-checkpoint: {e}"))?;
            conn.busy_timeout(std::time::Duration::from_secs(self.busy_timeout_secs))
                .map_err(|e| anyhow::anyhow!("failed to set busy timeout: {e}"))?;
            debug!("store connection opened in WAL mode");

            self.connection = Some(conn);
        }
        Ok(self.connection.as_mut().unwrap())
    }

    /// Forces a WAL checkpoint, following the grounding project's periodic
    /// checkpoint-after-bulk-write discipline (§10.6). Called by the
    /// scheduler after each tick's batch of execution-result writes.
    pub fn checkpoint_wal(&mut self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))
            .map_err(|e| anyhow::anyhow!("WAL checkpoint failed: {e}"))?;
        Ok(())
    }

    // ---- tasks ----

    pub fn insert_task(&mut self, task: &Task) -> Result<()> {
        tasks::insert(self.get_connection()?, task)
    }

    pub fn get_task(&mut self, id: &str) -> Result<Option<Task>> {
        tasks::get(self.get_connection()?, id)
    }

    pub fn update_task(&mut self, task: &Task) -> Result<()> {
        tasks::update(self.get_connection()?, task)
    }

    pub fn delete_task(&mut self, id: &str) -> Result<()> {
        tasks::delete(self.get_connection()?, id)
    }

    pub fn get_all_tasks(&mut self) -> Result<Vec<Task>> {
        tasks::get_all(self.get_connection()?)
    }

    pub fn get_tasks_by_status(&mut self, status: TaskStatus) -> Result<Vec<Task>> {
        tasks::get_by_status(self.get_connection()?, status)
    }

    pub fn get_tasks_by_project(&mut self, project_id: &str) -> Result<Vec<Task>> {
        tasks::get_by_project(self.get_connection()?, project_id)
    }

    /// §3/§4.1 "ready tasks": `pending`/`scheduled` tasks whose dependencies
    /// are all completed, ordered by priority bucket then `createdAt`.
    pub fn get_ready_tasks(&mut self, order: &ReadyTasksOrder) -> Result<Vec<Task>> {
        tasks::get_ready(self.get_connection()?, order)
    }

    pub fn get_blocked_on(&mut self, completed_task_id: &str) -> Result<Vec<Task>> {
        tasks::get_blocked_on(self.get_connection()?, completed_task_id)
    }

    pub fn count_by_status(&mut self) -> Result<QueueStats> {
        tasks::count_by_status(self.get_connection()?)
    }

    // ---- projects ----

    pub fn insert_project(&mut self, project: &Project) -> Result<()> {
        projects::insert(self.get_connection()?, project)
    }

    pub fn get_project(&mut self, id: &str) -> Result<Option<Project>> {
        projects::get(self.get_connection()?, id)
    }

    pub fn update_project(&mut self, project: &Project) -> Result<()> {
        projects::update(self.get_connection()?, project)
    }

    // ---- executions ----

    pub fn insert_execution(&mut self, execution: &Execution) -> Result<()> {
        executions::insert(self.get_connection()?, execution)
    }

    pub fn complete_execution(&mut self, execution: &Execution) -> Result<()> {
        executions::complete(self.get_connection()?, execution)
    }

    pub fn get_executions_for_task(&mut self, task_id: &str) -> Result<Vec<Execution>> {
        executions::get_for_task(self.get_connection()?, task_id)
    }

    pub fn count_live_executions(&mut self, task_id: &str) -> Result<u32> {
        executions::count_live(self.get_connection()?, task_id)
    }

    /// Today-window execution statistics for `ExecutorStatus` (§4.7, §6).
    pub fn today_execution_stats(&mut self) -> Result<(u64, u64)> {
        executions::today_stats(self.get_connection()?)
    }

    // ---- rate limits ----

    pub fn get_rate_window(&mut self, model: &str) -> Result<Option<RateWindow>> {
        rate_limits::get(self.get_connection()?, model)
    }

    pub fn upsert_rate_window(&mut self, window: &RateWindow) -> Result<()> {
        rate_limits::upsert(self.get_connection()?, window)
    }

    pub fn get_all_rate_windows(&mut self) -> Result<Vec<RateWindow>> {
        rate_limits::get_all(self.get_connection()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::{Priority, TaskCategory, TaskStatus};
    use shared::utils::{current_timestamp_millis, new_id};

    fn new_task(title: &str, priority: Priority) -> Task {
        let now = current_timestamp_millis();
        Task {
            id: new_id("task"),
            project_id: None,
            title: title.to_string(),
            prompt: "prompt".to_string(),
            category: TaskCategory::Quick,
            priority,
            status: TaskStatus::Pending,
            depends_on: vec![],
            blocked_by: None,
            preferred_model: None,
            deadline: None,
            estimated_duration: None,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            result: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn round_trip_task_survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path(), 5).unwrap();
        store.initialize().unwrap();

        let task = new_task("hello", Priority::Medium);
        store.insert_task(&task).unwrap();
        drop(store);

        let mut reopened = Store::new(dir.path(), 5).unwrap();
        reopened.initialize().unwrap();
        let fetched = reopened.get_task(&task.id).unwrap().expect("task persists");
        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.title, task.title);
        assert_eq!(fetched.prompt, task.prompt);
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[test]
    fn ready_tasks_ordered_by_priority_then_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path(), 5).unwrap();
        store.initialize().unwrap();

        let mut low = new_task("low", Priority::Low);
        low.created_at = 1;
        let mut critical = new_task("critical", Priority::Critical);
        critical.created_at = 2;

        store.insert_task(&low).unwrap();
        store.insert_task(&critical).unwrap();

        let ready = store.get_ready_tasks(&ReadyTasksOrder::default()).unwrap();
        assert_eq!(ready[0].id, critical.id);
        assert_eq!(ready[1].id, low.id);
    }

    #[test]
    fn ready_tasks_exclude_unsatisfied_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path(), 5).unwrap();
        store.initialize().unwrap();

        let predecessor = new_task("predecessor", Priority::Medium);
        let mut dependent = new_task("dependent", Priority::Medium);
        dependent.depends_on = vec![predecessor.id.clone()];
        dependent.status = TaskStatus::Blocked;
        dependent.blocked_by = Some(predecessor.id.clone());

        store.insert_task(&predecessor).unwrap();
        store.insert_task(&dependent).unwrap();

        let ready = store.get_ready_tasks(&ReadyTasksOrder::default()).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, predecessor.id);
    }

    #[test]
    fn count_by_status_reflects_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path(), 5).unwrap();
        store.initialize().unwrap();

        store.insert_task(&new_task("a", Priority::Medium)).unwrap();
        store.insert_task(&new_task("b", Priority::Medium)).unwrap();

        let stats = store.count_by_status().unwrap();
        assert_eq!(stats.pending, 2);
    }

    #[test]
    fn rate_window_upsert_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path(), 5).unwrap();
        store.initialize().unwrap();

        let window = RateWindow {
            model: "anthropic/claude".to_string(),
            current_usage: 3,
            max_requests: 10,
            window_start: 1_000,
            window_duration_ms: 60_000,
            updated_at: 1_000,
        };
        store.upsert_rate_window(&window).unwrap();

        let fetched = store.get_rate_window("anthropic/claude").unwrap().unwrap();
        assert_eq!(fetched.current_usage, 3);
        assert_eq!(fetched.max_requests, 10);
    }
}
