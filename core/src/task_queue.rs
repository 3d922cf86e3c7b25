//! CRUD, status transitions, dependency unblocking and retries (§4.4)
//!
//! Like the rate coordinator, `TaskQueue` is stateless: every operation
//! takes `&mut Store`, relying on the caller holding the store's exclusive
//! guard for the duration of the call. This keeps the state-machine logic
//! in one place without introducing a second lock.

use shared::error::Result;
use shared::model::{Project, ProjectStatus, Task, TaskInput, TaskStatus};
use shared::utils::{current_timestamp_millis, new_id, validate_identifier};
use shared::OrchestratorError;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::store::{ReadyTasksOrder, Store};

/// Generous cap for externally-supplied ids (project id, dependency ids):
/// well above `new_id`'s own output length, just enough to reject garbage.
const MAX_EXTERNAL_ID_LEN: usize = 128;

pub struct TaskQueue;

impl TaskQueue {
    /// Detects a dependency cycle reachable from `depends_on` via DFS
    /// through the store (§9: "detect cycles on addTask with a DFS through
    /// dependsOn, rejecting the submission with InvalidInput").
    ///
    /// `on_path` tracks the current recursion branch and is popped on
    /// backtrack, so two branches sharing a dependency (a diamond) don't
    /// falsely look like a cycle; `visited` remembers nodes already proven
    /// cycle-free so a shared dependency is only walked once.
    fn has_cycle(store: &mut Store, depends_on: &[String]) -> Result<bool> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        for id in depends_on {
            if Self::has_cycle_from(store, id, &mut visited, &mut on_path)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn has_cycle_from(
        store: &mut Store,
        id: &str,
        visited: &mut HashSet<String>,
        on_path: &mut HashSet<String>,
    ) -> Result<bool> {
        if on_path.contains(id) {
            return Ok(true);
        }
        if visited.contains(id) {
            return Ok(false);
        }

        let Some(task) = store.get_task(id)? else {
            visited.insert(id.to_string());
            return Ok(false);
        };

        on_path.insert(id.to_string());
        for dep in &task.depends_on {
            if Self::has_cycle_from(store, dep, visited, on_path)? {
                return Ok(true);
            }
        }
        on_path.remove(id);
        visited.insert(id.to_string());
        Ok(false)
    }

    /// `addTask(TaskInput) → id` (§4.4, §6). Rejects a submission whose
    /// `dependsOn` closes a cycle. A task with unsatisfied dependencies is
    /// inserted directly as `blocked`, per §3's pending-invariant.
    pub fn add(store: &mut Store, input: TaskInput) -> Result<String> {
        if input.title.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput("title cannot be empty".into()).into());
        }
        if input.prompt.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput("prompt cannot be empty".into()).into());
        }
        if let Some(project_id) = &input.project_id {
            validate_identifier(project_id, MAX_EXTERNAL_ID_LEN)?;
        }
        for dep in &input.depends_on {
            validate_identifier(dep, MAX_EXTERNAL_ID_LEN)?;
        }

        for dep in &input.depends_on {
            if store.get_task(dep)?.is_none() {
                return Err(OrchestratorError::InvalidInput(format!(
                    "dependency '{dep}' does not exist"
                ))
                .into());
            }
        }
        if Self::has_cycle(store, &input.depends_on)? {
            return Err(OrchestratorError::InvalidInput(
                "dependsOn introduces a dependency cycle".into(),
            )
            .into());
        }

        let now = current_timestamp_millis();
        let category = input
            .category
            .unwrap_or(shared::model::TaskCategory::Quick);

        let mut unsatisfied = None;
        for dep in &input.depends_on {
            let dep_status = store
                .get_task(dep)?
                .map(|t| t.status)
                .unwrap_or(TaskStatus::Pending);
            if dep_status != TaskStatus::Completed {
                unsatisfied = Some(dep.clone());
                break;
            }
        }

        let id = new_id("task");
        let task = Task {
            id: id.clone(),
            project_id: input.project_id,
            title: input.title,
            prompt: input.prompt,
            category,
            priority: input.priority,
            status: if unsatisfied.is_some() {
                TaskStatus::Blocked
            } else {
                TaskStatus::Pending
            },
            depends_on: input.depends_on,
            blocked_by: unsatisfied,
            preferred_model: input.preferred_model,
            deadline: input.deadline,
            estimated_duration: input.estimated_duration,
            attempts: 0,
            max_attempts: input.max_attempts,
            last_error: None,
            result: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        store.insert_task(&task)?;
        debug!(task_id = %id, status = %task.status, "task submitted");
        Ok(id)
    }

    pub fn get(store: &mut Store, id: &str) -> Result<Option<Task>> {
        store.get_task(id)
    }

    pub fn get_all(store: &mut Store) -> Result<Vec<Task>> {
        store.get_all_tasks()
    }

    pub fn get_by_status(store: &mut Store, status: TaskStatus) -> Result<Vec<Task>> {
        store.get_tasks_by_status(status)
    }

    pub fn get_running(store: &mut Store) -> Result<Vec<Task>> {
        store.get_tasks_by_status(TaskStatus::Running)
    }

    pub fn get_ready(store: &mut Store) -> Result<Vec<Task>> {
        store.get_ready_tasks(&ReadyTasksOrder::default())
    }

    pub fn stats(store: &mut Store) -> Result<shared::model::QueueStats> {
        store.count_by_status()
    }

    /// `addProject(name, tasks, {description, target}) → {projectId, taskIds}`
    /// (§6). Tasks are added one at a time via `add` so cycle detection and
    /// dependency validation apply uniformly.
    pub fn add_project(
        store: &mut Store,
        name: String,
        description: Option<String>,
        target: Option<String>,
        tasks: Vec<TaskInput>,
    ) -> Result<(String, Vec<String>)> {
        if name.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput("project name cannot be empty".into()).into());
        }

        let now = current_timestamp_millis();
        let project_id = new_id("project");
        let project = Project {
            id: project_id.clone(),
            name,
            description,
            target,
            status: ProjectStatus::Active,
            created_at: now,
            updated_at: now,
        };
        store.insert_project(&project)?;

        let mut task_ids = Vec::with_capacity(tasks.len());
        for mut input in tasks {
            input.project_id = Some(project_id.clone());
            task_ids.push(Self::add(store, input)?);
        }

        info!(project_id = %project_id, tasks = task_ids.len(), "project submitted");
        Ok((project_id, task_ids))
    }

    pub fn get_project(store: &mut Store, id: &str) -> Result<Option<Project>> {
        store.get_project(id)
    }

    pub fn get_project_tasks(store: &mut Store, id: &str) -> Result<Vec<Task>> {
        store.get_tasks_by_project(id)
    }

    /// `cancelTask(id)` (§6, §5): idempotent on `completed`/`cancelled`
    /// tasks, otherwise transitions to `cancelled`. In-flight backend calls
    /// are not interrupted; their results are discarded by the executor
    /// because the task is no longer `running` when the call returns.
    pub fn cancel(store: &mut Store, id: &str) -> Result<()> {
        let Some(mut task) = store.get_task(id)? else {
            return Err(OrchestratorError::NotFound(format!("task '{id}' not found")).into());
        };

        if matches!(task.status, TaskStatus::Completed | TaskStatus::Cancelled) {
            return Ok(());
        }

        task.status = TaskStatus::Cancelled;
        task.updated_at = current_timestamp_millis();
        store.update_task(&task)?;
        debug!(task_id = %id, "task cancelled");
        Ok(())
    }

    pub fn remove(store: &mut Store, id: &str) -> Result<()> {
        store.delete_task(id)
    }

    /// `markRunning(task, model)`, recording the task as running and
    /// bumping `attempts` (an Execution row is the caller's responsibility,
    /// created by the executor before this call per §4.7 `executeTask`).
    pub fn mark_running(store: &mut Store, id: &str) -> Result<Task> {
        let Some(mut task) = store.get_task(id)? else {
            return Err(OrchestratorError::NotFound(format!("task '{id}' not found")).into());
        };
        task.status = TaskStatus::Running;
        task.attempts += 1;
        task.updated_at = current_timestamp_millis();
        store.update_task(&task)?;
        Ok(task)
    }

    /// `markCompleted(task, result)`: sets the terminal success fields, then
    /// scans `blocked` tasks whose `blockedBy == task.id` and promotes any
    /// whose remaining dependencies are now satisfied back to `pending`
    /// (§4.4).
    pub fn mark_completed(store: &mut Store, id: &str, result: String) -> Result<Task> {
        let Some(mut task) = store.get_task(id)? else {
            return Err(OrchestratorError::NotFound(format!("task '{id}' not found")).into());
        };
        let now = current_timestamp_millis();
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.last_error = None;
        task.updated_at = now;
        task.completed_at = Some(now);
        store.update_task(&task)?;

        Self::unblock_dependents(store, id)?;
        Ok(task)
    }

    fn unblock_dependents(store: &mut Store, completed_task_id: &str) -> Result<()> {
        let blocked = store.get_blocked_on(completed_task_id)?;
        for mut candidate in blocked {
            let mut satisfied = true;
            for dep in &candidate.depends_on {
                let dep_status = store.get_task(dep)?.map(|t| t.status);
                if dep_status != Some(TaskStatus::Completed) {
                    satisfied = false;
                    break;
                }
            }
            if satisfied {
                candidate.status = TaskStatus::Pending;
                candidate.blocked_by = None;
                candidate.updated_at = current_timestamp_millis();
                store.update_task(&candidate)?;
                debug!(task_id = %candidate.id, "unblocked after dependency completion");
            }
        }
        Ok(())
    }

    /// `markFailed(task, error)`: re-queues as `pending` if attempts remain,
    /// otherwise ends `failed` with `lastError` persisted (§4.4, §4.8).
    pub fn mark_failed(store: &mut Store, id: &str, error: String) -> Result<Task> {
        let Some(mut task) = store.get_task(id)? else {
            return Err(OrchestratorError::NotFound(format!("task '{id}' not found")).into());
        };
        task.last_error = Some(error);
        task.updated_at = current_timestamp_millis();

        if task.attempts >= task.max_attempts {
            task.status = TaskStatus::Failed;
            warn!(task_id = %id, attempts = task.attempts, "task exhausted retry budget");
        } else {
            task.status = TaskStatus::Pending;
            debug!(task_id = %id, attempts = task.attempts, "task re-queued after failure");
        }

        store.update_task(&task)?;
        Ok(task)
    }

    /// `markBlocked(task, blockedBy)` (§4.4), used at submission time and
    /// for orphan recovery.
    pub fn mark_blocked(store: &mut Store, id: &str, blocked_by: String) -> Result<Task> {
        let Some(mut task) = store.get_task(id)? else {
            return Err(OrchestratorError::NotFound(format!("task '{id}' not found")).into());
        };
        task.status = TaskStatus::Blocked;
        task.blocked_by = Some(blocked_by);
        task.updated_at = current_timestamp_millis();
        store.update_task(&task)?;
        Ok(task)
    }

    /// `retryFailed() → count` (§4.4, §6): rescues `failed` tasks whose
    /// attempts budget still permits another try.
    pub fn retry_failed(store: &mut Store) -> Result<usize> {
        let failed = store.get_tasks_by_status(TaskStatus::Failed)?;
        let mut rescued = 0;
        for mut task in failed {
            if task.attempts < task.max_attempts {
                task.status = TaskStatus::Pending;
                task.updated_at = current_timestamp_millis();
                store.update_task(&task)?;
                rescued += 1;
            }
        }
        info!(rescued, "retried failed tasks");
        Ok(rescued)
    }

    /// Invariant-violation recovery at startup (§4.8): tasks observed
    /// `running` with no live Execution are orphans, re-admitted to
    /// `pending` with `attempts` unchanged.
    pub fn recover_orphans(store: &mut Store) -> Result<usize> {
        let running = store.get_tasks_by_status(TaskStatus::Running)?;
        let mut recovered = 0;
        for mut task in running {
            if store.count_live_executions(&task.id)? == 0 {
                task.status = TaskStatus::Pending;
                task.last_error = Some("orphaned".to_string());
                task.updated_at = current_timestamp_millis();
                store.update_task(&task)?;
                recovered += 1;
                warn!(task_id = %task.id, "recovered orphaned running task");
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::{Priority, TaskCategory};

    fn input(title: &str, depends_on: Vec<String>) -> TaskInput {
        TaskInput {
            project_id: None,
            title: title.to_string(),
            prompt: "do it".to_string(),
            category: Some(TaskCategory::Quick),
            priority: Priority::Medium,
            depends_on,
            preferred_model: None,
            deadline: None,
            estimated_duration: None,
            max_attempts: 3,
        }
    }

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::new(dir.path(), 5).unwrap();
        store.initialize().unwrap();
        (dir, store)
    }

    #[test]
    fn add_with_unsatisfied_dependency_starts_blocked() {
        let (_dir, mut store) = test_store();
        let a = TaskQueue::add(&mut store, input("a", vec![])).unwrap();
        let b = TaskQueue::add(&mut store, input("b", vec![a.clone()])).unwrap();

        let b_task = store.get_task(&b).unwrap().unwrap();
        assert_eq!(b_task.status, TaskStatus::Blocked);
        assert_eq!(b_task.blocked_by, Some(a));
    }

    #[test]
    fn add_rejects_dependency_cycle() {
        let (_dir, mut store) = test_store();
        let a = TaskQueue::add(&mut store, input("a", vec![])).unwrap();
        let b = TaskQueue::add(&mut store, input("b", vec![a.clone()])).unwrap();

        // Manually wire a cycle: a now depends on b, closing a -> b -> a.
        let mut a_task = store.get_task(&a).unwrap().unwrap();
        a_task.depends_on = vec![b.clone()];
        store.update_task(&a_task).unwrap();

        let result = TaskQueue::add(&mut store, input("c", vec![a, b]));
        assert!(result.is_err());
    }

    #[test]
    fn add_accepts_diamond_shaped_shared_dependency() {
        let (_dir, mut store) = test_store();
        let d = TaskQueue::add(&mut store, input("d", vec![])).unwrap();
        let a = TaskQueue::add(&mut store, input("a", vec![d.clone()])).unwrap();
        let b = TaskQueue::add(&mut store, input("b", vec![d.clone()])).unwrap();

        let result = TaskQueue::add(&mut store, input("c", vec![a, b]));
        assert!(result.is_ok());
    }

    #[test]
    fn mark_completed_unblocks_dependents_exactly_when_satisfied() {
        let (_dir, mut store) = test_store();
        let a = TaskQueue::add(&mut store, input("a", vec![])).unwrap();
        let b = TaskQueue::add(&mut store, input("b", vec![a.clone()])).unwrap();

        assert_eq!(store.get_task(&b).unwrap().unwrap().status, TaskStatus::Blocked);

        TaskQueue::mark_running(&mut store, &a).unwrap();
        TaskQueue::mark_completed(&mut store, &a, "done".to_string()).unwrap();

        let b_task = store.get_task(&b).unwrap().unwrap();
        assert_eq!(b_task.status, TaskStatus::Pending);
        assert_eq!(b_task.blocked_by, None);
    }

    #[test]
    fn mark_failed_requeues_until_attempts_exhausted() {
        let (_dir, mut store) = test_store();
        let mut req = input("a", vec![]);
        req.max_attempts = 2;
        let id = TaskQueue::add(&mut store, req).unwrap();

        TaskQueue::mark_running(&mut store, &id).unwrap();
        let after_first = TaskQueue::mark_failed(&mut store, &id, "boom".to_string()).unwrap();
        assert_eq!(after_first.status, TaskStatus::Pending);

        TaskQueue::mark_running(&mut store, &id).unwrap();
        let after_second = TaskQueue::mark_failed(&mut store, &id, "boom again".to_string()).unwrap();
        assert_eq!(after_second.status, TaskStatus::Failed);
        assert_eq!(after_second.last_error.as_deref(), Some("boom again"));
    }

    #[test]
    fn cancel_is_idempotent_on_terminal_tasks() {
        let (_dir, mut store) = test_store();
        let id = TaskQueue::add(&mut store, input("a", vec![])).unwrap();
        TaskQueue::mark_running(&mut store, &id).unwrap();
        TaskQueue::mark_completed(&mut store, &id, "ok".to_string()).unwrap();

        TaskQueue::cancel(&mut store, &id).unwrap();
        let task = store.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn retry_failed_rescues_tasks_with_remaining_attempts() {
        let (_dir, mut store) = test_store();
        let mut req = input("a", vec![]);
        req.max_attempts = 3;
        let id = TaskQueue::add(&mut store, req).unwrap();
        TaskQueue::mark_running(&mut store, &id).unwrap();
        TaskQueue::mark_failed(&mut store, &id, "err".to_string()).unwrap();

        // Force into `failed` to exercise retryFailed directly.
        let mut task = store.get_task(&id).unwrap().unwrap();
        task.status = TaskStatus::Failed;
        store.update_task(&task).unwrap();

        let rescued = TaskQueue::retry_failed(&mut store).unwrap();
        assert_eq!(rescued, 1);
        assert_eq!(store.get_task(&id).unwrap().unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn recover_orphans_requeues_running_tasks_without_executions() {
        let (_dir, mut store) = test_store();
        let id = TaskQueue::add(&mut store, input("a", vec![])).unwrap();
        TaskQueue::mark_running(&mut store, &id).unwrap();

        let recovered = TaskQueue::recover_orphans(&mut store).unwrap();
        assert_eq!(recovered, 1);
        let task = store.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.last_error.as_deref(), Some("orphaned"));
    }
}
