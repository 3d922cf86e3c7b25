//! Execution CRUD and today-window statistics (§3, §4.1, §4.7).

use rusqlite::{params, Connection};
use shared::error::Result;
use shared::model::Execution;
use shared::utils::current_timestamp_millis;

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            model TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            success INTEGER,
            error TEXT,
            tokens_used INTEGER,
            cost REAL
        )
        "#,
        [],
    )
    .map_err(|e| anyhow::anyhow!("failed to create executions table: {e}"))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_executions_task_id ON executions(task_id)",
        [],
    )?;

    Ok(())
}

fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<Execution> {
    Ok(Execution {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        model: row.get("model")?,
        started_at: row.get::<_, i64>("started_at")? as u64,
        completed_at: row.get::<_, Option<i64>>("completed_at")?.map(|v| v as u64),
        success: row.get::<_, Option<i64>>("success")?.map(|v| v != 0),
        error: row.get("error")?,
        tokens_used: row.get::<_, Option<i64>>("tokens_used")?.map(|v| v as u64),
        cost: row.get("cost")?,
    })
}

pub fn insert(conn: &Connection, execution: &Execution) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO executions (
            id, task_id, model, started_at, completed_at, success, error, tokens_used, cost
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            execution.id,
            execution.task_id,
            execution.model,
            execution.started_at as i64,
            execution.completed_at.map(|v| v as i64),
            execution.success.map(|v| v as i64),
            execution.error,
            execution.tokens_used.map(|v| v as i64),
            execution.cost,
        ],
    )
    .map_err(|e| anyhow::anyhow!("failed to insert execution {}: {e}", execution.id))?;
    Ok(())
}

/// Writes the terminal fields of an in-flight execution. `execution.id` must
/// already exist (written by `insert` when the task started running).
pub fn complete(conn: &Connection, execution: &Execution) -> Result<()> {
    conn.execute(
        r#"
        UPDATE executions SET
            completed_at = ?1, success = ?2, error = ?3, tokens_used = ?4, cost = ?5
        WHERE id = ?6
        "#,
        params![
            execution.completed_at.map(|v| v as i64),
            execution.success.map(|v| v as i64),
            execution.error,
            execution.tokens_used.map(|v| v as i64),
            execution.cost,
            execution.id,
        ],
    )
    .map_err(|e| anyhow::anyhow!("failed to complete execution {}: {e}", execution.id))?;
    Ok(())
}

pub fn get_for_task(conn: &Connection, task_id: &str) -> Result<Vec<Execution>> {
    let mut stmt =
        conn.prepare("SELECT * FROM executions WHERE task_id = ?1 ORDER BY started_at ASC")?;
    let rows = stmt.query_map(params![task_id], row_to_execution)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("failed to list executions for task {task_id}: {e}"))
}

/// §3 invariant: at most one Execution per task has `completedAt` null at a
/// given moment. Used by the executor to validate orphan recovery at
/// startup (§4.8).
pub fn count_live(conn: &Connection, task_id: &str) -> Result<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM executions WHERE task_id = ?1 AND completed_at IS NULL",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

/// (`completedToday`, `failedToday`) for `ExecutorStatus` (§4.7), counting
/// executions whose `completedAt` falls within the current UTC calendar day.
pub fn today_stats(conn: &Connection) -> Result<(u64, u64)> {
    let now = current_timestamp_millis();
    let day_start = (now / 86_400_000) * 86_400_000;

    let completed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM executions WHERE success = 1 AND completed_at >= ?1",
        params![day_start as i64],
        |row| row.get(0),
    )?;
    let failed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM executions WHERE success = 0 AND completed_at >= ?1",
        params![day_start as i64],
        |row| row.get(0),
    )?;

    Ok((completed as u64, failed as u64))
}
