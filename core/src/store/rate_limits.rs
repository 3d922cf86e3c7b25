//! Rate window persistence (§3, §4.2). The atomic check-and-reserve
//! algorithm itself lives in `rate_coordinator`, which serialises access
//! through a process-wide mutex and uses these functions only inside its
//! critical section.

use rusqlite::{params, Connection, OptionalExtension};
use shared::error::Result;
use shared::model::RateWindow;

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS rate_limits (
            model TEXT PRIMARY KEY,
            current_usage INTEGER NOT NULL,
            max_requests INTEGER NOT NULL,
            window_start INTEGER NOT NULL,
            window_duration_ms INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
        [],
    )
    .map_err(|e| anyhow::anyhow!("failed to create rate_limits table: {e}"))?;
    Ok(())
}

fn row_to_window(row: &rusqlite::Row) -> rusqlite::Result<RateWindow> {
    Ok(RateWindow {
        model: row.get("model")?,
        current_usage: row.get::<_, i64>("current_usage")? as u32,
        max_requests: row.get::<_, i64>("max_requests")? as u32,
        window_start: row.get::<_, i64>("window_start")? as u64,
        window_duration_ms: row.get::<_, i64>("window_duration_ms")? as u64,
        updated_at: row.get::<_, i64>("updated_at")? as u64,
    })
}

pub fn get(conn: &Connection, model: &str) -> Result<Option<RateWindow>> {
    conn.query_row(
        "SELECT * FROM rate_limits WHERE model = ?1",
        params![model],
        row_to_window,
    )
    .optional()
    .map_err(|e| anyhow::anyhow!("failed to load rate window for {model}: {e}"))
}

pub fn get_all(conn: &Connection) -> Result<Vec<RateWindow>> {
    let mut stmt = conn.prepare("SELECT * FROM rate_limits ORDER BY model ASC")?;
    let rows = stmt.query_map([], row_to_window)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("failed to list rate windows: {e}"))
}

pub fn upsert(conn: &Connection, window: &RateWindow) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO rate_limits (model, current_usage, max_requests, window_start, window_duration_ms, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(model) DO UPDATE SET
            current_usage = excluded.current_usage,
            max_requests = excluded.max_requests,
            window_start = excluded.window_start,
            window_duration_ms = excluded.window_duration_ms,
            updated_at = excluded.updated_at
        "#,
        params![
            window.model,
            window.current_usage,
            window.max_requests,
            window.window_start as i64,
            window.window_duration_ms as i64,
            window.updated_at as i64,
        ],
    )
    .map_err(|e| anyhow::anyhow!("failed to upsert rate window for {}: {e}", window.model))?;
    Ok(())
}
