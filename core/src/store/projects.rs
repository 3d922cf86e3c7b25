//! Project CRUD (§3, §4.1).

use rusqlite::{params, Connection, OptionalExtension};
use shared::error::Result;
use shared::model::{Project, ProjectStatus};
use shared::utils::current_timestamp_millis;

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            target TEXT,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
        [],
    )
    .map_err(|e| anyhow::anyhow!("failed to create projects table: {e}"))?;
    Ok(())
}

fn parse_status(s: &str) -> ProjectStatus {
    match s {
        "paused" => ProjectStatus::Paused,
        "completed" => ProjectStatus::Completed,
        "cancelled" => ProjectStatus::Cancelled,
        _ => ProjectStatus::Active,
    }
}

fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
    let status: String = row.get("status")?;
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        target: row.get("target")?,
        status: parse_status(&status),
        created_at: row.get::<_, i64>("created_at")? as u64,
        updated_at: row.get::<_, i64>("updated_at")? as u64,
    })
}

pub fn insert(conn: &Connection, project: &Project) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO projects (id, name, description, target, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            project.id,
            project.name,
            project.description,
            project.target,
            project.status.to_string(),
            project.created_at as i64,
            project.updated_at as i64,
        ],
    )
    .map_err(|e| anyhow::anyhow!("failed to insert project {}: {e}", project.id))?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Project>> {
    conn.query_row("SELECT * FROM projects WHERE id = ?1", params![id], row_to_project)
        .optional()
        .map_err(|e| anyhow::anyhow!("failed to load project {id}: {e}"))
}

pub fn update(conn: &Connection, project: &Project) -> Result<()> {
    let now = current_timestamp_millis();
    conn.execute(
        r#"
        UPDATE projects SET name = ?1, description = ?2, target = ?3, status = ?4, updated_at = ?5
        WHERE id = ?6
        "#,
        params![
            project.name,
            project.description,
            project.target,
            project.status.to_string(),
            now as i64,
            project.id,
        ],
    )
    .map_err(|e| anyhow::anyhow!("failed to update project {}: {e}", project.id))?;
    Ok(())
}
