use chrono::{DateTime, Utc};
use shark_core::{
    error::Result,
    models::{NoteType, TaskNote},
};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::common::{map_sqlx_err, row_to_note};

/// Insert a note inside the caller's transaction
pub(crate) async fn insert(
    tx: &mut Transaction<'static, Sqlite>,
    task_id: i64,
    note_type: NoteType,
    content: &str,
    created_by: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_notes (task_id, note_type, content, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(task_id)
    .bind(note_type.as_str())
    .bind(content)
    .bind(created_by)
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_err)?;
    Ok(())
}

/// Insert a standalone note outside any transaction
pub(crate) async fn create(
    pool: &SqlitePool,
    task_id: i64,
    note_type: NoteType,
    content: &str,
    created_by: Option<&str>,
    at: DateTime<Utc>,
) -> Result<TaskNote> {
    let row = sqlx::query(
        "INSERT INTO task_notes (task_id, note_type, content, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?) \
         RETURNING id, task_id, note_type, content, created_by, created_at",
    )
    .bind(task_id)
    .bind(note_type.as_str())
    .bind(content)
    .bind(created_by)
    .bind(at)
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_err)?;

    row_to_note(&row)
}

/// Notes of a task, oldest first
pub(crate) async fn list_for_task(pool: &SqlitePool, task_id: i64) -> Result<Vec<TaskNote>> {
    let rows = sqlx::query(
        "SELECT id, task_id, note_type, content, created_by, created_at \
         FROM task_notes WHERE task_id = ? ORDER BY id ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)?;

    rows.iter().map(row_to_note).collect()
}
