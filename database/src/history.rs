use chrono::{DateTime, Utc};
use shark_core::{
    error::Result,
    models::TaskHistoryEntry,
};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::common::{map_sqlx_err, row_to_history};

/// Append one audit row. Runs inside the caller's transaction so the row
/// commits or rolls back with the status write it records.
pub(crate) async fn insert(
    tx: &mut Transaction<'static, Sqlite>,
    task_id: i64,
    from_status: Option<&str>,
    to_status: &str,
    agent: Option<&str>,
    notes: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_history (task_id, from_status, to_status, agent, notes, timestamp) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id)
    .bind(from_status)
    .bind(to_status)
    .bind(agent)
    .bind(notes)
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_err)?;
    Ok(())
}

/// Full history of a task, oldest first
pub(crate) async fn list_for_task(pool: &SqlitePool, task_id: i64) -> Result<Vec<TaskHistoryEntry>> {
    let rows = sqlx::query(
        "SELECT id, task_id, from_status, to_status, agent, notes, timestamp \
         FROM task_history WHERE task_id = ? ORDER BY id ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)?;

    rows.iter().map(row_to_history).collect()
}
