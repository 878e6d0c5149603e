use chrono::{DateTime, Utc};
use shark_core::{
    error::{Result, SharkError},
    models::{SessionOutcome, WorkSession},
};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::common::{map_sqlx_err, row_to_session};

const COLUMNS: &str = "id, task_id, agent_id, started_at, ended_at, outcome, session_notes";

/// Open a session on a task. At most one session per task may be open; a
/// second open attempt is a conflict.
pub(crate) async fn open(
    pool: &SqlitePool,
    task_id: i64,
    agent_id: Option<&str>,
    at: DateTime<Utc>,
) -> Result<WorkSession> {
    if get_open(pool, task_id).await?.is_some() {
        return Err(SharkError::conflict(format!(
            "task {task_id} already has an open work session"
        )));
    }

    let row = sqlx::query(&format!(
        "INSERT INTO work_sessions (task_id, agent_id, started_at) VALUES (?, ?, ?) \
         RETURNING {COLUMNS}"
    ))
    .bind(task_id)
    .bind(agent_id)
    .bind(at)
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_err)?;

    row_to_session(&row)
}

/// The open session of a task, if any
pub(crate) async fn get_open(pool: &SqlitePool, task_id: i64) -> Result<Option<WorkSession>> {
    let row = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM work_sessions WHERE task_id = ? AND ended_at IS NULL"
    ))
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_err)?;

    row.as_ref().map(row_to_session).transpose()
}

/// Close the open session of a task, if one exists, inside the caller's
/// transaction. The outcome is derived from the status the task moved to.
pub(crate) async fn close_open(
    tx: &mut Transaction<'static, Sqlite>,
    task_id: i64,
    outcome: SessionOutcome,
    notes: Option<&str>,
    at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE work_sessions SET ended_at = ?, outcome = ?, session_notes = COALESCE(?, session_notes) \
         WHERE task_id = ? AND ended_at IS NULL",
    )
    .bind(at)
    .bind(outcome.as_str())
    .bind(notes)
    .bind(task_id)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_err)?;

    Ok(result.rows_affected())
}

/// All sessions of a task, oldest first
pub(crate) async fn list_for_task(pool: &SqlitePool, task_id: i64) -> Result<Vec<WorkSession>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM work_sessions WHERE task_id = ? ORDER BY id ASC"
    ))
    .bind(task_id)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)?;

    rows.iter().map(row_to_session).collect()
}
