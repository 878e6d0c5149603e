use chrono::{DateTime, Utc};
use shark_core::{
    error::{Result, SharkError},
    models::{
        Document, Epic, Feature, NoteType, Priority, RelationshipType, SessionOutcome, Task,
        TaskHistoryEntry, TaskNote, TaskRelationship, VerificationStatus, WorkSession,
    },
};
use sqlx::{sqlite::SqliteRow, Row};

/// Convert a SQLx error to the engine taxonomy. Unique-constraint hits
/// become conflicts with the offending column named when SQLite tells us;
/// everything else is a store error.
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> SharkError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            let message = db_err.message();
            let detail = message
                .rsplit("failed: ")
                .next()
                .unwrap_or(message)
                .to_string();
            SharkError::conflict(format!("already exists: {detail}"))
        }
        sqlx::Error::Database(db_err) => {
            SharkError::store(format!("database error: {}", db_err.message()))
        }
        sqlx::Error::PoolTimedOut => SharkError::store("connection pool timeout".to_string()),
        sqlx::Error::Io(io_err) => SharkError::store(format!("database I/O error: {io_err}")),
        _ => SharkError::store(format!("database operation failed: {err}")),
    }
}

fn json_column(row: &SqliteRow, column: &str) -> Option<serde_json::Value> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok())
}

pub(crate) fn row_to_epic(row: &SqliteRow) -> Result<Epic> {
    let priority: String = row.get("priority");
    Ok(Epic {
        id: row.get("id"),
        key: row.get("key"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        priority: Priority::parse(&priority)?,
        business_value: row.get("business_value"),
        file_path: row.get("file_path"),
        slug: row.get("slug"),
        status_override: row.get("status_override"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_feature(row: &SqliteRow) -> Result<Feature> {
    Ok(Feature {
        id: row.get("id"),
        key: row.get("key"),
        epic_id: row.get("epic_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        progress_pct: row.get("progress_pct"),
        execution_order: row.get("execution_order"),
        file_path: row.get("file_path"),
        status_override: row.get("status_override"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let depends_on: Vec<String> = row
        .try_get::<Option<String>, _>("depends_on")
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    let verification: String = row.get("verification_status");

    Ok(Task {
        id: row.get("id"),
        key: row.get("key"),
        feature_id: row.get("feature_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        priority: row.get("priority"),
        agent_type: row.get("agent_type"),
        assigned_agent: row.get("assigned_agent"),
        depends_on,
        execution_order: row.get("execution_order"),
        file_path: row.get("file_path"),
        blocked_reason: row.get("blocked_reason"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        blocked_at: row.get("blocked_at"),
        rejection_count: row.get("rejection_count"),
        context_data: json_column(row, "context_data"),
        completed_by: row.get("completed_by"),
        tests_passed: row.get("tests_passed"),
        verification_status: VerificationStatus::parse(&verification)?,
        files_changed: json_column(row, "files_changed"),
        completion_notes: row.get("completion_notes"),
        time_spent_minutes: row.get("time_spent_minutes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn row_to_history(row: &SqliteRow) -> Result<TaskHistoryEntry> {
    Ok(TaskHistoryEntry {
        id: row.get("id"),
        task_id: row.get("task_id"),
        from_status: row.get("from_status"),
        to_status: row.get("to_status"),
        agent: row.get("agent"),
        notes: row.get("notes"),
        timestamp: row.get("timestamp"),
    })
}

pub(crate) fn row_to_note(row: &SqliteRow) -> Result<TaskNote> {
    let note_type: String = row.get("note_type");
    Ok(TaskNote {
        id: row.get("id"),
        task_id: row.get("task_id"),
        note_type: NoteType::parse(&note_type)?,
        content: row.get("content"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    })
}

pub(crate) fn row_to_session(row: &SqliteRow) -> Result<WorkSession> {
    let outcome: Option<String> = row.get("outcome");
    Ok(WorkSession {
        id: row.get("id"),
        task_id: row.get("task_id"),
        agent_id: row.get("agent_id"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        outcome: outcome.as_deref().map(SessionOutcome::parse).transpose()?,
        session_notes: row.get("session_notes"),
    })
}

pub(crate) fn row_to_relationship(row: &SqliteRow) -> Result<TaskRelationship> {
    let relationship: String = row.get("relationship_type");
    Ok(TaskRelationship {
        id: row.get("id"),
        from_task_id: row.get("from_task_id"),
        to_task_id: row.get("to_task_id"),
        relationship: RelationshipType::parse(&relationship)?,
        created_at: row.get("created_at"),
    })
}

pub(crate) fn row_to_document(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: row.get("id"),
        title: row.get("title"),
        file_path: row.get("file_path"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Serialize an optional JSON payload for a TEXT column
pub(crate) fn json_text(value: Option<&serde_json::Value>) -> Option<String> {
    value.map(|v| v.to_string())
}

/// Serialize a dependency key list for the legacy `depends_on` column;
/// empty lists are stored as NULL
pub(crate) fn depends_on_text(keys: &[String]) -> Option<String> {
    if keys.is_empty() {
        None
    } else {
        serde_json::to_string(keys).ok()
    }
}

/// Shared "now" for rows written inside one operation
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depends_on_text() {
        assert_eq!(depends_on_text(&[]), None);
        assert_eq!(
            depends_on_text(&["T-E01-F01-001".to_string()]).unwrap(),
            "[\"T-E01-F01-001\"]"
        );
    }

    #[test]
    fn test_json_text() {
        assert_eq!(json_text(None), None);
        let value = serde_json::json!({"k": 1});
        assert_eq!(json_text(Some(&value)).unwrap(), "{\"k\":1}");
    }
}
