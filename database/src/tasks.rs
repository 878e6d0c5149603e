use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use shark_core::{
    error::{Result, SharkError},
    keys::Keys,
    models::{
        CompletionMetadata, EntityKind, NewTask, NoteType, SessionOutcome, StatusBreakdown, Task,
        TaskFilter, TaskHistoryEntry, TaskNote, UpdateTask, WorkSession,
    },
    paths,
    repository::{TaskRepository, Transition, TransitionRequest},
    workflow::{well_known, Workflow},
};
use sqlx::{Row, Sqlite, Transaction};

use crate::{
    common::{depends_on_text, json_text, map_sqlx_err, now, row_to_task},
    files::FileAssignmentManager,
    history, notes, sessions,
    store::Store,
};

const TASK_COLUMNS: &str = "id, key, feature_id, title, description, status, priority, \
    agent_type, assigned_agent, depends_on, execution_order, file_path, blocked_reason, \
    started_at, completed_at, blocked_at, rejection_count, context_data, completed_by, \
    tests_passed, verification_status, files_changed, completion_notes, time_spent_minutes, \
    created_at, updated_at";

/// SQLite implementation of the task repository.
///
/// Owns the atomic status-change path: workflow validation, lifecycle
/// timestamps, rejection bookkeeping, history append, and work-session
/// closure all commit in one transaction.
#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    store: Store,
    workflow: Arc<Workflow>,
}

impl SqliteTaskRepository {
    pub fn new(store: Store, workflow: Arc<Workflow>) -> Self {
        Self { store, workflow }
    }

    async fn fetch_required(&self, id: i64) -> Result<Task> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| SharkError::not_found("task", format!("id {id}")))
    }

    /// Full status history of a task, oldest first
    pub async fn history(&self, task_id: i64) -> Result<Vec<TaskHistoryEntry>> {
        history::list_for_task(self.store.pool(), task_id).await
    }

    /// Notes attached to a task, oldest first
    pub async fn notes(&self, task_id: i64) -> Result<Vec<TaskNote>> {
        notes::list_for_task(self.store.pool(), task_id).await
    }

    /// All work sessions of a task, oldest first
    pub async fn sessions(&self, task_id: i64) -> Result<Vec<WorkSession>> {
        sessions::list_for_task(self.store.pool(), task_id).await
    }

    /// The open work session of a task, if any
    pub async fn open_session(&self, task_id: i64) -> Result<Option<WorkSession>> {
        sessions::get_open(self.store.pool(), task_id).await
    }

    /// Attach a note to a task
    pub async fn add_note(
        &self,
        task_id: i64,
        note_type: NoteType,
        content: &str,
        created_by: Option<&str>,
    ) -> Result<TaskNote> {
        if content.trim().is_empty() {
            return Err(SharkError::validation("content", "note content is empty"));
        }
        self.fetch_required(task_id).await?;
        notes::create(
            self.store.pool(),
            task_id,
            note_type,
            content,
            created_by,
            now(),
        )
        .await
    }

    /// Resume work on a task: reuse the open session or start a fresh one
    pub async fn resume(&self, task_id: i64, agent: Option<&str>) -> Result<(Task, WorkSession)> {
        let task = self.fetch_required(task_id).await?;
        let session = match sessions::get_open(self.store.pool(), task_id).await? {
            Some(open) => open,
            None => sessions::open(self.store.pool(), task_id, agent, now()).await?,
        };
        Ok((task, session))
    }

    async fn apply_transition(
        &self,
        task: Task,
        new_status: &str,
        request: TransitionRequest,
        block_reason: Option<&str>,
    ) -> Result<Transition> {
        self.workflow.validate_transition(
            &task.status,
            new_status,
            request.force,
            request.rejection_reason.as_deref(),
        )?;

        let backward = self.workflow.is_backward(&task.status, new_status);
        let reason = request
            .rejection_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let at = now();

        let started_at = if new_status == well_known::IN_PROGRESS && task.started_at.is_none() {
            Some(at)
        } else {
            task.started_at
        };
        let completed_at = if self.workflow.is_terminal(new_status) && task.completed_at.is_none() {
            Some(at)
        } else {
            task.completed_at
        };
        let completed_by = if self.workflow.is_terminal(new_status) && task.completed_by.is_none() {
            request.agent.clone()
        } else {
            task.completed_by.clone()
        };
        let entering_hold = self.workflow.is_hold(new_status);
        let leaving_hold = self.workflow.is_hold(&task.status) && !entering_hold;
        let (blocked_at, blocked_reason) = if entering_hold {
            (
                Some(at),
                block_reason
                    .map(str::to_string)
                    .or_else(|| task.blocked_reason.clone()),
            )
        } else if leaving_hold {
            (None, None)
        } else {
            (task.blocked_at, task.blocked_reason.clone())
        };
        let rejection_increment = i64::from(backward && reason.is_some());
        let outcome = if entering_hold {
            SessionOutcome::Blocked
        } else if backward {
            SessionOutcome::Abandoned
        } else {
            SessionOutcome::Completed
        };

        let mut tx = self.store.begin().await?;
        sqlx::query(
            "UPDATE tasks SET status = ?, started_at = ?, completed_at = ?, completed_by = ?, \
             blocked_at = ?, blocked_reason = ?, rejection_count = rejection_count + ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(new_status)
        .bind(started_at)
        .bind(completed_at)
        .bind(&completed_by)
        .bind(blocked_at)
        .bind(&blocked_reason)
        .bind(rejection_increment)
        .bind(at)
        .bind(task.id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        history::insert(
            &mut tx,
            task.id,
            Some(&task.status),
            new_status,
            request.agent.as_deref(),
            request.notes.as_deref(),
            at,
        )
        .await?;
        sessions::close_open(&mut tx, task.id, outcome, None, at).await?;
        if let Some(reason) = &reason {
            notes::insert(
                &mut tx,
                task.id,
                NoteType::Rejection,
                reason,
                request.agent.as_deref(),
                at,
            )
            .await?;
        }
        tx.commit().await.map_err(map_sqlx_err)?;

        tracing::info!(
            task = %task.key,
            from = %task.status,
            to = new_status,
            forced = request.force,
            "task status changed"
        );
        let task = self.fetch_required(task.id).await?;
        Ok(Transition {
            task,
            action: self.workflow.action_for(new_status).cloned(),
        })
    }

    fn validate_priority(priority: i64) -> Result<()> {
        if (1..=10).contains(&priority) {
            Ok(())
        } else {
            Err(SharkError::validation(
                "priority",
                format!("{priority} is out of range 1-10"),
            ))
        }
    }

    fn normalize_depends_on(keys: &[String]) -> Result<Vec<String>> {
        keys.iter().map(|k| Keys::task(k)).collect()
    }

    async fn next_key(&self, feature_key: &str, feature_id: i64) -> Result<String> {
        let existing: Vec<String> = sqlx::query_scalar("SELECT key FROM tasks WHERE feature_id = ?")
            .bind(feature_id)
            .fetch_all(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        let taken: BTreeSet<u32> = existing
            .iter()
            .filter_map(|k| Keys::ordinal(k).ok())
            .collect();
        let ordinal = (1..=999)
            .find(|o| !taken.contains(o))
            .ok_or_else(|| SharkError::validation("task key", "feature has no free ordinals"))?;
        Keys::task_from_ordinal(feature_key, ordinal)
    }

    async fn feature_key(&self, feature_id: i64) -> Result<String> {
        sqlx::query_scalar("SELECT key FROM features WHERE id = ?")
            .bind(feature_id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| SharkError::not_found("feature", format!("id {feature_id}")))
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, new: NewTask) -> Result<Task> {
        if new.title.trim().is_empty() {
            return Err(SharkError::validation("title", "title is empty"));
        }
        let priority = new.priority.unwrap_or(5);
        Self::validate_priority(priority)?;

        let feature_key = self.feature_key(new.feature_id).await?;
        let key = match &new.key {
            Some(key) => {
                let key = Keys::task(key)?;
                if Keys::feature_of_task(&key)? != feature_key {
                    return Err(SharkError::validation(
                        "task key",
                        format!("'{key}' does not belong to feature {feature_key}"),
                    ));
                }
                key
            }
            None => self.next_key(&feature_key, new.feature_id).await?,
        };
        let depends_on = Self::normalize_depends_on(&new.depends_on)?;

        let file_path = match &new.file_path {
            Some(path) => {
                let normalized = paths::validate_file_path(path, true)?;
                let manager = FileAssignmentManager::new(self.store.clone());
                if let Some(claim) = manager.detect_collision(&normalized).await? {
                    return Err(SharkError::conflict(format!(
                        "file path '{normalized}' already claimed by {} {}",
                        claim.kind, claim.entity_key
                    )));
                }
                Some(normalized)
            }
            None => None,
        };

        let status = self.workflow.initial_status();
        let at = now();
        let mut tx = self.store.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO tasks (key, feature_id, title, description, status, priority, \
             agent_type, assigned_agent, depends_on, execution_order, file_path, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&key)
        .bind(new.feature_id)
        .bind(new.title.trim())
        .bind(&new.description)
        .bind(status)
        .bind(priority)
        .bind(&new.agent_type)
        .bind(&new.assigned_agent)
        .bind(depends_on_text(&depends_on))
        .bind(new.execution_order)
        .bind(&file_path)
        .bind(at)
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        history::insert(&mut tx, id, None, status, new.assigned_agent.as_deref(), None, at)
            .await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        tracing::info!(task = %key, "task created");
        self.fetch_required(id).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE key = ?"))
            .bind(key)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn get_by_file_path(&self, path: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE file_path = ?"))
            .bind(path)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let mut builder: sqlx::QueryBuilder<Sqlite> = sqlx::QueryBuilder::new(format!(
            "SELECT {} FROM tasks t \
             JOIN features f ON t.feature_id = f.id \
             JOIN epics e ON f.epic_id = e.id WHERE 1 = 1",
            TASK_COLUMNS
                .split(", ")
                .map(|c| format!("t.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ));

        if let Some(status) = &filter.status {
            builder.push(" AND t.status = ").push_bind(status.clone());
        }
        if let Some(epic_key) = &filter.epic_key {
            builder.push(" AND e.key = ").push_bind(epic_key.clone());
        }
        if let Some(feature_id) = filter.feature_id {
            builder.push(" AND t.feature_id = ").push_bind(feature_id);
        }
        if let Some(agent) = &filter.assigned_agent {
            builder
                .push(" AND t.assigned_agent = ")
                .push_bind(agent.clone());
        }
        if let Some(max_priority) = filter.max_priority {
            builder.push(" AND t.priority <= ").push_bind(max_priority);
        }
        builder.push(" ORDER BY t.id ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows = builder
            .build()
            .fetch_all(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_task).collect()
    }

    async fn list_by_feature(&self, feature_id: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE feature_id = ? ORDER BY id ASC"
        ))
        .bind(feature_id)
        .fetch_all(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_task).collect()
    }

    async fn update(&self, id: i64, updates: UpdateTask) -> Result<Task> {
        let existing = self.fetch_required(id).await?;

        let mut builder: sqlx::QueryBuilder<Sqlite> = sqlx::QueryBuilder::new("UPDATE tasks SET ");
        let mut separated = builder.separated(", ");
        let mut has_updates = false;

        if let Some(title) = &updates.title {
            if title.trim().is_empty() {
                return Err(SharkError::validation("title", "title is empty"));
            }
            separated.push("title = ").push_bind_unseparated(title.trim().to_string());
            has_updates = true;
        }
        if let Some(description) = &updates.description {
            separated
                .push("description = ")
                .push_bind_unseparated(description.clone());
            has_updates = true;
        }
        if let Some(priority) = updates.priority {
            Self::validate_priority(priority)?;
            separated.push("priority = ").push_bind_unseparated(priority);
            has_updates = true;
        }
        if let Some(agent_type) = &updates.agent_type {
            separated
                .push("agent_type = ")
                .push_bind_unseparated(agent_type.clone());
            has_updates = true;
        }
        if let Some(assigned_agent) = &updates.assigned_agent {
            separated
                .push("assigned_agent = ")
                .push_bind_unseparated(assigned_agent.clone());
            has_updates = true;
        }
        if let Some(depends_on) = &updates.depends_on {
            let normalized = Self::normalize_depends_on(depends_on)?;
            separated
                .push("depends_on = ")
                .push_bind_unseparated(depends_on_text(&normalized));
            has_updates = true;
        }
        if let Some(execution_order) = updates.execution_order {
            separated
                .push("execution_order = ")
                .push_bind_unseparated(execution_order);
            has_updates = true;
        }
        if let Some(context_data) = &updates.context_data {
            separated
                .push("context_data = ")
                .push_bind_unseparated(json_text(Some(context_data)));
            has_updates = true;
        }

        if !has_updates {
            return Ok(existing);
        }
        separated.push("updated_at = ").push_bind_unseparated(now());
        builder.push(" WHERE id = ").push_bind(id);
        builder
            .build()
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;

        self.fetch_required(id).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(SharkError::not_found("task", format!("id {id}")));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: i64,
        new_status: &str,
        request: TransitionRequest,
    ) -> Result<Transition> {
        let task = self.fetch_required(id).await?;
        self.apply_transition(task, new_status, request, None).await
    }

    async fn block(
        &self,
        id: i64,
        reason: &str,
        agent: Option<String>,
        force: bool,
    ) -> Result<Transition> {
        if reason.trim().is_empty() {
            return Err(SharkError::validation("reason", "a block reason is required"));
        }
        let task = self.fetch_required(id).await?;
        let request = TransitionRequest {
            agent,
            notes: None,
            rejection_reason: None,
            force,
        };
        self.apply_transition(task, well_known::BLOCKED, request, Some(reason.trim()))
            .await
    }

    async fn unblock(&self, id: i64, agent: Option<String>, force: bool) -> Result<Transition> {
        let task = self.fetch_required(id).await?;
        let target = self.workflow.initial_status().to_string();
        let request = TransitionRequest {
            agent,
            notes: None,
            rejection_reason: None,
            force,
        };
        self.apply_transition(task, &target, request, None).await
    }

    async fn reopen(
        &self,
        id: i64,
        agent: Option<String>,
        notes: Option<String>,
        rejection_reason: Option<String>,
        force: bool,
    ) -> Result<Transition> {
        let task = self.fetch_required(id).await?;
        let target = self.workflow.reopen_target(&task.status, force)?.to_string();
        let request = TransitionRequest {
            agent,
            notes,
            rejection_reason,
            force,
        };
        self.apply_transition(task, &target, request, None).await
    }

    async fn update_completion_metadata(
        &self,
        key: &str,
        metadata: CompletionMetadata,
    ) -> Result<Task> {
        let key = Keys::task(key)?;
        let result = sqlx::query(
            "UPDATE tasks SET completed_by = ?, tests_passed = ?, verification_status = ?, \
             files_changed = ?, completion_notes = ?, time_spent_minutes = ?, updated_at = ? \
             WHERE key = ?",
        )
        .bind(&metadata.completed_by)
        .bind(metadata.tests_passed)
        .bind(metadata.verification_status.as_str())
        .bind(json_text(metadata.files_changed.as_ref()))
        .bind(&metadata.completion_notes)
        .bind(metadata.time_spent_minutes)
        .bind(now())
        .bind(&key)
        .execute(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(SharkError::not_found("task", key));
        }
        self.get_by_key(&key)
            .await?
            .ok_or_else(|| SharkError::not_found("task", key))
    }

    async fn get_completion_metadata(&self, key: &str) -> Result<CompletionMetadata> {
        let key = Keys::task(key)?;
        let task = self
            .get_by_key(&key)
            .await?
            .ok_or_else(|| SharkError::not_found("task", key))?;
        Ok(CompletionMetadata {
            completed_by: task.completed_by,
            tests_passed: task.tests_passed,
            verification_status: task.verification_status,
            files_changed: task.files_changed,
            completion_notes: task.completion_notes,
            time_spent_minutes: task.time_spent_minutes,
        })
    }

    async fn update_file_path(&self, id: i64, path: Option<&str>, force: bool) -> Result<Task> {
        self.fetch_required(id).await?;
        let manager = FileAssignmentManager::new(self.store.clone());
        match path {
            Some(path) => {
                manager.assign(EntityKind::Task, id, path, force).await?;
            }
            None => manager.clear(EntityKind::Task, id).await?,
        }
        self.fetch_required(id).await
    }

    async fn update_key(&self, id: i64, new_key: &str) -> Result<Task> {
        let task = self.fetch_required(id).await?;
        let new_key = Keys::task(new_key)?;
        let feature_key = self.feature_key(task.feature_id).await?;
        if Keys::feature_of_task(&new_key)? != feature_key {
            return Err(SharkError::validation(
                "task key",
                format!("'{new_key}' does not belong to feature {feature_key}"),
            ));
        }
        sqlx::query("UPDATE tasks SET key = ?, updated_at = ? WHERE id = ?")
            .bind(&new_key)
            .bind(now())
            .bind(id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        self.fetch_required(id).await
    }

    async fn status_breakdown(&self, feature_id: i64) -> Result<Vec<StatusBreakdown>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM tasks WHERE feature_id = ? GROUP BY status",
        )
        .bind(feature_id)
        .fetch_all(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;

        let mut breakdown: Vec<StatusBreakdown> = rows
            .iter()
            .map(|row| {
                let status: String = row.get("status");
                let phase = self.workflow.phase_of(&status).map(str::to_string);
                StatusBreakdown {
                    status,
                    count: row.get("count"),
                    phase,
                }
            })
            .collect();
        breakdown.sort_by_key(|b| self.workflow.position(&b.status).unwrap_or(usize::MAX));
        Ok(breakdown)
    }
}

/// Bulk status write used by feature/epic force-completes: every task of the
/// feature not already at `target_status` is updated with one history row
/// and its open session closed, bypassing per-task workflow validation.
pub(crate) async fn bulk_set_status(
    tx: &mut Transaction<'static, Sqlite>,
    workflow: &Workflow,
    feature_id: i64,
    target_status: &str,
    agent: Option<&str>,
) -> Result<u64> {
    let rows = sqlx::query("SELECT id, status FROM tasks WHERE feature_id = ? AND status <> ?")
        .bind(feature_id)
        .bind(target_status)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

    let at = now();
    let terminal = workflow.is_terminal(target_status);
    let entering_hold = workflow.is_hold(target_status);
    let outcome = if entering_hold {
        SessionOutcome::Blocked
    } else if terminal {
        SessionOutcome::Completed
    } else {
        SessionOutcome::Abandoned
    };
    let mut touched = 0u64;

    for row in rows {
        let id: i64 = row.get("id");
        let from_status: String = row.get("status");
        let clear_block = workflow.is_hold(&from_status) && !entering_hold;

        sqlx::query(
            "UPDATE tasks SET status = ?, \
             completed_at = CASE WHEN ? THEN COALESCE(completed_at, ?) ELSE completed_at END, \
             completed_by = CASE WHEN ? THEN COALESCE(completed_by, ?) ELSE completed_by END, \
             blocked_at = CASE WHEN ? THEN NULL ELSE blocked_at END, \
             blocked_reason = CASE WHEN ? THEN NULL ELSE blocked_reason END, \
             updated_at = ? WHERE id = ?",
        )
        .bind(target_status)
        .bind(terminal)
        .bind(at)
        .bind(terminal)
        .bind(agent)
        .bind(clear_block)
        .bind(clear_block)
        .bind(at)
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        history::insert(tx, id, Some(&from_status), target_status, agent, None, at).await?;
        sessions::close_open(tx, id, outcome, None, at).await?;
        touched += 1;
    }
    Ok(touched)
}
