use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    models::{
        CompletionMetadata, Document, EntityKind, Epic, Feature, NewEpic, NewFeature, NewTask,
        RelationshipType, StatusBreakdown, Task, TaskFilter, TaskRelationship, UpdateEpic,
        UpdateFeature, UpdateTask,
    },
    workflow::OrchestratorAction,
};

/// Caller-supplied context for a status transition
#[derive(Debug, Clone, Default)]
pub struct TransitionRequest {
    /// Acting agent, recorded in history and closed sessions
    pub agent: Option<String>,
    /// Free-form notes for the history row
    pub notes: Option<String>,
    /// Reason for a backward transition; also written as a rejection note
    pub rejection_reason: Option<String>,
    /// Bypass workflow validation (the destination must still exist)
    pub force: bool,
}

/// Result of a status transition: the updated task plus the orchestrator
/// action attached to the new status, if the workflow declares one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub task: Task,
    pub action: Option<OrchestratorAction>,
}

/// Persistence interface for epics
#[async_trait]
pub trait EpicRepository: Send + Sync {
    /// Create an epic; allocates the next free key when none is given
    async fn create(&self, epic: NewEpic) -> Result<Epic>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Epic>>;
    async fn get_by_key(&self, key: &str) -> Result<Option<Epic>>;
    async fn get_by_file_path(&self, path: &str) -> Result<Option<Epic>>;
    async fn list(&self) -> Result<Vec<Epic>>;

    /// Update scalar fields; only `Some` fields are written
    async fn update(&self, id: i64, updates: UpdateEpic) -> Result<Epic>;

    /// Delete the epic and, through the store's cascade rules, its features,
    /// tasks, and their dependents
    async fn delete(&self, id: i64) -> Result<()>;

    /// Write a status directly, optionally pinning it against recalculation
    async fn set_status(&self, id: i64, status: &str, override_status: bool) -> Result<Epic>;

    /// Flip the override flag. Clearing it does not recalculate by itself;
    /// the caller follows up through the cascade.
    async fn set_status_override(&self, id: i64, enabled: bool) -> Result<Epic>;

    /// Two-level bulk propagation used by force-complete: every feature of
    /// the epic gets `feature_status`, every task `task_status`, with one
    /// history row per touched task. Bypasses per-task workflow validation.
    /// Returns the number of tasks touched.
    async fn cascade_status_to_features_and_tasks(
        &self,
        id: i64,
        feature_status: &str,
        task_status: &str,
        agent: Option<&str>,
    ) -> Result<u64>;
}

/// Persistence interface for features
#[async_trait]
pub trait FeatureRepository: Send + Sync {
    async fn create(&self, feature: NewFeature) -> Result<Feature>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Feature>>;
    async fn get_by_key(&self, key: &str) -> Result<Option<Feature>>;
    async fn get_by_file_path(&self, path: &str) -> Result<Option<Feature>>;

    /// List features, optionally restricted to one epic
    async fn list(&self, epic_id: Option<i64>) -> Result<Vec<Feature>>;

    async fn update(&self, id: i64, updates: UpdateFeature) -> Result<Feature>;
    async fn delete(&self, id: i64) -> Result<()>;

    /// Recompute `progress_pct` from the feature's current tasks and store
    /// it; returns the raw percentage
    async fn update_progress(&self, id: i64) -> Result<f64>;

    async fn set_status(&self, id: i64, status: &str, override_status: bool) -> Result<Feature>;
    async fn set_status_override(&self, id: i64, enabled: bool) -> Result<Feature>;

    /// Bulk-update every task of the feature to `target_status`, writing one
    /// history row per task and bypassing per-task workflow validation.
    /// Returns the number of tasks touched.
    async fn cascade_status_to_tasks(
        &self,
        id: i64,
        target_status: &str,
        agent: Option<&str>,
    ) -> Result<u64>;
}

/// Persistence interface for tasks.
///
/// Status mutations go through `update_status` (or its specializations) so
/// that history, session closure, rejection bookkeeping, and timestamps stay
/// atomic with the status write.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a task in the workflow's initial status, allocating the next
    /// free key when none is given, and write the creation history row
    async fn create(&self, task: NewTask) -> Result<Task>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Task>>;
    async fn get_by_key(&self, key: &str) -> Result<Option<Task>>;
    async fn get_by_file_path(&self, path: &str) -> Result<Option<Task>>;

    /// List tasks matching the filter; fields combine with AND
    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>>;
    async fn list_by_feature(&self, feature_id: i64) -> Result<Vec<Task>>;

    async fn update(&self, id: i64, updates: UpdateTask) -> Result<Task>;
    async fn delete(&self, id: i64) -> Result<()>;

    /// Atomic status change: validates against the workflow (unless forced),
    /// updates lifecycle timestamps, increments `rejection_count` on a
    /// backward step with a reason, appends history, closes any open work
    /// session with an outcome derived from the new status, and writes a
    /// rejection note when a reason is present.
    async fn update_status(
        &self,
        id: i64,
        new_status: &str,
        request: TransitionRequest,
    ) -> Result<Transition>;

    /// Move to `blocked` with a required reason; writes `blocked_reason`
    /// and `blocked_at` in the same transaction
    async fn block(
        &self,
        id: i64,
        reason: &str,
        agent: Option<String>,
        force: bool,
    ) -> Result<Transition>;

    /// Move back to the workflow's initial status and clear block fields
    async fn unblock(&self, id: i64, agent: Option<String>, force: bool) -> Result<Transition>;

    /// Send a reviewed task back to development; behaves as a backward
    /// transition (reason required unless forced)
    async fn reopen(
        &self,
        id: i64,
        agent: Option<String>,
        notes: Option<String>,
        rejection_reason: Option<String>,
        force: bool,
    ) -> Result<Transition>;

    async fn update_completion_metadata(
        &self,
        key: &str,
        metadata: CompletionMetadata,
    ) -> Result<Task>;
    async fn get_completion_metadata(&self, key: &str) -> Result<CompletionMetadata>;

    /// Set or clear the task's file path, enforcing cross-entity uniqueness;
    /// with `force` the colliding owner is cleared after a store backup
    async fn update_file_path(&self, id: i64, path: Option<&str>, force: bool) -> Result<Task>;

    /// Rekey the task; the new key must be free and well-formed
    async fn update_key(&self, id: i64, new_key: &str) -> Result<Task>;

    /// Per-status task counts for a feature, in workflow declaration order
    async fn status_breakdown(&self, feature_id: i64) -> Result<Vec<StatusBreakdown>>;
}

/// Persistence interface for typed task-to-task edges
#[async_trait]
pub trait RelationshipRepository: Send + Sync {
    /// Insert an edge; duplicate triples are a conflict, and dependency
    /// edges (`depends_on`, `blocks`) are checked for cycles before insert
    async fn create(
        &self,
        from_task_id: i64,
        to_task_id: i64,
        relationship: RelationshipType,
    ) -> Result<TaskRelationship>;

    async fn delete(
        &self,
        from_task_id: i64,
        to_task_id: i64,
        relationship: RelationshipType,
    ) -> Result<()>;

    /// Outgoing edges of a task, optionally restricted by type
    async fn get_outgoing(
        &self,
        task_id: i64,
        types: Option<&[RelationshipType]>,
    ) -> Result<Vec<TaskRelationship>>;

    /// Incoming edges of a task, optionally restricted by type
    async fn get_incoming(
        &self,
        task_id: i64,
        types: Option<&[RelationshipType]>,
    ) -> Result<Vec<TaskRelationship>>;
}

/// Persistence interface for documents and their entity links
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Fetch the document with this file path or create it; idempotent
    async fn create_or_get(&self, title: &str, file_path: &str) -> Result<Document>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Document>>;
    async fn list(&self) -> Result<Vec<Document>>;
    async fn delete(&self, id: i64) -> Result<()>;

    /// Link a document to an entity; idempotent
    async fn link(&self, kind: EntityKind, entity_id: i64, document_id: i64) -> Result<()>;

    /// Remove a link; idempotent
    async fn unlink(&self, kind: EntityKind, entity_id: i64, document_id: i64) -> Result<()>;

    /// Documents linked to an entity
    async fn list_for(&self, kind: EntityKind, entity_id: i64) -> Result<Vec<Document>>;
}
