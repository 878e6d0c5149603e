use std::sync::Arc;

use shark_core::{
    error::{Result, SharkError},
    models::{EntityKind, StatusChange},
    status,
    workflow::Workflow,
};
use sqlx::Row;

use crate::{
    common::{map_sqlx_err, now},
    store::Store,
};

/// Upward status propagation: task change → feature recompute → epic
/// recompute. Every task-status mutation in the system invokes
/// [`StatusCascade::cascade_from_feature`] after its primary write commits;
/// cascade failures are downgraded to warnings by the dispatch layer, never
/// undoing the primary mutation.
#[derive(Debug, Clone)]
pub struct StatusCascade {
    store: Store,
    workflow: Arc<Workflow>,
}

impl StatusCascade {
    pub fn new(store: Store, workflow: Arc<Workflow>) -> Self {
        Self { store, workflow }
    }

    /// Recompute one feature's status (and progress) from its tasks.
    /// Overridden features are left untouched and report `was_changed:
    /// false`.
    pub async fn recalculate_feature(&self, feature_id: i64) -> Result<StatusChange> {
        let row = sqlx::query(
            "SELECT key, status, status_override FROM features WHERE id = ?",
        )
        .bind(feature_id)
        .fetch_optional(self.store.pool())
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| SharkError::not_found("feature", format!("id {feature_id}")))?;

        let key: String = row.get("key");
        let previous: String = row.get("status");
        let overridden: bool = row.get("status_override");
        if overridden {
            return Ok(StatusChange {
                entity_type: EntityKind::Feature,
                entity_key: key,
                previous_status: previous.clone(),
                new_status: previous,
                was_changed: false,
            });
        }

        let task_statuses: Vec<String> =
            sqlx::query_scalar("SELECT status FROM tasks WHERE feature_id = ?")
                .bind(feature_id)
                .fetch_all(self.store.pool())
                .await
                .map_err(map_sqlx_err)?;
        let target =
            status::feature_status_from_tasks(&self.workflow, task_statuses.iter().map(String::as_str));
        let completed = task_statuses.iter().filter(|s| *s == "completed").count();
        let progress = status::progress_pct(completed, task_statuses.len());

        sqlx::query("UPDATE features SET status = ?, progress_pct = ?, updated_at = ? WHERE id = ?")
            .bind(target)
            .bind(progress)
            .bind(now())
            .bind(feature_id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;

        let was_changed = previous != target;
        if was_changed {
            tracing::info!(feature = %key, from = %previous, to = %target, "feature status recalculated");
        }
        Ok(StatusChange {
            entity_type: EntityKind::Feature,
            entity_key: key,
            previous_status: previous,
            new_status: target.to_string(),
            was_changed,
        })
    }

    /// Recompute one epic's status from its features. Overridden epics are
    /// left untouched.
    pub async fn recalculate_epic(&self, epic_id: i64) -> Result<StatusChange> {
        let row = sqlx::query("SELECT key, status, status_override FROM epics WHERE id = ?")
            .bind(epic_id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| SharkError::not_found("epic", format!("id {epic_id}")))?;

        let key: String = row.get("key");
        let previous: String = row.get("status");
        let overridden: bool = row.get("status_override");
        if overridden {
            return Ok(StatusChange {
                entity_type: EntityKind::Epic,
                entity_key: key,
                previous_status: previous.clone(),
                new_status: previous,
                was_changed: false,
            });
        }

        let feature_statuses: Vec<String> =
            sqlx::query_scalar("SELECT status FROM features WHERE epic_id = ?")
                .bind(epic_id)
                .fetch_all(self.store.pool())
                .await
                .map_err(map_sqlx_err)?;
        let target = status::epic_status_from_features(
            &self.workflow,
            feature_statuses.iter().map(String::as_str),
        );

        sqlx::query("UPDATE epics SET status = ?, updated_at = ? WHERE id = ?")
            .bind(target)
            .bind(now())
            .bind(epic_id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;

        let was_changed = previous != target;
        if was_changed {
            tracing::info!(epic = %key, from = %previous, to = %target, "epic status recalculated");
        }
        Ok(StatusChange {
            entity_type: EntityKind::Epic,
            entity_key: key,
            previous_status: previous,
            new_status: target.to_string(),
            was_changed,
        })
    }

    /// The full upward cascade from a feature: recompute the feature, and
    /// when its status changed, the owning epic. Results are returned in
    /// application order.
    pub async fn cascade_from_feature(&self, feature_id: i64) -> Result<Vec<StatusChange>> {
        let feature_change = self.recalculate_feature(feature_id).await?;
        let mut results = vec![feature_change];

        if results[0].was_changed {
            let epic_id: i64 = sqlx::query_scalar("SELECT epic_id FROM features WHERE id = ?")
                .bind(feature_id)
                .fetch_one(self.store.pool())
                .await
                .map_err(map_sqlx_err)?;
            results.push(self.recalculate_epic(epic_id).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::SqliteFeatureRepository;
    use crate::tasks::SqliteTaskRepository;
    use crate::testing::seed_feature;
    use shark_core::models::NewTask;
    use shark_core::repository::{FeatureRepository, TaskRepository, TransitionRequest};

    async fn complete(tasks: &SqliteTaskRepository, id: i64) {
        for status in ["in_progress", "ready_for_review", "completed"] {
            tasks
                .update_status(id, status, TransitionRequest::default())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_feature_recalculation_lifecycle() {
        let (store, workflow, _epic, feature) = seed_feature().await;
        let cascade = StatusCascade::new(store.clone(), workflow.clone());
        let tasks = SqliteTaskRepository::new(store, workflow);

        // no tasks → draft, unchanged
        let change = cascade.recalculate_feature(feature.id).await.unwrap();
        assert_eq!(change.new_status, "draft");
        assert!(!change.was_changed);

        let a = tasks.create(NewTask::new(feature.id, "a")).await.unwrap();
        let b = tasks.create(NewTask::new(feature.id, "b")).await.unwrap();

        tasks
            .update_status(a.id, "in_progress", TransitionRequest::default())
            .await
            .unwrap();
        let change = cascade.recalculate_feature(feature.id).await.unwrap();
        assert_eq!(change.new_status, "active");
        assert!(change.was_changed);

        complete(&tasks, a.id).await;
        complete(&tasks, b.id).await;
        let change = cascade.recalculate_feature(feature.id).await.unwrap();
        assert_eq!(change.new_status, "completed");
    }

    #[tokio::test]
    async fn test_cascade_reaches_epic() {
        let (store, workflow, epic, feature) = seed_feature().await;
        let cascade = StatusCascade::new(store.clone(), workflow.clone());
        let tasks = SqliteTaskRepository::new(store.clone(), workflow);

        let a = tasks.create(NewTask::new(feature.id, "a")).await.unwrap();
        complete(&tasks, a.id).await;

        let changes = cascade.cascade_from_feature(feature.id).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].entity_key, feature.key);
        assert_eq!(changes[0].new_status, "completed");
        assert!(changes[0].was_changed);
        assert_eq!(changes[1].entity_key, epic.key);
        assert_eq!(changes[1].new_status, "completed");
        assert!(changes[1].was_changed);
    }

    #[tokio::test]
    async fn test_override_pins_status() {
        let (store, workflow, _epic, feature) = seed_feature().await;
        let cascade = StatusCascade::new(store.clone(), workflow.clone());
        let features = SqliteFeatureRepository::new(store.clone(), workflow.clone());
        let tasks = SqliteTaskRepository::new(store, workflow);

        let a = tasks.create(NewTask::new(feature.id, "a")).await.unwrap();
        complete(&tasks, a.id).await;

        features
            .set_status(feature.id, "active", true)
            .await
            .unwrap();
        let change = cascade.recalculate_feature(feature.id).await.unwrap();
        assert!(!change.was_changed);
        assert_eq!(change.new_status, "active");

        // clearing the override and recalculating normalizes immediately
        features.set_status_override(feature.id, false).await.unwrap();
        let change = cascade.recalculate_feature(feature.id).await.unwrap();
        assert!(change.was_changed);
        assert_eq!(change.new_status, "completed");
    }

    #[tokio::test]
    async fn test_progress_updated_with_recalculation() {
        let (store, workflow, _epic, feature) = seed_feature().await;
        let cascade = StatusCascade::new(store.clone(), workflow.clone());
        let features = SqliteFeatureRepository::new(store.clone(), workflow.clone());
        let tasks = SqliteTaskRepository::new(store, workflow);

        let a = tasks.create(NewTask::new(feature.id, "a")).await.unwrap();
        tasks.create(NewTask::new(feature.id, "b")).await.unwrap();
        complete(&tasks, a.id).await;

        cascade.cascade_from_feature(feature.id).await.unwrap();
        let feature = features.get_by_id(feature.id).await.unwrap().unwrap();
        assert_eq!(feature.progress_pct, 50.0);
        assert_eq!(feature.status, "active");
    }
}
