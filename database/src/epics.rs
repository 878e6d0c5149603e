use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use shark_core::{
    error::{Result, SharkError},
    keys::Keys,
    models::{Epic, NewEpic, UpdateEpic},
    paths,
    repository::EpicRepository,
    workflow::Workflow,
};
use sqlx::{Row, Sqlite};

use crate::{
    common::{map_sqlx_err, now, row_to_epic},
    files::FileAssignmentManager,
    store::Store,
    tasks,
};

const EPIC_COLUMNS: &str = "id, key, title, description, status, priority, business_value, \
    file_path, slug, status_override, created_at, updated_at";

/// SQLite implementation of the epic repository
#[derive(Debug, Clone)]
pub struct SqliteEpicRepository {
    store: Store,
    workflow: Arc<Workflow>,
}

impl SqliteEpicRepository {
    pub fn new(store: Store, workflow: Arc<Workflow>) -> Self {
        Self { store, workflow }
    }

    async fn fetch_required(&self, id: i64) -> Result<Epic> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| SharkError::not_found("epic", format!("id {id}")))
    }

    async fn next_key(&self) -> Result<String> {
        let existing: Vec<String> = sqlx::query_scalar("SELECT key FROM epics")
            .fetch_all(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        let taken: BTreeSet<u32> = existing
            .iter()
            .filter_map(|k| Keys::ordinal(k).ok())
            .collect();
        let ordinal = (1..=99)
            .find(|o| !taken.contains(o))
            .ok_or_else(|| SharkError::validation("epic key", "no free epic ordinals"))?;
        Keys::epic_from_ordinal(ordinal)
    }
}

#[async_trait]
impl EpicRepository for SqliteEpicRepository {
    async fn create(&self, new: NewEpic) -> Result<Epic> {
        if new.title.trim().is_empty() {
            return Err(SharkError::validation("title", "title is empty"));
        }
        let key = match &new.key {
            Some(key) => Keys::epic(key)?,
            None => self.next_key().await?,
        };

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

        let at = now();
        let row = sqlx::query(&format!(
            "INSERT INTO epics (key, title, description, priority, business_value, file_path, \
             slug, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {EPIC_COLUMNS}"
        ))
        .bind(&key)
        .bind(new.title.trim())
        .bind(&new.description)
        .bind(new.priority.as_str())
        .bind(&new.business_value)
        .bind(&file_path)
        .bind(&new.slug)
        .bind(at)
        .bind(at)
        .fetch_one(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;

        tracing::info!(epic = %key, "epic created");
        row_to_epic(&row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Epic>> {
        let row = sqlx::query(&format!("SELECT {EPIC_COLUMNS} FROM epics WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_epic).transpose()
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<Epic>> {
        let row = sqlx::query(&format!("SELECT {EPIC_COLUMNS} FROM epics WHERE key = ?"))
            .bind(key)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_epic).transpose()
    }

    async fn get_by_file_path(&self, path: &str) -> Result<Option<Epic>> {
        let row = sqlx::query(&format!(
            "SELECT {EPIC_COLUMNS} FROM epics WHERE file_path = ?"
        ))
        .bind(path)
        .fetch_optional(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_epic).transpose()
    }

    async fn list(&self) -> Result<Vec<Epic>> {
        let rows = sqlx::query(&format!(
            "SELECT {EPIC_COLUMNS} FROM epics ORDER BY key ASC"
        ))
        .fetch_all(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_epic).collect()
    }

    async fn update(&self, id: i64, updates: UpdateEpic) -> Result<Epic> {
        let existing = self.fetch_required(id).await?;

        let mut builder: sqlx::QueryBuilder<Sqlite> = sqlx::QueryBuilder::new("UPDATE epics SET ");
        let mut separated = builder.separated(", ");
        let mut has_updates = false;

        if let Some(title) = &updates.title {
            if title.trim().is_empty() {
                return Err(SharkError::validation("title", "title is empty"));
            }
            separated
                .push("title = ")
                .push_bind_unseparated(title.trim().to_string());
            has_updates = true;
        }
        if let Some(description) = &updates.description {
            separated
                .push("description = ")
                .push_bind_unseparated(description.clone());
            has_updates = true;
        }
        if let Some(priority) = updates.priority {
            separated
                .push("priority = ")
                .push_bind_unseparated(priority.as_str());
            has_updates = true;
        }
        if let Some(business_value) = &updates.business_value {
            separated
                .push("business_value = ")
                .push_bind_unseparated(business_value.clone());
            has_updates = true;
        }
        if let Some(slug) = &updates.slug {
            separated.push("slug = ").push_bind_unseparated(slug.clone());
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
        let result = sqlx::query("DELETE FROM epics WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(SharkError::not_found("epic", format!("id {id}")));
        }
        Ok(())
    }

    async fn set_status(&self, id: i64, status: &str, override_status: bool) -> Result<Epic> {
        self.fetch_required(id).await?;
        sqlx::query("UPDATE epics SET status = ?, status_override = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(override_status)
            .bind(now())
            .bind(id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        self.fetch_required(id).await
    }

    async fn set_status_override(&self, id: i64, enabled: bool) -> Result<Epic> {
        self.fetch_required(id).await?;
        sqlx::query("UPDATE epics SET status_override = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(now())
            .bind(id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        self.fetch_required(id).await
    }

    async fn cascade_status_to_features_and_tasks(
        &self,
        id: i64,
        feature_status: &str,
        task_status: &str,
        agent: Option<&str>,
    ) -> Result<u64> {
        if !self.workflow.contains(task_status) {
            return Err(SharkError::validation(
                "status",
                format!("'{task_status}' is not a workflow status"),
            ));
        }
        self.fetch_required(id).await?;

        let mut tx = self.store.begin().await?;
        let feature_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM features WHERE epic_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let at = now();
        let mut touched = 0u64;
        for feature_id in feature_ids {
            touched +=
                tasks::bulk_set_status(&mut tx, &self.workflow, feature_id, task_status, agent)
                    .await?;

            let row = sqlx::query(
                "SELECT COUNT(*) AS total, \
                 COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed \
                 FROM tasks WHERE feature_id = ?",
            )
            .bind(feature_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
            let total: i64 = row.get("total");
            let completed: i64 = row.get("completed");
            let pct = shark_core::status::progress_pct(completed as usize, total as usize);

            sqlx::query(
                "UPDATE features SET status = ?, progress_pct = ?, updated_at = ? WHERE id = ?",
            )
            .bind(feature_status)
            .bind(pct)
            .bind(at)
            .bind(feature_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }
        tx.commit().await.map_err(map_sqlx_err)?;

        tracing::info!(epic_id = id, task_status, feature_status, touched, "epic cascade applied");
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::SqliteFeatureRepository;
    use crate::tasks::SqliteTaskRepository;
    use crate::testing::{open_store, seed_epic};
    use shark_core::models::{NewFeature, NewTask, Priority};
    use shark_core::repository::{FeatureRepository, TaskRepository};

    #[tokio::test]
    async fn test_create_allocates_keys() {
        let (store, workflow) = open_store().await;
        let repo = SqliteEpicRepository::new(store, workflow);

        let first = repo
            .create(NewEpic {
                title: "Payments".into(),
                priority: Priority::High,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.key, "E01");
        assert_eq!(first.status, "draft");
        assert!(!first.status_override);

        let second = repo
            .create(NewEpic {
                title: "Search".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.key, "E02");
    }

    #[tokio::test]
    async fn test_duplicate_key_conflict() {
        let (store, workflow) = open_store().await;
        let repo = SqliteEpicRepository::new(store, workflow);

        repo.create(NewEpic {
            key: Some("E07".into()),
            title: "One".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        let err = repo
            .create(NewEpic {
                key: Some("E07".into()),
                title: "Two".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_children() {
        let (store, workflow, epic) = seed_epic().await;
        let epics = SqliteEpicRepository::new(store.clone(), workflow.clone());
        let features = SqliteFeatureRepository::new(store.clone(), workflow.clone());
        let tasks = SqliteTaskRepository::new(store.clone(), workflow);

        let feature = features
            .create(NewFeature {
                epic_id: epic.id,
                key: None,
                title: "Auth".into(),
                description: None,
                execution_order: None,
                file_path: None,
            })
            .await
            .unwrap();
        let task = tasks.create(NewTask::new(feature.id, "Login")).await.unwrap();

        epics.delete(epic.id).await.unwrap();

        assert!(features.get_by_id(feature.id).await.unwrap().is_none());
        assert!(tasks.get_by_id(task.id).await.unwrap().is_none());
        let history_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_history")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(history_rows, 0);
    }

    #[tokio::test]
    async fn test_cascade_status_to_features_and_tasks() {
        let (store, workflow, epic) = seed_epic().await;
        let epics = SqliteEpicRepository::new(store.clone(), workflow.clone());
        let features = SqliteFeatureRepository::new(store.clone(), workflow.clone());
        let tasks = SqliteTaskRepository::new(store, workflow);

        for title in ["Auth", "Search"] {
            let feature = features
                .create(NewFeature {
                    epic_id: epic.id,
                    key: None,
                    title: title.into(),
                    description: None,
                    execution_order: None,
                    file_path: None,
                })
                .await
                .unwrap();
            tasks.create(NewTask::new(feature.id, "a")).await.unwrap();
            tasks.create(NewTask::new(feature.id, "b")).await.unwrap();
        }

        let touched = epics
            .cascade_status_to_features_and_tasks(epic.id, "completed", "completed", None)
            .await
            .unwrap();
        assert_eq!(touched, 4);

        for feature in features.list(Some(epic.id)).await.unwrap() {
            assert_eq!(feature.status, "completed");
            assert_eq!(feature.progress_pct, 100.0);
        }
    }
}
