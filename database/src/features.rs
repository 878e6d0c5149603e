use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use shark_core::{
    error::{Result, SharkError},
    keys::Keys,
    models::{Feature, NewFeature, UpdateFeature},
    paths,
    repository::FeatureRepository,
    status,
    workflow::Workflow,
};
use sqlx::{Row, Sqlite};

use crate::{
    common::{map_sqlx_err, now, row_to_feature},
    files::FileAssignmentManager,
    store::Store,
    tasks,
};

const FEATURE_COLUMNS: &str = "id, key, epic_id, title, description, status, progress_pct, \
    execution_order, file_path, status_override, created_at, updated_at";

/// SQLite implementation of the feature repository
#[derive(Debug, Clone)]
pub struct SqliteFeatureRepository {
    store: Store,
    workflow: Arc<Workflow>,
}

impl SqliteFeatureRepository {
    pub fn new(store: Store, workflow: Arc<Workflow>) -> Self {
        Self { store, workflow }
    }

    async fn fetch_required(&self, id: i64) -> Result<Feature> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| SharkError::not_found("feature", format!("id {id}")))
    }

    async fn epic_key(&self, epic_id: i64) -> Result<String> {
        sqlx::query_scalar("SELECT key FROM epics WHERE id = ?")
            .bind(epic_id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| SharkError::not_found("epic", format!("id {epic_id}")))
    }

    async fn next_key(&self, epic_key: &str, epic_id: i64) -> Result<String> {
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT key FROM features WHERE epic_id = ?")
                .bind(epic_id)
                .fetch_all(self.store.pool())
                .await
                .map_err(map_sqlx_err)?;
        let taken: BTreeSet<u32> = existing
            .iter()
            .filter_map(|k| Keys::ordinal(k).ok())
            .collect();
        let ordinal = (1..=99)
            .find(|o| !taken.contains(o))
            .ok_or_else(|| SharkError::validation("feature key", "epic has no free ordinals"))?;
        Keys::feature_from_ordinal(epic_key, ordinal)
    }
}

#[async_trait]
impl FeatureRepository for SqliteFeatureRepository {
    async fn create(&self, new: NewFeature) -> Result<Feature> {
        if new.title.trim().is_empty() {
            return Err(SharkError::validation("title", "title is empty"));
        }
        let epic_key = self.epic_key(new.epic_id).await?;
        let key = match &new.key {
            Some(key) => {
                let key = Keys::feature(key, Some(&epic_key))?;
                if Keys::epic_of_feature(&key)? != epic_key {
                    return Err(SharkError::validation(
                        "feature key",
                        format!("'{key}' does not belong to epic {epic_key}"),
                    ));
                }
                key
            }
            None => self.next_key(&epic_key, new.epic_id).await?,
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
            "INSERT INTO features (key, epic_id, title, description, execution_order, file_path, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {FEATURE_COLUMNS}"
        ))
        .bind(&key)
        .bind(new.epic_id)
        .bind(new.title.trim())
        .bind(&new.description)
        .bind(new.execution_order)
        .bind(&file_path)
        .bind(at)
        .bind(at)
        .fetch_one(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;

        tracing::info!(feature = %key, "feature created");
        row_to_feature(&row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Feature>> {
        let row = sqlx::query(&format!(
            "SELECT {FEATURE_COLUMNS} FROM features WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_feature).transpose()
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<Feature>> {
        let row = sqlx::query(&format!(
            "SELECT {FEATURE_COLUMNS} FROM features WHERE key = ?"
        ))
        .bind(key)
        .fetch_optional(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_feature).transpose()
    }

    async fn get_by_file_path(&self, path: &str) -> Result<Option<Feature>> {
        let row = sqlx::query(&format!(
            "SELECT {FEATURE_COLUMNS} FROM features WHERE file_path = ?"
        ))
        .bind(path)
        .fetch_optional(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_feature).transpose()
    }

    async fn list(&self, epic_id: Option<i64>) -> Result<Vec<Feature>> {
        let mut builder: sqlx::QueryBuilder<Sqlite> =
            sqlx::QueryBuilder::new(format!("SELECT {FEATURE_COLUMNS} FROM features"));
        if let Some(epic_id) = epic_id {
            builder.push(" WHERE epic_id = ").push_bind(epic_id);
        }
        builder.push(" ORDER BY key ASC");

        let rows = builder
            .build()
            .fetch_all(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_feature).collect()
    }

    async fn update(&self, id: i64, updates: UpdateFeature) -> Result<Feature> {
        let existing = self.fetch_required(id).await?;

        let mut builder: sqlx::QueryBuilder<Sqlite> =
            sqlx::QueryBuilder::new("UPDATE features SET ");
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
        if let Some(execution_order) = updates.execution_order {
            separated
                .push("execution_order = ")
                .push_bind_unseparated(execution_order);
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
        let result = sqlx::query("DELETE FROM features WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(SharkError::not_found("feature", format!("id {id}")));
        }
        Ok(())
    }

    async fn update_progress(&self, id: i64) -> Result<f64> {
        self.fetch_required(id).await?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
             COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed \
             FROM tasks WHERE feature_id = ?",
        )
        .bind(id)
        .fetch_one(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        let total: i64 = row.get("total");
        let completed: i64 = row.get("completed");
        let pct = status::progress_pct(completed as usize, total as usize);

        sqlx::query("UPDATE features SET progress_pct = ?, updated_at = ? WHERE id = ?")
            .bind(pct)
            .bind(now())
            .bind(id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        Ok(pct)
    }

    async fn set_status(&self, id: i64, status: &str, override_status: bool) -> Result<Feature> {
        self.fetch_required(id).await?;
        sqlx::query(
            "UPDATE features SET status = ?, status_override = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(override_status)
        .bind(now())
        .bind(id)
        .execute(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        self.fetch_required(id).await
    }

    async fn set_status_override(&self, id: i64, enabled: bool) -> Result<Feature> {
        self.fetch_required(id).await?;
        sqlx::query("UPDATE features SET status_override = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(now())
            .bind(id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        self.fetch_required(id).await
    }

    async fn cascade_status_to_tasks(
        &self,
        id: i64,
        target_status: &str,
        agent: Option<&str>,
    ) -> Result<u64> {
        if !self.workflow.contains(target_status) {
            return Err(SharkError::validation(
                "status",
                format!("'{target_status}' is not a workflow status"),
            ));
        }
        self.fetch_required(id).await?;

        let mut tx = self.store.begin().await?;
        let touched =
            tasks::bulk_set_status(&mut tx, &self.workflow, id, target_status, agent).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        tracing::info!(feature_id = id, target = target_status, touched, "feature cascade applied");
        Ok(touched)
    }
}
