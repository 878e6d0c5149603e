use std::path::PathBuf;

use shark_core::{
    error::{Result, SharkError},
    models::EntityKind,
    paths,
};
use sqlx::Row;

use crate::{
    common::{map_sqlx_err, now},
    store::Store,
};

/// Operation tag used for the pre-reassignment backup file name
const REASSIGN_OPERATION: &str = "force reassign file";

/// Who currently claims a file path
#[derive(Debug, Clone, PartialEq)]
pub struct FileClaim {
    pub kind: EntityKind,
    pub entity_id: i64,
    pub entity_key: String,
}

/// Enforces the one-file-per-entity invariant across epics, features, and
/// tasks. All file-path writes in the system go through here.
#[derive(Debug, Clone)]
pub struct FileAssignmentManager {
    store: Store,
}

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Epic => "epics",
        EntityKind::Feature => "features",
        EntityKind::Task => "tasks",
    }
}

impl FileAssignmentManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Find the entity, of any kind, that claims this path
    pub async fn detect_collision(&self, path: &str) -> Result<Option<FileClaim>> {
        for kind in [EntityKind::Epic, EntityKind::Feature, EntityKind::Task] {
            let row = sqlx::query(&format!(
                "SELECT id, key FROM {} WHERE file_path = ?",
                table(kind)
            ))
            .bind(path)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;

            if let Some(row) = row {
                return Ok(Some(FileClaim {
                    kind,
                    entity_id: row.get("id"),
                    entity_key: row.get("key"),
                }));
            }
        }
        Ok(None)
    }

    /// Assign a path to an entity.
    ///
    /// A collision with another entity fails unless `force`; forcing first
    /// backs up the store file (fatal on failure), then clears the prior
    /// owner and sets the new one in a single transaction. Returns the
    /// backup path when one was written.
    pub async fn assign(
        &self,
        kind: EntityKind,
        entity_id: i64,
        path: &str,
        force: bool,
    ) -> Result<Option<PathBuf>> {
        let normalized = paths::validate_file_path(path, true)?;

        let claim = self.detect_collision(&normalized).await?;
        match claim {
            None => {
                self.set_path(kind, entity_id, Some(&normalized)).await?;
                Ok(None)
            }
            Some(claim) if claim.kind == kind && claim.entity_id == entity_id => Ok(None),
            Some(claim) if !force => Err(SharkError::conflict(format!(
                "file path '{normalized}' already claimed by {} {}",
                claim.kind, claim.entity_key
            ))),
            Some(claim) => {
                let backup = self.store.backup(REASSIGN_OPERATION)?;

                let mut tx = self.store.begin().await?;
                sqlx::query(&format!(
                    "UPDATE {} SET file_path = NULL, updated_at = ? WHERE id = ?",
                    table(claim.kind)
                ))
                .bind(now())
                .bind(claim.entity_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;

                sqlx::query(&format!(
                    "UPDATE {} SET file_path = ?, updated_at = ? WHERE id = ?",
                    table(kind)
                ))
                .bind(&normalized)
                .bind(now())
                .bind(entity_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
                tx.commit().await.map_err(map_sqlx_err)?;

                tracing::info!(
                    path = %normalized,
                    previous_owner = %claim.entity_key,
                    "file path force-reassigned"
                );
                Ok(backup)
            }
        }
    }

    /// Clear the path of an entity
    pub async fn clear(&self, kind: EntityKind, entity_id: i64) -> Result<()> {
        self.set_path(kind, entity_id, None).await
    }

    async fn set_path(&self, kind: EntityKind, entity_id: i64, path: Option<&str>) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET file_path = ?, updated_at = ? WHERE id = ?",
            table(kind)
        ))
        .bind(path)
        .bind(now())
        .bind(entity_id)
        .execute(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(SharkError::not_found(
                kind.as_str(),
                format!("id {entity_id}"),
            ));
        }
        Ok(())
    }
}
