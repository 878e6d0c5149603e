use async_trait::async_trait;
use shark_core::{
    error::{Result, SharkError},
    models::{Document, EntityKind},
    paths,
    repository::DocumentRepository,
};

use crate::{
    common::{map_sqlx_err, now, row_to_document},
    store::Store,
};

const DOCUMENT_COLUMNS: &str = "id, title, file_path, created_at, updated_at";

fn link_table(kind: EntityKind) -> (&'static str, &'static str) {
    match kind {
        EntityKind::Epic => ("epic_documents", "epic_id"),
        EntityKind::Feature => ("feature_documents", "feature_id"),
        EntityKind::Task => ("task_documents", "task_id"),
    }
}

/// SQLite implementation of the document repository. Documents are
/// deduplicated by file path; links to entities are idempotent both ways.
#[derive(Debug, Clone)]
pub struct SqliteDocumentRepository {
    store: Store,
}

impl SqliteDocumentRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn get_by_file_path(&self, path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE file_path = ?"
        ))
        .bind(path)
        .fetch_optional(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_document).transpose()
    }
}

#[async_trait]
impl DocumentRepository for SqliteDocumentRepository {
    async fn create_or_get(&self, title: &str, file_path: &str) -> Result<Document> {
        if title.trim().is_empty() {
            return Err(SharkError::validation("title", "title is empty"));
        }
        let normalized = paths::validate_file_path(file_path, false)?;
        if let Some(existing) = self.get_by_file_path(&normalized).await? {
            return Ok(existing);
        }

        let at = now();
        let row = sqlx::query(&format!(
            "INSERT INTO documents (title, file_path, created_at, updated_at) \
             VALUES (?, ?, ?, ?) RETURNING {DOCUMENT_COLUMNS}"
        ))
        .bind(title.trim())
        .bind(&normalized)
        .bind(at)
        .bind(at)
        .fetch_one(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        row_to_document(&row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY file_path ASC"
        ))
        .fetch_all(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_document).collect()
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(SharkError::not_found("document", format!("id {id}")));
        }
        Ok(())
    }

    async fn link(&self, kind: EntityKind, entity_id: i64, document_id: i64) -> Result<()> {
        let (table, column) = link_table(kind);
        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {table} ({column}, document_id) VALUES (?, ?)"
        ))
        .bind(entity_id)
        .bind(document_id)
        .execute(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn unlink(&self, kind: EntityKind, entity_id: i64, document_id: i64) -> Result<()> {
        let (table, column) = link_table(kind);
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE {column} = ? AND document_id = ?"
        ))
        .bind(entity_id)
        .bind(document_id)
        .execute(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_for(&self, kind: EntityKind, entity_id: i64) -> Result<Vec<Document>> {
        let (table, column) = link_table(kind);
        let rows = sqlx::query(&format!(
            "SELECT d.id, d.title, d.file_path, d.created_at, d.updated_at \
             FROM documents d JOIN {table} l ON d.id = l.document_id \
             WHERE l.{column} = ? ORDER BY d.file_path ASC"
        ))
        .bind(entity_id)
        .fetch_all(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_document).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seed_feature;

    #[tokio::test]
    async fn test_create_or_get_is_idempotent() {
        let (store, _workflow, _epic, _feature) = seed_feature().await;
        let repo = SqliteDocumentRepository::new(store);

        let first = repo.create_or_get("API notes", "docs/api.md").await.unwrap();
        let second = repo.create_or_get("API notes", "docs/api.md").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(repo.list().await.unwrap().len(), 1);

        let fetched = repo.get_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "API notes");

        repo.delete(first.id).await.unwrap();
        assert!(repo.get_by_id(first.id).await.unwrap().is_none());
        assert!(repo.delete(first.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_link_is_idempotent() {
        let (store, _workflow, epic, _feature) = seed_feature().await;
        let repo = SqliteDocumentRepository::new(store);

        let doc = repo.create_or_get("Notes", "docs/notes.md").await.unwrap();
        repo.link(EntityKind::Epic, epic.id, doc.id).await.unwrap();
        repo.link(EntityKind::Epic, epic.id, doc.id).await.unwrap();

        let linked = repo.list_for(EntityKind::Epic, epic.id).await.unwrap();
        assert_eq!(linked.len(), 1);

        repo.unlink(EntityKind::Epic, epic.id, doc.id).await.unwrap();
        // unlinking twice is fine
        repo.unlink(EntityKind::Epic, epic.id, doc.id).await.unwrap();
        assert!(repo.list_for(EntityKind::Epic, epic.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_links_per_entity_kind() {
        let (store, _workflow, epic, feature) = seed_feature().await;
        let repo = SqliteDocumentRepository::new(store);

        let doc = repo.create_or_get("Shared", "docs/shared.md").await.unwrap();
        repo.link(EntityKind::Epic, epic.id, doc.id).await.unwrap();
        repo.link(EntityKind::Feature, feature.id, doc.id).await.unwrap();

        assert_eq!(repo.list_for(EntityKind::Epic, epic.id).await.unwrap().len(), 1);
        assert_eq!(
            repo.list_for(EntityKind::Feature, feature.id).await.unwrap().len(),
            1
        );
        assert!(repo.list_for(EntityKind::Task, 1).await.unwrap().is_empty());
    }
}
