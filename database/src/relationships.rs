use std::collections::HashMap;

use async_trait::async_trait;
use shark_core::{
    error::{Result, SharkError},
    models::{RelationshipType, TaskRelationship},
    repository::RelationshipRepository,
};
use sqlx::Row;

use crate::{
    common::{map_sqlx_err, now, row_to_relationship},
    store::Store,
};

const EDGE_COLUMNS: &str = "id, from_task_id, to_task_id, relationship_type, created_at";

/// SQLite implementation of the typed task-relationship graph.
///
/// Dependency edges (`depends_on`, `blocks`) are kept acyclic by running a
/// DFS over same-type edges before every insertion; O(V+E) per insert is
/// fine at single-user scale and keeps scheduling reads free of transitive
/// closure work.
#[derive(Debug, Clone)]
pub struct SqliteRelationshipRepository {
    store: Store,
}

impl SqliteRelationshipRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn task_key(&self, id: i64) -> Result<String> {
        sqlx::query_scalar("SELECT key FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.store.pool())
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| SharkError::not_found("task", format!("id {id}")))
    }

    /// Would adding `from -> to` close a cycle in the same-type subgraph?
    /// DFS from `to` over outgoing edges; a path back to `from` means yes.
    async fn would_cycle(
        &self,
        from: i64,
        to: i64,
        relationship: RelationshipType,
    ) -> Result<bool> {
        if from == to {
            return Ok(true);
        }
        let rows = sqlx::query(
            "SELECT from_task_id, to_task_id FROM task_relationships WHERE relationship_type = ?",
        )
        .bind(relationship.as_str())
        .fetch_all(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;

        let mut adjacency: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in &rows {
            adjacency
                .entry(row.get("from_task_id"))
                .or_default()
                .push(row.get("to_task_id"));
        }

        let mut stack = vec![to];
        let mut visited = std::collections::HashSet::new();
        while let Some(node) = stack.pop() {
            if node == from {
                return Ok(true);
            }
            if visited.insert(node) {
                if let Some(nexts) = adjacency.get(&node) {
                    stack.extend(nexts);
                }
            }
        }
        Ok(false)
    }

    fn types_clause(types: Option<&[RelationshipType]>) -> Option<String> {
        types.map(|types| {
            types
                .iter()
                .map(|t| format!("'{}'", t.as_str()))
                .collect::<Vec<_>>()
                .join(", ")
        })
    }
}

#[async_trait]
impl RelationshipRepository for SqliteRelationshipRepository {
    async fn create(
        &self,
        from_task_id: i64,
        to_task_id: i64,
        relationship: RelationshipType,
    ) -> Result<TaskRelationship> {
        let from_key = self.task_key(from_task_id).await?;
        let to_key = self.task_key(to_task_id).await?;

        if relationship.is_dependency()
            && self
                .would_cycle(from_task_id, to_task_id, relationship)
                .await?
        {
            return Err(SharkError::CycleDetected {
                from_key,
                to_key,
                relationship: relationship.as_str().to_string(),
            });
        }

        let row = sqlx::query(&format!(
            "INSERT INTO task_relationships (from_task_id, to_task_id, relationship_type, created_at) \
             VALUES (?, ?, ?, ?) RETURNING {EDGE_COLUMNS}"
        ))
        .bind(from_task_id)
        .bind(to_task_id)
        .bind(relationship.as_str())
        .bind(now())
        .fetch_one(self.store.pool())
        .await
        .map_err(|e| match map_sqlx_err(e) {
            SharkError::Conflict(_) => SharkError::conflict(format!(
                "relationship {from_key} -{relationship}-> {to_key} already exists"
            )),
            other => other,
        })?;

        tracing::debug!(from = %from_key, to = %to_key, kind = %relationship, "relationship created");
        row_to_relationship(&row)
    }

    async fn delete(
        &self,
        from_task_id: i64,
        to_task_id: i64,
        relationship: RelationshipType,
    ) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM task_relationships \
             WHERE from_task_id = ? AND to_task_id = ? AND relationship_type = ?",
        )
        .bind(from_task_id)
        .bind(to_task_id)
        .bind(relationship.as_str())
        .execute(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(SharkError::not_found(
                "relationship",
                format!("{from_task_id} -{relationship}-> {to_task_id}"),
            ));
        }
        Ok(())
    }

    async fn get_outgoing(
        &self,
        task_id: i64,
        types: Option<&[RelationshipType]>,
    ) -> Result<Vec<TaskRelationship>> {
        let mut sql =
            format!("SELECT {EDGE_COLUMNS} FROM task_relationships WHERE from_task_id = ?");
        if let Some(clause) = Self::types_clause(types) {
            sql.push_str(&format!(" AND relationship_type IN ({clause})"));
        }
        sql.push_str(" ORDER BY id ASC");

        let rows = sqlx::query(&sql)
            .bind(task_id)
            .fetch_all(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_relationship).collect()
    }

    async fn get_incoming(
        &self,
        task_id: i64,
        types: Option<&[RelationshipType]>,
    ) -> Result<Vec<TaskRelationship>> {
        let mut sql = format!("SELECT {EDGE_COLUMNS} FROM task_relationships WHERE to_task_id = ?");
        if let Some(clause) = Self::types_clause(types) {
            sql.push_str(&format!(" AND relationship_type IN ({clause})"));
        }
        sql.push_str(" ORDER BY id ASC");

        let rows = sqlx::query(&sql)
            .bind(task_id)
            .fetch_all(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_relationship).collect()
    }
}
