use std::collections::HashMap;
use std::sync::Arc;

use shark_core::{
    error::Result,
    models::Task,
    schedule,
    workflow::Workflow,
};
use sqlx::{Row, Sqlite};

use crate::{
    common::{map_sqlx_err, row_to_task},
    store::Store,
};

/// Optional constraints on the next-available-task computation
#[derive(Debug, Clone, Default)]
pub struct NextFilters {
    pub epic_key: Option<String>,
    pub agent: Option<String>,
}

/// Dependency-aware scheduler: answers "what should be worked on next".
///
/// A candidate is a task sitting in the workflow's initial status whose
/// dependencies, from both the legacy `depends_on` list and explicit
/// `depends_on` edges, are all in a terminal status. Candidates are ordered
/// by execution lane, priority, and age; the head lane is returned whole so
/// equal-order tasks can run in parallel.
#[derive(Debug, Clone)]
pub struct Scheduler {
    store: Store,
    workflow: Arc<Workflow>,
}

impl Scheduler {
    pub fn new(store: Store, workflow: Arc<Workflow>) -> Self {
        Self { store, workflow }
    }

    pub async fn next_available(&self, filters: NextFilters) -> Result<Vec<Task>> {
        let candidates = self.candidates(&filters).await?;
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let status_by_key = self.task_statuses().await?;
        let edges_by_task = self.dependency_edges().await?;

        let mut available: Vec<Task> = Vec::new();
        for task in candidates {
            let mut dep_keys: Vec<&str> = task.depends_on.iter().map(String::as_str).collect();
            if let Some(edge_keys) = edges_by_task.get(&task.id) {
                dep_keys.extend(edge_keys.iter().map(String::as_str));
            }
            let ready = dep_keys.iter().all(|dep| {
                status_by_key
                    .get(*dep)
                    .map(|status| self.workflow.is_terminal(status))
                    .unwrap_or(false)
            });
            if ready {
                available.push(task);
            } else {
                tracing::debug!(task = %task.key, "skipped: dependencies unresolved");
            }
        }

        schedule::order_candidates(&mut available);
        Ok(schedule::head_group(available))
    }

    async fn candidates(&self, filters: &NextFilters) -> Result<Vec<Task>> {
        let columns = "t.id, t.key, t.feature_id, t.title, t.description, t.status, t.priority, \
            t.agent_type, t.assigned_agent, t.depends_on, t.execution_order, t.file_path, \
            t.blocked_reason, t.started_at, t.completed_at, t.blocked_at, t.rejection_count, \
            t.context_data, t.completed_by, t.tests_passed, t.verification_status, \
            t.files_changed, t.completion_notes, t.time_spent_minutes, t.created_at, t.updated_at";
        let mut builder: sqlx::QueryBuilder<Sqlite> = sqlx::QueryBuilder::new(format!(
            "SELECT {columns} FROM tasks t \
             JOIN features f ON t.feature_id = f.id \
             JOIN epics e ON f.epic_id = e.id \
             WHERE t.status = "
        ));
        builder.push_bind(self.workflow.initial_status().to_string());

        if let Some(epic_key) = &filters.epic_key {
            builder.push(" AND e.key = ").push_bind(epic_key.clone());
        }
        if let Some(agent) = &filters.agent {
            builder
                .push(" AND (t.assigned_agent IS NULL OR t.assigned_agent = ")
                .push_bind(agent.clone())
                .push(")");
        }

        let rows = builder
            .build()
            .fetch_all(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_task).collect()
    }

    async fn task_statuses(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, status FROM tasks")
            .fetch_all(self.store.pool())
            .await
            .map_err(map_sqlx_err)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("key"), row.get("status")))
            .collect())
    }

    async fn dependency_edges(&self) -> Result<HashMap<i64, Vec<String>>> {
        let rows = sqlx::query(
            "SELECT r.from_task_id, t.key AS dep_key FROM task_relationships r \
             JOIN tasks t ON r.to_task_id = t.id \
             WHERE r.relationship_type = 'depends_on'",
        )
        .fetch_all(self.store.pool())
        .await
        .map_err(map_sqlx_err)?;

        let mut edges: HashMap<i64, Vec<String>> = HashMap::new();
        for row in rows {
            edges
                .entry(row.get("from_task_id"))
                .or_default()
                .push(row.get("dep_key"));
        }
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::SqliteRelationshipRepository;
    use crate::tasks::SqliteTaskRepository;
    use crate::testing::seed_feature;
    use shark_core::models::{NewTask, RelationshipType};
    use shark_core::repository::{RelationshipRepository, TaskRepository, TransitionRequest};

    async fn make_task(
        tasks: &SqliteTaskRepository,
        feature_id: i64,
        title: &str,
        order: Option<i64>,
        priority: i64,
    ) -> Task {
        let mut new = NewTask::new(feature_id, title);
        new.execution_order = order;
        new.priority = Some(priority);
        tasks.create(new).await.unwrap()
    }

    async fn complete(tasks: &SqliteTaskRepository, id: i64) {
        for status in ["in_progress", "ready_for_review", "completed"] {
            tasks
                .update_status(id, status, TransitionRequest::default())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_lane_grouping_and_dependencies() {
        let (store, workflow, _epic, feature) = seed_feature().await;
        let tasks = SqliteTaskRepository::new(store.clone(), workflow.clone());
        let relationships = SqliteRelationshipRepository::new(store.clone());
        let scheduler = Scheduler::new(store, workflow);

        let a = make_task(&tasks, feature.id, "A", Some(1), 5).await;
        let b = make_task(&tasks, feature.id, "B", Some(1), 3).await;
        let c = make_task(&tasks, feature.id, "C", Some(2), 1).await;
        let d = make_task(&tasks, feature.id, "D", None, 1).await;
        relationships
            .create(d.id, a.id, RelationshipType::DependsOn)
            .await
            .unwrap();

        // the whole lowest lane, priority-sorted
        let next = scheduler.next_available(NextFilters::default()).await.unwrap();
        let keys: Vec<&str> = next.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec![b.key.as_str(), a.key.as_str()]);

        complete(&tasks, a.id).await;
        complete(&tasks, b.id).await;
        let next = scheduler.next_available(NextFilters::default()).await.unwrap();
        let keys: Vec<&str> = next.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec![c.key.as_str()]);

        complete(&tasks, c.id).await;
        let next = scheduler.next_available(NextFilters::default()).await.unwrap();
        let keys: Vec<&str> = next.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec![d.key.as_str()]);
    }

    #[tokio::test]
    async fn test_legacy_depends_on_field_counts() {
        let (store, workflow, _epic, feature) = seed_feature().await;
        let tasks = SqliteTaskRepository::new(store.clone(), workflow.clone());
        let scheduler = Scheduler::new(store, workflow);

        let a = make_task(&tasks, feature.id, "A", None, 1).await;
        let mut new = NewTask::new(feature.id, "B");
        new.depends_on = vec![a.key.clone()];
        new.priority = Some(1);
        tasks.create(new).await.unwrap();

        let next = scheduler.next_available(NextFilters::default()).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].key, a.key);

        complete(&tasks, a.id).await;
        let next = scheduler.next_available(NextFilters::default()).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].title, "B");
    }

    #[tokio::test]
    async fn test_missing_dependency_target_blocks() {
        let (store, workflow, _epic, feature) = seed_feature().await;
        let tasks = SqliteTaskRepository::new(store.clone(), workflow.clone());
        let scheduler = Scheduler::new(store, workflow);

        let mut new = NewTask::new(feature.id, "Orphaned");
        new.depends_on = vec!["T-E09-F09-001".to_string()];
        tasks.create(new).await.unwrap();

        let next = scheduler.next_available(NextFilters::default()).await.unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn test_agent_filter() {
        let (store, workflow, _epic, feature) = seed_feature().await;
        let tasks = SqliteTaskRepository::new(store.clone(), workflow.clone());
        let scheduler = Scheduler::new(store, workflow);

        let mut new = NewTask::new(feature.id, "Theirs");
        new.assigned_agent = Some("them".to_string());
        tasks.create(new).await.unwrap();
        let mine = make_task(&tasks, feature.id, "Unassigned", None, 1).await;

        let next = scheduler
            .next_available(NextFilters {
                agent: Some("me".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].key, mine.key);
    }
}
