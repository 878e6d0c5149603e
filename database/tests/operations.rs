//! End-to-end tests over the full persistence stack: repositories, cascade,
//! scheduler, and file assignment working against one store.

use std::sync::Arc;

use shark_core::{
    models::{EntityKind, NewEpic, NewFeature, NewTask},
    repository::{
        EpicRepository, FeatureRepository, RelationshipRepository, TaskRepository,
        TransitionRequest,
    },
    workflow::Workflow,
    RelationshipType,
};
use shark_db::{
    FileAssignmentManager, NextFilters, Scheduler, SqliteEpicRepository, SqliteFeatureRepository,
    SqliteRelationshipRepository, SqliteTaskRepository, StatusCascade, Store,
};

struct Harness {
    store: Store,
    epics: SqliteEpicRepository,
    features: SqliteFeatureRepository,
    tasks: SqliteTaskRepository,
    relationships: SqliteRelationshipRepository,
    cascade: StatusCascade,
    scheduler: Scheduler,
}

impl Harness {
    async fn open(url: &str) -> Self {
        let store = Store::open(url).await.unwrap();
        store.migrate().await.unwrap();
        let workflow = Arc::new(Workflow::default());
        Self {
            epics: SqliteEpicRepository::new(store.clone(), workflow.clone()),
            features: SqliteFeatureRepository::new(store.clone(), workflow.clone()),
            tasks: SqliteTaskRepository::new(store.clone(), workflow.clone()),
            relationships: SqliteRelationshipRepository::new(store.clone()),
            cascade: StatusCascade::new(store.clone(), workflow.clone()),
            scheduler: Scheduler::new(store.clone(), workflow),
            store,
        }
    }

    async fn memory() -> Self {
        Self::open(":memory:").await
    }

    async fn seed_feature(&self, epic_key: &str, feature_key: &str) -> (i64, i64) {
        let epic = self
            .epics
            .create(NewEpic {
                key: Some(epic_key.to_string()),
                title: format!("{epic_key} epic"),
                ..Default::default()
            })
            .await
            .unwrap();
        let feature = self
            .features
            .create(NewFeature {
                epic_id: epic.id,
                key: Some(feature_key.to_string()),
                title: format!("{feature_key} feature"),
                description: None,
                execution_order: None,
                file_path: None,
            })
            .await
            .unwrap();
        (epic.id, feature.id)
    }

    /// Drive a task through the forward path and cascade after each step,
    /// the way the dispatch layer does.
    async fn approve_task(&self, task_id: i64, feature_id: i64) {
        for status in ["in_progress", "ready_for_review", "completed"] {
            self.tasks
                .update_status(task_id, status, TransitionRequest::default())
                .await
                .unwrap();
            self.cascade.cascade_from_feature(feature_id).await.unwrap();
        }
    }
}

#[tokio::test]
async fn task_lifecycle_updates_feature_and_epic() {
    let h = Harness::memory().await;
    let (epic_id, feature_id) = h.seed_feature("E01", "F01").await;

    let task = h
        .tasks
        .create(NewTask::new(feature_id, "Login"))
        .await
        .unwrap();
    assert_eq!(task.key, "T-E01-F01-001");
    assert_eq!(task.status, "todo");

    let started = h
        .tasks
        .update_status(task.id, "in_progress", TransitionRequest::default())
        .await
        .unwrap();
    assert!(started.task.started_at.is_some());
    assert_eq!(started.action.as_ref().unwrap().action, "implement");
    h.cascade.cascade_from_feature(feature_id).await.unwrap();

    let feature = h.features.get_by_id(feature_id).await.unwrap().unwrap();
    assert_eq!(feature.status, "active");

    h.tasks
        .update_status(task.id, "ready_for_review", TransitionRequest::default())
        .await
        .unwrap();
    let approved = h
        .tasks
        .update_status(task.id, "completed", TransitionRequest::default())
        .await
        .unwrap();
    assert!(approved.task.completed_at.is_some());
    let changes = h.cascade.cascade_from_feature(feature_id).await.unwrap();

    let feature = h.features.get_by_id(feature_id).await.unwrap().unwrap();
    assert_eq!(feature.status, "completed");
    assert_eq!(feature.progress_pct, 100.0);
    let epic = h.epics.get_by_id(epic_id).await.unwrap().unwrap();
    assert_eq!(epic.status, "completed");

    assert!(changes.iter().all(|c| c.was_changed));
    assert_eq!(changes.len(), 2);

    let history = h.tasks.history(task.id).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[1].from_status.as_deref(), Some("todo"));
    assert_eq!(history[1].to_status, "in_progress");
}

#[tokio::test]
async fn completing_both_features_completes_the_epic() {
    let h = Harness::memory().await;
    let epic = h
        .epics
        .create(NewEpic {
            key: Some("E02".into()),
            title: "Two features".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut feature_ids = vec![];
    for key in ["F01", "F02"] {
        let feature = h
            .features
            .create(NewFeature {
                epic_id: epic.id,
                key: Some(key.to_string()),
                title: key.to_string(),
                description: None,
                execution_order: None,
                file_path: None,
            })
            .await
            .unwrap();
        for title in ["a", "b"] {
            h.tasks
                .create(NewTask::new(feature.id, title))
                .await
                .unwrap();
        }
        feature_ids.push(feature.id);
    }

    let mut last_changes = vec![];
    for &feature_id in &feature_ids {
        for task in h.tasks.list_by_feature(feature_id).await.unwrap() {
            for status in ["in_progress", "ready_for_review", "completed"] {
                h.tasks
                    .update_status(task.id, status, TransitionRequest::default())
                    .await
                    .unwrap();
            }
            last_changes = h.cascade.cascade_from_feature(feature_id).await.unwrap();
        }
    }

    for &feature_id in &feature_ids {
        let feature = h.features.get_by_id(feature_id).await.unwrap().unwrap();
        assert_eq!(feature.status, "completed");
    }
    let epic = h.epics.get_by_id(epic.id).await.unwrap().unwrap();
    assert_eq!(epic.status, "completed");

    // the final approval flipped its feature and then the epic
    assert_eq!(last_changes.len(), 2);
    assert_eq!(last_changes[0].entity_type, EntityKind::Feature);
    assert!(last_changes[0].was_changed);
    assert_eq!(last_changes[1].entity_type, EntityKind::Epic);
    assert!(last_changes[1].was_changed);
    assert_eq!(last_changes[1].new_status, "completed");
}

#[tokio::test]
async fn override_round_trip_restores_calculated_status() {
    let h = Harness::memory().await;
    let (_epic_id, feature_id) = h.seed_feature("E01", "F01").await;
    let task = h
        .tasks
        .create(NewTask::new(feature_id, "Only task"))
        .await
        .unwrap();
    h.approve_task(task.id, feature_id).await;

    h.features
        .set_status(feature_id, "draft", true)
        .await
        .unwrap();
    let pinned = h.cascade.recalculate_feature(feature_id).await.unwrap();
    assert!(!pinned.was_changed);
    assert_eq!(
        h.features.get_by_id(feature_id).await.unwrap().unwrap().status,
        "draft"
    );

    h.features
        .set_status_override(feature_id, false)
        .await
        .unwrap();
    let restored = h.cascade.recalculate_feature(feature_id).await.unwrap();
    assert!(restored.was_changed);
    assert_eq!(restored.new_status, "completed");
}

#[tokio::test]
async fn cycle_rejection_leaves_store_unchanged() {
    let h = Harness::memory().await;
    let (_epic_id, feature_id) = h.seed_feature("E01", "F01").await;
    let t1 = h.tasks.create(NewTask::new(feature_id, "T1")).await.unwrap();
    let t2 = h.tasks.create(NewTask::new(feature_id, "T2")).await.unwrap();

    h.relationships
        .create(t1.id, t2.id, RelationshipType::DependsOn)
        .await
        .unwrap();
    let err = h
        .relationships
        .create(t2.id, t1.id, RelationshipType::DependsOn)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        shark_core::SharkError::CycleDetected { .. }
    ));

    let outgoing = h.relationships.get_outgoing(t2.id, None).await.unwrap();
    assert!(outgoing.is_empty());
}

#[tokio::test]
async fn scheduler_sees_only_satisfied_dependencies() {
    let h = Harness::memory().await;
    let (_epic_id, feature_id) = h.seed_feature("E01", "F01").await;

    let first = h.tasks.create(NewTask::new(feature_id, "first")).await.unwrap();
    let second = h.tasks.create(NewTask::new(feature_id, "second")).await.unwrap();
    h.relationships
        .create(second.id, first.id, RelationshipType::DependsOn)
        .await
        .unwrap();

    let next = h.scheduler.next_available(NextFilters::default()).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].id, first.id);

    h.approve_task(first.id, feature_id).await;
    let next = h.scheduler.next_available(NextFilters::default()).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].id, second.id);

    h.approve_task(second.id, feature_id).await;
    // nothing left is an empty result, not an error
    let next = h.scheduler.next_available(NextFilters::default()).await.unwrap();
    assert!(next.is_empty());
}

#[tokio::test]
async fn force_reassigning_a_file_backs_up_and_moves_the_claim() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("shark.sqlite");
    let h = Harness::open(&format!("sqlite://{}", db_path.display())).await;
    let (epic_id, _feature_id) = h.seed_feature("E01", "F01").await;

    let other = h
        .features
        .create(NewFeature {
            epic_id,
            key: Some("F02".into()),
            title: "Other".into(),
            description: None,
            execution_order: None,
            file_path: Some("docs/a.md".into()),
        })
        .await
        .unwrap();

    let manager = FileAssignmentManager::new(h.store.clone());
    let claim = manager.detect_collision("docs/a.md").await.unwrap().unwrap();
    assert_eq!(claim.kind, EntityKind::Feature);
    assert_eq!(claim.entity_key, "E01-F02");

    let first = h.features.get_by_key("E01-F01").await.unwrap().unwrap();
    let err = manager
        .assign(EntityKind::Feature, first.id, "docs/a.md", false)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let backup = manager
        .assign(EntityKind::Feature, first.id, "docs/a.md", true)
        .await
        .unwrap()
        .unwrap();
    assert!(backup.exists());

    let reassigned = h.features.get_by_key("E01-F01").await.unwrap().unwrap();
    assert_eq!(reassigned.file_path.as_deref(), Some("docs/a.md"));
    let previous = h.features.get_by_id(other.id).await.unwrap().unwrap();
    assert!(previous.file_path.is_none());
}

#[tokio::test]
async fn feature_force_complete_closes_sessions_and_cascades() {
    let h = Harness::memory().await;
    let (epic_id, feature_id) = h.seed_feature("E03", "F01").await;

    let a = h.tasks.create(NewTask::new(feature_id, "a")).await.unwrap();
    let b = h.tasks.create(NewTask::new(feature_id, "b")).await.unwrap();
    h.tasks
        .update_status(b.id, "in_progress", TransitionRequest::default())
        .await
        .unwrap();
    h.tasks.resume(b.id, Some("dev-1")).await.unwrap();
    h.tasks.block(a.id, "waiting", None, false).await.unwrap();

    let touched = h
        .features
        .cascade_status_to_tasks(feature_id, "completed", Some("orchestrator"))
        .await
        .unwrap();
    assert_eq!(touched, 2);
    h.features
        .set_status(feature_id, "completed", false)
        .await
        .unwrap();
    h.cascade.cascade_from_feature(feature_id).await.unwrap();

    for id in [a.id, b.id] {
        let task = h.tasks.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, "completed");
        assert!(h.tasks.open_session(id).await.unwrap().is_none());
    }
    let feature = h.features.get_by_id(feature_id).await.unwrap().unwrap();
    assert_eq!(feature.status, "completed");
    assert_eq!(feature.progress_pct, 100.0);
    let epic = h.epics.get_by_id(epic_id).await.unwrap().unwrap();
    assert_eq!(epic.status, "completed");
}

#[tokio::test]
async fn blocked_task_surfaces_at_feature_level() {
    let h = Harness::memory().await;
    let (_epic_id, feature_id) = h.seed_feature("E01", "F01").await;
    let a = h.tasks.create(NewTask::new(feature_id, "a")).await.unwrap();
    h.tasks.create(NewTask::new(feature_id, "b")).await.unwrap();

    h.tasks.block(a.id, "vendor outage", None, false).await.unwrap();
    h.cascade.cascade_from_feature(feature_id).await.unwrap();
    assert_eq!(
        h.features.get_by_id(feature_id).await.unwrap().unwrap().status,
        "blocked"
    );

    h.tasks.unblock(a.id, None, false).await.unwrap();
    h.tasks
        .update_status(a.id, "in_progress", TransitionRequest::default())
        .await
        .unwrap();
    h.cascade.cascade_from_feature(feature_id).await.unwrap();
    assert_eq!(
        h.features.get_by_id(feature_id).await.unwrap().unwrap().status,
        "active"
    );
}

#[tokio::test]
async fn open_session_invariant_holds() {
    let h = Harness::memory().await;
    let (_epic_id, feature_id) = h.seed_feature("E01", "F01").await;
    let task = h.tasks.create(NewTask::new(feature_id, "a")).await.unwrap();

    let (_, first) = h.tasks.resume(task.id, Some("dev-1")).await.unwrap();
    // resuming again reuses the open session instead of opening a second
    let (_, second) = h.tasks.resume(task.id, Some("dev-2")).await.unwrap();
    assert_eq!(first.id, second.id);

    let sessions = h.tasks.sessions(task.id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions.iter().filter(|s| s.ended_at.is_none()).count(), 1);
}

#[tokio::test]
async fn custom_workflow_drives_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join(".sharkconfig.toml");
    std::fs::write(
        &config,
        r#"
            [[statuses]]
            name = "queued"
            phase = "development"
            initial = true

            [[statuses]]
            name = "doing"
            phase = "development"

            [[statuses]]
            name = "done"
            terminal = true

            [status_flow]
            queued = ["doing"]
            doing = ["done", "queued"]
            done = []
        "#,
    )
    .unwrap();
    let workflow = Arc::new(Workflow::load(dir.path()).unwrap());

    let store = Store::open(":memory:").await.unwrap();
    store.migrate().await.unwrap();
    let epics = SqliteEpicRepository::new(store.clone(), workflow.clone());
    let features = SqliteFeatureRepository::new(store.clone(), workflow.clone());
    let tasks = SqliteTaskRepository::new(store.clone(), workflow.clone());
    let cascade = StatusCascade::new(store.clone(), workflow.clone());

    let epic = epics
        .create(NewEpic {
            key: Some("E01".into()),
            title: "Custom".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let feature = features
        .create(NewFeature {
            epic_id: epic.id,
            key: Some("F01".into()),
            title: "Custom".into(),
            description: None,
            execution_order: None,
            file_path: None,
        })
        .await
        .unwrap();
    let task = tasks.create(NewTask::new(feature.id, "a")).await.unwrap();
    assert_eq!(task.status, "queued");

    tasks
        .update_status(task.id, "doing", TransitionRequest::default())
        .await
        .unwrap();
    cascade.cascade_from_feature(feature.id).await.unwrap();
    assert_eq!(
        features.get_by_id(feature.id).await.unwrap().unwrap().status,
        "active"
    );

    // "doing" back to "queued" is a declared backward step
    let err = tasks
        .update_status(task.id, "queued", TransitionRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, shark_core::SharkError::ReasonRequired { .. }));

    tasks
        .update_status(task.id, "done", TransitionRequest::default())
        .await
        .unwrap();
    cascade.cascade_from_feature(feature.id).await.unwrap();
    assert_eq!(
        features.get_by_id(feature.id).await.unwrap().unwrap().status,
        "completed"
    );
}
