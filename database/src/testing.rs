//! Shared fixtures for the crate's tests.

use std::sync::Arc;

use shark_core::{
    models::{Epic, Feature, NewEpic, NewFeature},
    repository::{EpicRepository, FeatureRepository},
    workflow::Workflow,
};

use crate::{epics::SqliteEpicRepository, features::SqliteFeatureRepository, store::Store};

pub(crate) async fn open_store() -> (Store, Arc<Workflow>) {
    let store = Store::open(":memory:").await.unwrap();
    store.migrate().await.unwrap();
    (store, Arc::new(Workflow::default()))
}

pub(crate) async fn seed_epic() -> (Store, Arc<Workflow>, Epic) {
    let (store, workflow) = open_store().await;
    let epic = SqliteEpicRepository::new(store.clone(), workflow.clone())
        .create(NewEpic {
            key: Some("E01".into()),
            title: "Seed epic".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    (store, workflow, epic)
}

pub(crate) async fn seed_feature() -> (Store, Arc<Workflow>, Epic, Feature) {
    let (store, workflow, epic) = seed_epic().await;
    let feature = SqliteFeatureRepository::new(store.clone(), workflow.clone())
        .create(NewFeature {
            epic_id: epic.id,
            key: Some("F01".into()),
            title: "Seed feature".into(),
            description: None,
            execution_order: None,
            file_path: None,
        })
        .await
        .unwrap();
    (store, workflow, epic, feature)
}
