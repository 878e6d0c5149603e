use std::path::Path;
use std::sync::Arc;

use shark_core::{
    error::{Result, SharkError},
    workflow::Workflow,
};
use shark_db::{
    FileAssignmentManager, Scheduler, SqliteDocumentRepository, SqliteEpicRepository,
    SqliteFeatureRepository, SqliteRelationshipRepository, SqliteTaskRepository, StatusCascade,
    Store,
};

/// Everything a command handler needs: the store adapter, the loaded
/// workflow, and one repository/engine instance per subsystem. Built once
/// per invocation.
pub struct AppContext {
    pub store: Store,
    pub workflow: Arc<Workflow>,
    pub epics: SqliteEpicRepository,
    pub features: SqliteFeatureRepository,
    pub tasks: SqliteTaskRepository,
    pub relationships: SqliteRelationshipRepository,
    pub documents: SqliteDocumentRepository,
    pub files: FileAssignmentManager,
    pub cascade: StatusCascade,
    pub scheduler: Scheduler,
}

impl AppContext {
    pub async fn initialize(database_url: &str) -> Result<Self> {
        let raw = database_url
            .strip_prefix("sqlite://")
            .unwrap_or(database_url);
        if !raw.starts_with(":memory:") {
            if let Some(parent) = Path::new(raw).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        SharkError::store(format!(
                            "cannot create store directory {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
            }
        }

        let store = Store::open(database_url).await?;
        store.migrate().await?;
        let workflow = Arc::new(Workflow::load(Path::new("."))?);

        Ok(Self {
            epics: SqliteEpicRepository::new(store.clone(), workflow.clone()),
            features: SqliteFeatureRepository::new(store.clone(), workflow.clone()),
            tasks: SqliteTaskRepository::new(store.clone(), workflow.clone()),
            relationships: SqliteRelationshipRepository::new(store.clone()),
            documents: SqliteDocumentRepository::new(store.clone()),
            files: FileAssignmentManager::new(store.clone()),
            cascade: StatusCascade::new(store.clone(), workflow.clone()),
            scheduler: Scheduler::new(store.clone(), workflow.clone()),
            store,
            workflow,
        })
    }
}
