//! SQLite persistence for the shark work-planning system.
//!
//! This crate implements the repository traits from `shark-core` on top of
//! sqlx/SQLite and hosts the engine pieces that need the store: the status
//! cascade, the dependency-aware scheduler, the relationship graph, and the
//! cross-entity file-assignment rules.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shark_core::workflow::Workflow;
//! use shark_db::{SqliteTaskRepository, Store};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open("sqlite://shark.sqlite").await?;
//! store.migrate().await?;
//! let workflow = Arc::new(Workflow::default());
//! let tasks = SqliteTaskRepository::new(store.clone(), workflow);
//! # Ok(())
//! # }
//! ```

mod cascade;
mod common;
mod documents;
mod epics;
mod features;
mod files;
mod history;
mod notes;
mod relationships;
mod scheduler;
mod sessions;
mod store;
mod tasks;

#[cfg(test)]
mod testing;

pub use cascade::StatusCascade;
pub use documents::SqliteDocumentRepository;
pub use epics::SqliteEpicRepository;
pub use features::SqliteFeatureRepository;
pub use files::{FileAssignmentManager, FileClaim};
pub use relationships::SqliteRelationshipRepository;
pub use scheduler::{NextFilters, Scheduler};
pub use store::Store;
pub use tasks::SqliteTaskRepository;

// Re-export commonly used types from shark-core for convenience
pub use shark_core::{
    error::{Result, SharkError},
    models::{Epic, Feature, Task, TaskFilter},
    repository::{
        DocumentRepository, EpicRepository, FeatureRepository, RelationshipRepository,
        TaskRepository, Transition, TransitionRequest,
    },
};
