//! Shark Core Library
//!
//! Foundational domain models, workflow engine, and trait interfaces for the
//! shark work-planning system. All other crates depend on the types and
//! interfaces defined here; nothing in this crate performs I/O beyond
//! reading the workflow configuration file.
//!
//! # Architecture
//!
//! - [`models`] - Domain models (Epic, Feature, Task, relationships, …)
//! - [`error`] - Error taxonomy and exit-code mapping
//! - [`keys`] - Key grammar and normalization
//! - [`workflow`] - The configurable task state machine
//! - [`status`] - Parent-status derivation and progress rules
//! - [`schedule`] - Ordering rules for the next-available-task computation
//! - [`paths`] - Entity file-path validation
//! - [`repository`] - Repository traits implemented by the database crate
//!
//! # Example
//!
//! ```rust
//! use shark_core::workflow::{well_known, Workflow};
//!
//! let workflow = Workflow::default();
//! assert_eq!(workflow.initial_status(), well_known::TODO);
//! assert!(workflow
//!     .validate_transition(well_known::TODO, well_known::IN_PROGRESS, false, None)
//!     .is_ok());
//! ```

pub mod error;
pub mod keys;
pub mod models;
pub mod paths;
pub mod repository;
pub mod schedule;
pub mod status;
pub mod workflow;

// Re-export commonly used types at the crate root for convenience
pub use error::{Result, SharkError};
pub use keys::Keys;
pub use models::{
    CompletionMetadata, Document, EntityKind, Epic, Feature, NewEpic, NewFeature, NewTask,
    NoteType, Priority, RelationshipType, SessionOutcome, StatusBreakdown, StatusChange, Task,
    TaskFilter, TaskHistoryEntry, TaskNote, TaskRelationship, UpdateEpic, UpdateFeature,
    UpdateTask, VerificationStatus, WorkSession,
};
pub use repository::{
    DocumentRepository, EpicRepository, FeatureRepository, RelationshipRepository, TaskRepository,
    Transition, TransitionRequest,
};
pub use workflow::{OrchestratorAction, StatusDef, Workflow};

/// Current version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_re_exports() {
        let workflow = Workflow::default();
        assert_eq!(workflow.initial_status(), "todo");

        let error = SharkError::not_found("task", "T-E01-F01-001");
        assert!(error.is_not_found());
        assert!(!VERSION.is_empty());
    }
}
