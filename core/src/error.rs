use thiserror::Error;

/// Result type alias for planning-engine operations
pub type Result<T> = std::result::Result<T, SharkError>;

/// Error types for the work-planning engine.
///
/// Every failure mode in the system maps to one of these variants, and each
/// variant maps to a process exit code so the command surface stays stable
/// for scripted callers.
///
/// # Examples
///
/// ```rust
/// use shark_core::error::SharkError;
///
/// let not_found = SharkError::not_found("task", "T-E01-F01-001");
/// assert!(not_found.is_not_found());
/// assert_eq!(not_found.exit_code(), 1);
///
/// let invalid = SharkError::invalid_transition("completed", "in_progress");
/// assert_eq!(invalid.exit_code(), 3);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharkError {
    /// Entity missing by key or id
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Key format, path rules, missing reason, bad field value
    #[error("Validation failed for {field}: {rule}")]
    Validation { field: String, rule: String },

    /// Duplicate key, duplicate relationship, file already claimed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Workflow disallows the transition
    #[error("Invalid status transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    /// Backward transition attempted without a reason and without force
    #[error("Moving from '{from}' back to '{to}' requires a reason")]
    ReasonRequired { from: String, to: String },

    /// Relationship insertion would close a dependency cycle
    #[error("Relationship {from_key} -{relationship}-> {to_key} would create a cycle")]
    CycleDetected {
        from_key: String,
        to_key: String,
        relationship: String,
    },

    /// Underlying store or I/O failure
    #[error("Store error: {0}")]
    Store(String),

    /// Pre-force backup of the store file failed; the operation was aborted
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    /// Per-command deadline exceeded
    #[error("Operation timed out after {0}s")]
    Timeout(u64),
}

impl SharkError {
    /// Create a not-found error for an entity kind and key
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Create a validation error for a field and the rule it broke
    pub fn validation(field: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            rule: rule.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an invalid-transition error
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a reason-required error for a backward transition
    pub fn reason_required(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::ReasonRequired {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Check if this error indicates a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(self, SharkError::NotFound { .. })
    }

    /// Check if this error indicates a validation problem
    pub fn is_validation(&self) -> bool {
        matches!(self, SharkError::Validation { .. })
    }

    /// Check if this error indicates a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, SharkError::Conflict(_))
    }

    /// Map the error to the process exit code contract:
    /// 1 user error, 2 store/backup/timeout, 3 invalid state transition.
    pub fn exit_code(&self) -> i32 {
        match self {
            SharkError::NotFound { .. }
            | SharkError::Validation { .. }
            | SharkError::Conflict(_)
            | SharkError::CycleDetected { .. } => 1,
            SharkError::Store(_) | SharkError::BackupFailed(_) | SharkError::Timeout(_) => 2,
            SharkError::InvalidTransition { .. } | SharkError::ReasonRequired { .. } => 3,
        }
    }

    /// Machine-readable error kind for the JSON error envelope
    pub fn kind(&self) -> &'static str {
        match self {
            SharkError::NotFound { .. } => "not_found",
            SharkError::Validation { .. } => "validation",
            SharkError::Conflict(_) => "conflict",
            SharkError::InvalidTransition { .. } => "invalid_transition",
            SharkError::ReasonRequired { .. } => "reason_required",
            SharkError::CycleDetected { .. } => "cycle_detected",
            SharkError::Store(_) => "store",
            SharkError::BackupFailed(_) => "backup_failed",
            SharkError::Timeout(_) => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(SharkError::not_found("epic", "E01").exit_code(), 1);
        assert_eq!(SharkError::validation("key", "bad format").exit_code(), 1);
        assert_eq!(SharkError::conflict("duplicate key").exit_code(), 1);
        assert_eq!(
            SharkError::CycleDetected {
                from_key: "T-E01-F01-001".into(),
                to_key: "T-E01-F01-002".into(),
                relationship: "depends_on".into(),
            }
            .exit_code(),
            1
        );
        assert_eq!(
            SharkError::invalid_transition("todo", "completed").exit_code(),
            3
        );
        assert_eq!(
            SharkError::reason_required("ready_for_review", "in_progress").exit_code(),
            3
        );
        assert_eq!(SharkError::store("disk full").exit_code(), 2);
        assert_eq!(SharkError::BackupFailed("copy failed".into()).exit_code(), 2);
        assert_eq!(SharkError::Timeout(30).exit_code(), 2);
    }

    #[test]
    fn test_error_display() {
        let error = SharkError::not_found("task", "T-E01-F01-001");
        assert_eq!(format!("{error}"), "task not found: T-E01-F01-001");

        let error = SharkError::invalid_transition("todo", "completed");
        assert_eq!(
            format!("{error}"),
            "Invalid status transition from 'todo' to 'completed'"
        );

        let error = SharkError::reason_required("ready_for_review", "in_progress");
        assert_eq!(
            format!("{error}"),
            "Moving from 'ready_for_review' back to 'in_progress' requires a reason"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(SharkError::not_found("feature", "E01-F01").is_not_found());
        assert!(!SharkError::conflict("x").is_not_found());

        assert!(SharkError::validation("path", "absolute").is_validation());
        assert!(SharkError::conflict("x").is_conflict());
    }
}
