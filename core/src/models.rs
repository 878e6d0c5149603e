use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SharkError};

/// Entity kinds that can appear in cross-entity operations
/// (file-path collision reports, document links, cascade results).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Epic,
    Feature,
    Task,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Epic => "epic",
            EntityKind::Feature => "feature",
            EntityKind::Task => "task",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Epic priority. Tasks use a numeric 1-10 scale instead; epics keep the
/// coarse three-step scale used for roadmap triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(SharkError::validation(
                "priority",
                format!("'{s}' is not one of low, medium, high"),
            )),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top level of the work hierarchy.
///
/// An epic groups features under a business goal. Its status is normally
/// derived from its features; `status_override` pins a manually set status
/// until calculation is explicitly re-enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    /// Auto-increment primary key
    pub id: i64,
    /// Human identifier, `E` + two digits (e.g. "E01")
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    /// Derived from features unless `status_override` is set
    pub status: String,
    pub priority: Priority,
    pub business_value: Option<String>,
    /// Path of the epic's description file, relative to the project root
    pub file_path: Option<String>,
    pub slug: Option<String>,
    /// When true the stored status is authoritative and the calculator skips
    /// this epic
    pub status_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Middle level of the work hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Auto-increment primary key
    pub id: i64,
    /// Human identifier, epic key + feature ordinal (e.g. "E01-F02")
    pub key: String,
    pub epic_id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Derived from tasks unless `status_override` is set
    pub status: String,
    /// 100 × completed tasks / max(1, tasks); stored raw, rounded for display
    pub progress_pct: f64,
    /// Optional scheduling lane; lower runs first, equal values run together
    pub execution_order: Option<i64>,
    pub file_path: Option<String>,
    pub status_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Leaf of the work hierarchy: the unit of schedulable work.
///
/// Status values come from the loaded workflow, not from an enum; the
/// repository recognizes the well-known names (`todo`, `in_progress`,
/// `ready_for_review`, `completed`, `blocked`, `archived`) for timestamp and
/// session side effects and treats everything else generically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Auto-increment primary key
    pub id: i64,
    /// Human identifier, `T-` + feature key + task ordinal
    /// (e.g. "T-E01-F02-003")
    pub key: String,
    pub feature_id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Current workflow status
    pub status: String,
    /// 1 = highest, 10 = lowest
    pub priority: i64,
    /// Kind of agent suited to the task (e.g. "developer", "reviewer")
    pub agent_type: Option<String>,
    /// Concrete agent the task is assigned to
    pub assigned_agent: Option<String>,
    /// Legacy dependency list of task keys; migration-time source only, the
    /// explicit relationship edges are authoritative
    pub depends_on: Vec<String>,
    /// Optional scheduling lane; lower runs first, equal values run together
    pub execution_order: Option<i64>,
    pub file_path: Option<String>,
    pub blocked_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub blocked_at: Option<DateTime<Utc>>,
    /// Number of backward transitions taken with a rejection reason;
    /// monotonically non-decreasing
    pub rejection_count: i64,
    /// Free-form JSON payload agents attach to carry context between sessions
    pub context_data: Option<serde_json::Value>,
    pub completed_by: Option<String>,
    pub tests_passed: bool,
    pub verification_status: VerificationStatus,
    /// JSON array of file paths touched while completing the task
    pub files_changed: Option<serde_json::Value>,
    pub completion_notes: Option<String>,
    pub time_spent_minutes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Verification state of a completed task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            _ => Err(SharkError::validation(
                "verification_status",
                format!("'{s}' is not one of pending, verified"),
            )),
        }
    }
}

/// Append-only audit row recording one status transition.
///
/// `from_status` is None for the row written at task creation, so a task
/// always has exactly one more history row than applied status changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub id: i64,
    pub task_id: i64,
    pub from_status: Option<String>,
    pub to_status: String,
    pub agent: Option<String>,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Kinds of notes that can be attached to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    General,
    /// Written automatically when a backward transition carries a reason
    Rejection,
}

impl NoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteType::General => "general",
            NoteType::Rejection => "rejection",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "general" => Ok(NoteType::General),
            "rejection" => Ok(NoteType::Rejection),
            _ => Err(SharkError::validation(
                "note_type",
                format!("'{s}' is not one of general, rejection"),
            )),
        }
    }
}

/// Timestamped note attached to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNote {
    pub id: i64,
    pub task_id: i64,
    pub note_type: NoteType,
    pub content: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome recorded when a work session is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    Completed,
    Blocked,
    Abandoned,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Blocked => "blocked",
            SessionOutcome::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "completed" => Ok(SessionOutcome::Completed),
            "blocked" => Ok(SessionOutcome::Blocked),
            "abandoned" => Ok(SessionOutcome::Abandoned),
            _ => Err(SharkError::validation(
                "outcome",
                format!("'{s}' is not one of completed, blocked, abandoned"),
            )),
        }
    }
}

/// Work session on a task. At most one session per task may be open
/// (`ended_at IS NULL`) at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: i64,
    pub task_id: i64,
    pub agent_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<SessionOutcome>,
    pub session_notes: Option<String>,
}

/// Typed edge kinds between tasks.
///
/// `DependsOn` and `Blocks` participate in cycle detection and scheduling;
/// the rest are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    DependsOn,
    Blocks,
    RelatedTo,
    Follows,
    SpawnedFrom,
    Duplicates,
    References,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::DependsOn => "depends_on",
            RelationshipType::Blocks => "blocks",
            RelationshipType::RelatedTo => "related_to",
            RelationshipType::Follows => "follows",
            RelationshipType::SpawnedFrom => "spawned_from",
            RelationshipType::Duplicates => "duplicates",
            RelationshipType::References => "references",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "depends_on" => Ok(RelationshipType::DependsOn),
            "blocks" => Ok(RelationshipType::Blocks),
            "related_to" => Ok(RelationshipType::RelatedTo),
            "follows" => Ok(RelationshipType::Follows),
            "spawned_from" => Ok(RelationshipType::SpawnedFrom),
            "duplicates" => Ok(RelationshipType::Duplicates),
            "references" => Ok(RelationshipType::References),
            _ => Err(SharkError::validation(
                "relationship",
                format!("'{s}' is not a known relationship type"),
            )),
        }
    }

    /// Edge types that must stay acyclic
    pub fn is_dependency(&self) -> bool {
        matches!(self, RelationshipType::DependsOn | RelationshipType::Blocks)
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed typed edge between two tasks, unique on
/// `(from_task_id, to_task_id, relationship)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRelationship {
    pub id: i64,
    pub from_task_id: i64,
    pub to_task_id: i64,
    pub relationship: RelationshipType,
    pub created_at: DateTime<Utc>,
}

/// Standalone document linkable to any number of epics, features, and tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- creation DTOs ---

/// Data for creating an epic. `key` defaults to the next free ordinal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEpic {
    pub key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub business_value: Option<String>,
    pub file_path: Option<String>,
    pub slug: Option<String>,
}

/// Data for creating a feature under an epic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeature {
    pub epic_id: i64,
    pub key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub execution_order: Option<i64>,
    pub file_path: Option<String>,
}

/// Data for creating a task under a feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub feature_id: i64,
    pub key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    /// 1 = highest, 10 = lowest; defaults to 5
    pub priority: Option<i64>,
    pub agent_type: Option<String>,
    pub assigned_agent: Option<String>,
    pub depends_on: Vec<String>,
    pub execution_order: Option<i64>,
    pub file_path: Option<String>,
}

impl NewTask {
    pub fn new(feature_id: i64, title: impl Into<String>) -> Self {
        Self {
            feature_id,
            key: None,
            title: title.into(),
            description: None,
            priority: None,
            agent_type: None,
            assigned_agent: None,
            depends_on: vec![],
            execution_order: None,
            file_path: None,
        }
    }
}

// --- update DTOs ---

/// Field updates for an epic; only `Some` fields are written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEpic {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub business_value: Option<String>,
    pub slug: Option<String>,
}

/// Field updates for a feature; only `Some` fields are written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFeature {
    pub title: Option<String>,
    pub description: Option<String>,
    pub execution_order: Option<Option<i64>>,
}

/// Field updates for a task; only `Some` fields are written.
///
/// Status changes do NOT go through here; they use the repository's
/// `update_status` path so history, sessions, and the cascade fire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub agent_type: Option<String>,
    pub assigned_agent: Option<String>,
    pub depends_on: Option<Vec<String>>,
    pub execution_order: Option<Option<i64>>,
    pub context_data: Option<serde_json::Value>,
}

/// Completion metadata recorded when work on a task is signed off
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    pub completed_by: Option<String>,
    pub tests_passed: bool,
    pub verification_status: VerificationStatus,
    pub files_changed: Option<serde_json::Value>,
    pub completion_notes: Option<String>,
    pub time_spent_minutes: Option<i64>,
}

/// Filter criteria for querying tasks; fields combine with AND
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub epic_key: Option<String>,
    pub feature_id: Option<i64>,
    pub assigned_agent: Option<String>,
    /// Keep tasks with priority <= this value (1 = highest)
    pub max_priority: Option<i64>,
    pub limit: Option<u32>,
}

/// One row of a feature's status breakdown, in workflow order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBreakdown {
    pub status: String,
    pub count: i64,
    pub phase: Option<String>,
}

/// Result of one parent-status recalculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub entity_type: EntityKind,
    pub entity_key: String,
    pub previous_status: String,
    pub new_status: String,
    pub was_changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_round_trip() {
        for p in [Priority::Low, Priority::Medium, Priority::High] {
            assert_eq!(Priority::parse(p.as_str()).unwrap(), p);
        }
        assert!(Priority::parse("urgent").is_err());
    }

    #[test]
    fn test_relationship_type_round_trip() {
        let all = [
            RelationshipType::DependsOn,
            RelationshipType::Blocks,
            RelationshipType::RelatedTo,
            RelationshipType::Follows,
            RelationshipType::SpawnedFrom,
            RelationshipType::Duplicates,
            RelationshipType::References,
        ];
        for r in all {
            assert_eq!(RelationshipType::parse(r.as_str()).unwrap(), r);
        }
        assert!(RelationshipType::parse("sibling_of").is_err());
    }

    #[test]
    fn test_dependency_types() {
        assert!(RelationshipType::DependsOn.is_dependency());
        assert!(RelationshipType::Blocks.is_dependency());
        assert!(!RelationshipType::RelatedTo.is_dependency());
        assert!(!RelationshipType::References.is_dependency());
    }

    #[test]
    fn test_session_outcome_parse() {
        assert_eq!(
            SessionOutcome::parse("completed").unwrap(),
            SessionOutcome::Completed
        );
        assert_eq!(
            SessionOutcome::parse("abandoned").unwrap(),
            SessionOutcome::Abandoned
        );
        assert!(SessionOutcome::parse("done").is_err());
    }

    #[test]
    fn test_entity_kind_serde() {
        assert_eq!(
            serde_json::to_string(&EntityKind::Feature).unwrap(),
            "\"feature\""
        );
        assert_eq!(EntityKind::Task.to_string(), "task");
    }
}
