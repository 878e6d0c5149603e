use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SharkError};

/// Well-known status names. The engine itself is config-driven; these names
/// only matter to repository side effects (timestamps, block fields, session
/// outcomes) when the loaded workflow declares them.
pub mod well_known {
    pub const TODO: &str = "todo";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const READY_FOR_REVIEW: &str = "ready_for_review";
    pub const COMPLETED: &str = "completed";
    pub const BLOCKED: &str = "blocked";
    pub const ARCHIVED: &str = "archived";
}

/// Group name that takes a status out of the declared forward order.
/// Transitions into or out of a hold status are never backward.
pub const HOLD_GROUP: &str = "hold";

/// Name of the workflow configuration file, looked up in the working
/// directory. Absent file → built-in default workflow.
pub const CONFIG_FILE_NAME: &str = ".sharkconfig.toml";

/// One status declaration in the workflow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDef {
    pub name: String,
    /// Phase label surfaced in status breakdowns (e.g. "development")
    #[serde(default)]
    pub phase: Option<String>,
    /// Ordering group; `"hold"` excludes the status from the forward order
    #[serde(default)]
    pub group: Option<String>,
    /// Entry status for new tasks and the unblock target
    #[serde(default)]
    pub initial: bool,
    /// Counts as done for parent-status calculation and scheduling
    #[serde(default)]
    pub terminal: bool,
}

impl StatusDef {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phase: None,
            group: None,
            initial: false,
            terminal: false,
        }
    }

    fn phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// Orchestrator action attached to a status: what an external agent should
/// do when a task lands there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorAction {
    pub action: String,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub instruction: String,
}

/// On-disk shape of `.sharkconfig.toml`
#[derive(Debug, Deserialize)]
struct WorkflowFile {
    statuses: Vec<StatusDef>,
    status_flow: HashMap<String, Vec<String>>,
    #[serde(default)]
    actions: HashMap<String, OrchestratorAction>,
}

/// The configurable task state machine.
///
/// Loaded once per process and shared read-only. Validates transitions,
/// answers backwardness queries against the declared forward order, and
/// hands out the orchestrator action for a status.
#[derive(Debug, Clone)]
pub struct Workflow {
    statuses: Vec<StatusDef>,
    index: HashMap<String, usize>,
    flow: HashMap<String, Vec<String>>,
    actions: HashMap<String, OrchestratorAction>,
    /// Status names participating in the forward order (hold group excluded),
    /// in declaration order
    forward_order: Vec<String>,
}

impl Workflow {
    /// Load the workflow for a project directory: `.sharkconfig.toml` if
    /// present, the built-in default otherwise.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load a workflow definition from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SharkError::store(format!("cannot read {}: {e}", path.display())))?;
        let file: WorkflowFile = toml::from_str(&raw).map_err(|e| {
            SharkError::validation("workflow config", format!("{}: {e}", path.display()))
        })?;
        Self::from_definition(file.statuses, file.status_flow, file.actions)
    }

    fn from_definition(
        statuses: Vec<StatusDef>,
        flow: HashMap<String, Vec<String>>,
        actions: HashMap<String, OrchestratorAction>,
    ) -> Result<Self> {
        if statuses.is_empty() {
            return Err(SharkError::validation(
                "workflow config",
                "at least one status is required",
            ));
        }
        let mut index = HashMap::new();
        for (i, def) in statuses.iter().enumerate() {
            if index.insert(def.name.clone(), i).is_some() {
                return Err(SharkError::validation(
                    "workflow config",
                    format!("status '{}' declared twice", def.name),
                ));
            }
        }
        for (from, nexts) in &flow {
            if !index.contains_key(from) {
                return Err(SharkError::validation(
                    "workflow config",
                    format!("status_flow references unknown status '{from}'"),
                ));
            }
            for next in nexts {
                if !index.contains_key(next) {
                    return Err(SharkError::validation(
                        "workflow config",
                        format!("status_flow '{from}' references unknown status '{next}'"),
                    ));
                }
            }
        }
        for status in actions.keys() {
            if !index.contains_key(status) {
                return Err(SharkError::validation(
                    "workflow config",
                    format!("actions reference unknown status '{status}'"),
                ));
            }
        }
        let forward_order = statuses
            .iter()
            .filter(|s| s.group.as_deref() != Some(HOLD_GROUP))
            .map(|s| s.name.clone())
            .collect();
        Ok(Self {
            statuses,
            index,
            flow,
            actions,
            forward_order,
        })
    }

    /// All declared statuses in order
    pub fn statuses(&self) -> &[StatusDef] {
        &self.statuses
    }

    /// Whether the workflow declares this status
    pub fn contains(&self, status: &str) -> bool {
        self.index.contains_key(status)
    }

    /// The entry status for new tasks: the first status flagged `initial`,
    /// or the first declared status.
    pub fn initial_status(&self) -> &str {
        self.statuses
            .iter()
            .find(|s| s.initial)
            .unwrap_or(&self.statuses[0])
            .name
            .as_str()
    }

    /// Legal successors of a status per `status_flow`
    pub fn allowed_next(&self, from: &str) -> &[String] {
        self.flow.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when `to` precedes `from` in the declared forward order.
    /// Hold-group statuses have no position, so transitions involving them
    /// are never backward.
    pub fn is_backward(&self, from: &str, to: &str) -> bool {
        let pos = |s: &str| self.forward_order.iter().position(|n| n == s);
        match (pos(from), pos(to)) {
            (Some(f), Some(t)) => t < f,
            _ => false,
        }
    }

    /// Whether a status counts as done
    pub fn is_terminal(&self, status: &str) -> bool {
        self.def(status).map(|d| d.terminal).unwrap_or(false)
    }

    /// Whether a status sits in the hold group (e.g. `blocked`)
    pub fn is_hold(&self, status: &str) -> bool {
        self.def(status)
            .map(|d| d.group.as_deref() == Some(HOLD_GROUP))
            .unwrap_or(false)
    }

    /// Whether a status is an entry status
    pub fn is_initial(&self, status: &str) -> bool {
        self.def(status).map(|d| d.initial).unwrap_or(false)
    }

    /// Phase label of a status, if declared
    pub fn phase_of(&self, status: &str) -> Option<&str> {
        self.def(status).and_then(|d| d.phase.as_deref())
    }

    /// Declaration position of a status, for workflow-ordered listings
    pub fn position(&self, status: &str) -> Option<usize> {
        self.index.get(status).copied()
    }

    /// The orchestrator action attached to a status, if any
    pub fn action_for(&self, status: &str) -> Option<&OrchestratorAction> {
        self.actions.get(status)
    }

    /// The status a reopened task should land in: the first allowed
    /// successor of `from` that is a backward step. Under `force` the
    /// first non-terminal, non-hold status is used as a fallback.
    pub fn reopen_target(&self, from: &str, force: bool) -> Result<&str> {
        if let Some(target) = self
            .allowed_next(from)
            .iter()
            .find(|next| self.is_backward(from, next.as_str()))
        {
            return Ok(target);
        }
        if force {
            if let Some(def) = self
                .statuses
                .iter()
                .find(|s| !s.terminal && !s.initial && s.group.as_deref() != Some(HOLD_GROUP))
            {
                return Ok(&def.name);
            }
        }
        Err(SharkError::invalid_transition(from, "<development status>"))
    }

    /// The combined transition check used by every status mutation.
    ///
    /// Without `force`: the transition must be declared in `status_flow`,
    /// and a backward transition must carry a non-empty reason. `force`
    /// bypasses both checks; the destination must still be a declared
    /// status either way.
    pub fn validate_transition(
        &self,
        from: &str,
        to: &str,
        force: bool,
        reason: Option<&str>,
    ) -> Result<()> {
        if !self.contains(to) {
            return Err(SharkError::validation(
                "status",
                format!("'{to}' is not a workflow status"),
            ));
        }
        if force {
            return Ok(());
        }
        if !self.allowed_next(from).iter().any(|next| next == to) {
            return Err(SharkError::invalid_transition(from, to));
        }
        if self.is_backward(from, to) && reason.map(str::trim).unwrap_or("").is_empty() {
            return Err(SharkError::reason_required(from, to));
        }
        Ok(())
    }

    fn def(&self, status: &str) -> Option<&StatusDef> {
        self.index.get(status).map(|&i| &self.statuses[i])
    }
}

impl Default for Workflow {
    /// The built-in workflow used when no `.sharkconfig.toml` exists:
    /// todo → in_progress → ready_for_review → completed, with `blocked`
    /// reachable from todo/in_progress and returning to todo, and
    /// `archived` reachable from completed.
    fn default() -> Self {
        use well_known::*;

        let statuses = vec![
            StatusDef::named(TODO).phase("development").initial(),
            StatusDef::named(IN_PROGRESS).phase("development"),
            StatusDef::named(READY_FOR_REVIEW).phase("review"),
            StatusDef::named(COMPLETED).phase("terminal").terminal(),
            StatusDef::named(ARCHIVED).phase("terminal").terminal(),
            StatusDef::named(BLOCKED).phase("hold").group(HOLD_GROUP),
        ];
        let flow = HashMap::from([
            (TODO.into(), vec![IN_PROGRESS.into(), BLOCKED.into()]),
            (
                IN_PROGRESS.into(),
                vec![READY_FOR_REVIEW.into(), BLOCKED.into(), TODO.into()],
            ),
            (
                READY_FOR_REVIEW.into(),
                vec![COMPLETED.into(), IN_PROGRESS.into()],
            ),
            (COMPLETED.into(), vec![ARCHIVED.into()]),
            (BLOCKED.into(), vec![TODO.into()]),
            (ARCHIVED.into(), vec![]),
        ]);
        let actions = HashMap::from([
            (
                TODO.into(),
                OrchestratorAction {
                    action: "assign".into(),
                    agent_type: None,
                    skills: vec![],
                    instruction: "Pick up the task and move it to in_progress.".into(),
                },
            ),
            (
                IN_PROGRESS.into(),
                OrchestratorAction {
                    action: "implement".into(),
                    agent_type: Some("developer".into()),
                    skills: vec![],
                    instruction: "Work the task to completion, then mark it ready for review."
                        .into(),
                },
            ),
            (
                READY_FOR_REVIEW.into(),
                OrchestratorAction {
                    action: "review".into(),
                    agent_type: Some("reviewer".into()),
                    skills: vec![],
                    instruction: "Review the work; approve it or reopen with a reason.".into(),
                },
            ),
        ]);
        Self::from_definition(statuses, flow, actions).expect("built-in workflow is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use well_known::*;

    #[test]
    fn test_default_workflow_shape() {
        let wf = Workflow::default();
        assert_eq!(wf.statuses().len(), 6);
        assert_eq!(wf.initial_status(), TODO);
        assert!(wf.contains(BLOCKED));
        assert!(wf.is_terminal(COMPLETED));
        assert!(wf.is_terminal(ARCHIVED));
        assert!(!wf.is_terminal(IN_PROGRESS));
        assert!(wf.is_hold(BLOCKED));
        assert_eq!(wf.phase_of(TODO), Some("development"));
        assert_eq!(wf.allowed_next(ARCHIVED), &[] as &[String]);
    }

    #[test]
    fn test_allowed_next() {
        let wf = Workflow::default();
        assert!(wf.allowed_next(TODO).contains(&IN_PROGRESS.to_string()));
        assert!(wf.allowed_next(TODO).contains(&BLOCKED.to_string()));
        assert!(!wf.allowed_next(TODO).contains(&COMPLETED.to_string()));
    }

    #[test]
    fn test_backwardness() {
        let wf = Workflow::default();
        assert!(wf.is_backward(READY_FOR_REVIEW, IN_PROGRESS));
        assert!(wf.is_backward(IN_PROGRESS, TODO));
        assert!(!wf.is_backward(TODO, IN_PROGRESS));
        // hold statuses have no position in the forward order
        assert!(!wf.is_backward(BLOCKED, TODO));
        assert!(!wf.is_backward(IN_PROGRESS, BLOCKED));
    }

    #[test]
    fn test_validate_transition_forward() {
        let wf = Workflow::default();
        assert!(wf.validate_transition(TODO, IN_PROGRESS, false, None).is_ok());
        assert!(wf
            .validate_transition(IN_PROGRESS, READY_FOR_REVIEW, false, None)
            .is_ok());
        assert_eq!(
            wf.validate_transition(TODO, COMPLETED, false, None)
                .unwrap_err(),
            SharkError::invalid_transition(TODO, COMPLETED)
        );
    }

    #[test]
    fn test_validate_transition_backward_requires_reason() {
        let wf = Workflow::default();
        assert_eq!(
            wf.validate_transition(READY_FOR_REVIEW, IN_PROGRESS, false, None)
                .unwrap_err(),
            SharkError::reason_required(READY_FOR_REVIEW, IN_PROGRESS)
        );
        assert_eq!(
            wf.validate_transition(READY_FOR_REVIEW, IN_PROGRESS, false, Some("  "))
                .unwrap_err(),
            SharkError::reason_required(READY_FOR_REVIEW, IN_PROGRESS)
        );
        assert!(wf
            .validate_transition(READY_FOR_REVIEW, IN_PROGRESS, false, Some("tests fail"))
            .is_ok());
    }

    #[test]
    fn test_validate_transition_force() {
        let wf = Workflow::default();
        // force bypasses the flow and the reason requirement
        assert!(wf.validate_transition(TODO, COMPLETED, true, None).is_ok());
        assert!(wf
            .validate_transition(COMPLETED, IN_PROGRESS, true, None)
            .is_ok());
        // but the destination must still exist
        assert!(wf
            .validate_transition(TODO, "shipped", true, None)
            .is_err());
    }

    #[test]
    fn test_unblock_needs_no_reason() {
        let wf = Workflow::default();
        assert!(wf.validate_transition(BLOCKED, TODO, false, None).is_ok());
    }

    #[test]
    fn test_reopen_target() {
        let wf = Workflow::default();
        assert_eq!(wf.reopen_target(READY_FOR_REVIEW, false).unwrap(), IN_PROGRESS);
        assert!(wf.reopen_target(COMPLETED, false).is_err());
        assert_eq!(wf.reopen_target(COMPLETED, true).unwrap(), IN_PROGRESS);
    }

    #[test]
    fn test_actions() {
        let wf = Workflow::default();
        let action = wf.action_for(READY_FOR_REVIEW).unwrap();
        assert_eq!(action.action, "review");
        assert_eq!(action.agent_type.as_deref(), Some("reviewer"));
        assert!(wf.action_for(COMPLETED).is_none());
    }

    #[test]
    fn test_config_parse() {
        let toml_src = r#"
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

            [[statuses]]
            name = "parked"
            group = "hold"

            [status_flow]
            queued = ["doing", "parked"]
            doing = ["done", "queued"]
            done = []
            parked = ["queued"]

            [actions.doing]
            action = "implement"
            agent_type = "developer"
            skills = ["rust"]
            instruction = "Do the work."
        "#;
        let file: WorkflowFile = toml::from_str(toml_src).unwrap();
        let wf = Workflow::from_definition(file.statuses, file.status_flow, file.actions).unwrap();
        assert_eq!(wf.initial_status(), "queued");
        assert!(wf.is_terminal("done"));
        assert!(wf.is_hold("parked"));
        assert!(wf.is_backward("doing", "queued"));
        assert!(!wf.is_backward("parked", "queued"));
        assert_eq!(wf.action_for("doing").unwrap().skills, vec!["rust"]);
    }

    #[test]
    fn test_config_rejects_unknown_references() {
        let statuses = vec![StatusDef::named("todo").initial()];
        let flow = HashMap::from([("todo".to_string(), vec!["missing".to_string()])]);
        let err =
            Workflow::from_definition(statuses, flow, HashMap::new()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_config_rejects_duplicate_status() {
        let statuses = vec![StatusDef::named("todo"), StatusDef::named("todo")];
        let err = Workflow::from_definition(statuses, HashMap::new(), HashMap::new()).unwrap_err();
        assert!(err.is_validation());
    }
}
