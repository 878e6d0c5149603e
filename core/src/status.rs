use crate::workflow::{well_known, Workflow};

/// Parent statuses for epics and features. Unlike task statuses these are
/// fixed; the calculator only ever writes one of these four.
pub mod parent {
    pub const DRAFT: &str = "draft";
    pub const ACTIVE: &str = "active";
    pub const BLOCKED: &str = "blocked";
    pub const COMPLETED: &str = "completed";
}

/// Coarse classification of a child status for parent-status derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    NotStarted,
    Active,
    Blocked,
    Done,
}

/// Classify a task status through workflow metadata: terminal → done,
/// hold group → blocked, initial → not started, anything else → active.
/// Custom statuses without metadata therefore read as live work.
pub fn classify_task_status(workflow: &Workflow, status: &str) -> StatusClass {
    if workflow.is_terminal(status) {
        StatusClass::Done
    } else if workflow.is_hold(status) {
        StatusClass::Blocked
    } else if workflow.is_initial(status) {
        StatusClass::NotStarted
    } else {
        StatusClass::Active
    }
}

/// Classify a feature's parent status when rolling features up into an epic
pub fn classify_parent_status(status: &str) -> StatusClass {
    match status {
        parent::COMPLETED => StatusClass::Done,
        parent::BLOCKED => StatusClass::Blocked,
        parent::DRAFT => StatusClass::NotStarted,
        _ => StatusClass::Active,
    }
}

/// Derive a parent status from classified children.
///
/// No children → draft. All done → completed. Any active → active.
/// Any blocked with nothing active → blocked (when the workflow declares a
/// `blocked` status; otherwise active). All not-started → draft. A mix of
/// done and not-started with nothing in flight reads as active: the parent
/// has partial progress.
fn derive(classes: &[StatusClass], blocked_available: bool) -> &'static str {
    if classes.is_empty() {
        return parent::DRAFT;
    }
    if classes.iter().all(|c| *c == StatusClass::Done) {
        return parent::COMPLETED;
    }
    if classes.iter().any(|c| *c == StatusClass::Active) {
        return parent::ACTIVE;
    }
    if classes.iter().any(|c| *c == StatusClass::Blocked) {
        return if blocked_available {
            parent::BLOCKED
        } else {
            parent::ACTIVE
        };
    }
    if classes.iter().all(|c| *c == StatusClass::NotStarted) {
        return parent::DRAFT;
    }
    parent::ACTIVE
}

/// Feature status from the statuses of its tasks
pub fn feature_status_from_tasks<'a, I>(workflow: &Workflow, task_statuses: I) -> &'static str
where
    I: IntoIterator<Item = &'a str>,
{
    let classes: Vec<StatusClass> = task_statuses
        .into_iter()
        .map(|s| classify_task_status(workflow, s))
        .collect();
    derive(&classes, workflow.contains(well_known::BLOCKED))
}

/// Epic status from the statuses of its features
pub fn epic_status_from_features<'a, I>(workflow: &Workflow, feature_statuses: I) -> &'static str
where
    I: IntoIterator<Item = &'a str>,
{
    let classes: Vec<StatusClass> = feature_statuses
        .into_iter()
        .map(classify_parent_status)
        .collect();
    derive(&classes, workflow.contains(well_known::BLOCKED))
}

/// Raw progress ratio as a percentage. The numerator counts only
/// `completed` tasks; archived tasks stay in the denominator.
pub fn progress_pct(completed: usize, total: usize) -> f64 {
    100.0 * completed as f64 / total.max(1) as f64
}

/// One-decimal rounding for display; comparisons use the raw ratio
pub fn rounded_progress(pct: f64) -> f64 {
    (pct * 10.0).round() / 10.0
}
