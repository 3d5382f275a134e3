//! Handoff records passed from one phase to the next.

use crate::artifacts::ArtifactManifest;
use crate::errors::TransitionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle of a handoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    /// Being assembled.
    #[default]
    Draft,
    /// Handed to the destination phase.
    Ready,
    /// Accepted and being worked on.
    InProgress,
    /// Every task done and every criterion verified.
    Completed,
    /// Sent back; returns to draft.
    Rejected,
}

impl fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

impl HandoffStatus {
    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use HandoffStatus::{Completed, Draft, InProgress, Ready, Rejected};
        matches!(
            (self, next),
            (Draft, Ready | Rejected)
                | (Ready, InProgress | Rejected)
                | (InProgress, Completed | Rejected)
                | (Rejected, Draft)
        )
    }

    /// Validates a transition for the named handoff.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the transition is illegal.
    pub fn check_transition(&self, handoff_id: &str, next: Self) -> Result<(), TransitionError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError::new("handoff", handoff_id, self, next))
        }
    }
}

/// A unit of work in a handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffTask {
    /// Task id, unique within the handoff.
    pub id: String,
    /// What needs doing.
    pub description: String,
    /// Lower runs first.
    #[serde(default)]
    pub priority: u32,
    /// Who picks it up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Tasks (here or elsewhere) that must finish first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether the task is done.
    #[serde(default)]
    pub completed: bool,
}

impl HandoffTask {
    /// Creates an incomplete task with priority 0.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority: 0,
            assignee: None,
            dependencies: Vec::new(),
            completed: false,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the assignee.
    #[must_use]
    pub fn assigned_to(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    /// Adds dependencies.
    #[must_use]
    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.dependencies.extend(deps.iter().map(|d| (*d).to_string()));
        self
    }
}

/// A condition the destination phase checks before accepting the work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffCriterion {
    /// Criterion id, unique within the handoff.
    pub id: String,
    /// What must hold.
    pub description: String,
    /// Contract whose verification decides the criterion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    /// Set by [`mark_criterion_verified`](super::HandoffCoordinator::mark_criterion_verified).
    /// Ignored when `contract_id` is set.
    #[serde(default)]
    pub verified: bool,
}

impl HandoffCriterion {
    /// Creates an unverified criterion.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            contract_id: None,
            verified: false,
        }
    }

    /// Binds the criterion to a contract.
    #[must_use]
    pub fn bound_to(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }
}

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffTransition {
    /// Previous status.
    pub from: HandoffStatus,
    /// New status.
    pub to: HandoffStatus,
    /// When (ISO 8601).
    pub at: String,
    /// Rejection reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The transition record between two phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffSpec {
    /// Handoff id.
    pub id: String,
    /// Phase handing the work over.
    pub from_phase: String,
    /// Phase receiving it.
    pub to_phase: String,
    /// Tasks in declaration order.
    pub tasks: Vec<HandoffTask>,
    /// Input artifacts.
    pub artifacts: ArtifactManifest,
    /// Acceptance criteria.
    pub criteria: Vec<HandoffCriterion>,
    /// Lifecycle status.
    pub status: HandoffStatus,
    /// Completed tasks that live outside this handoff.
    #[serde(default)]
    pub external_completed: BTreeSet<String>,
    /// Times the handoff was rejected.
    #[serde(default)]
    pub rejection_count: u32,
    /// Reason given for the latest rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rejection: Option<String>,
    /// Status changes, oldest first.
    #[serde(default)]
    pub history: Vec<HandoffTransition>,
    /// Creation time (ISO 8601).
    pub created_at: String,
    /// Last change (ISO 8601).
    pub updated_at: String,
}

impl HandoffSpec {
    /// Returns the task with the given id.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&HandoffTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Returns true if `id` names a completed task, here or external.
    #[must_use]
    pub fn is_done(&self, id: &str) -> bool {
        self.task(id).map_or_else(|| self.external_completed.contains(id), |t| t.completed)
    }

    /// Returns the dependencies that resolve to nothing: neither a task in
    /// this handoff nor a completed external prerequisite.
    #[must_use]
    pub fn unresolved_dependencies(&self) -> Vec<String> {
        let mut unresolved: Vec<String> = self
            .tasks
            .iter()
            .flat_map(|t| t.dependencies.iter())
            .filter(|dep| self.task(dep).is_none() && !self.external_completed.contains(dep.as_str()))
            .cloned()
            .collect();
        unresolved.sort();
        unresolved.dedup();
        unresolved
    }

    /// Returns the ids of incomplete tasks in declaration order.
    #[must_use]
    pub fn incomplete_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| !t.completed)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Returns incomplete tasks whose dependencies are all done, by priority
    /// and then declaration order.
    #[must_use]
    pub fn next_tasks(&self) -> Vec<&HandoffTask> {
        let mut next: Vec<(usize, &HandoffTask)> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.completed && t.dependencies.iter().all(|d| self.is_done(d)))
            .collect();
        next.sort_by_key(|(position, t)| (t.priority, *position));
        next.into_iter().map(|(_, t)| t).collect()
    }

    pub(crate) fn validate_tasks(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(format!("duplicate task id '{}'", task.id));
            }
            if task.dependencies.iter().any(|d| d == &task.id) {
                return Err(format!("task '{}' depends on itself", task.id));
            }
        }
        let mut criteria = BTreeSet::new();
        for criterion in &self.criteria {
            if !criteria.insert(criterion.id.as_str()) {
                return Err(format!("duplicate criterion id '{}'", criterion.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(tasks: Vec<HandoffTask>) -> HandoffSpec {
        HandoffSpec {
            id: "handoff-1".into(),
            from_phase: "design".into(),
            to_phase: "implementation".into(),
            tasks,
            artifacts: ArtifactManifest::default(),
            criteria: Vec::new(),
            status: HandoffStatus::Draft,
            external_completed: BTreeSet::new(),
            rejection_count: 0,
            last_rejection: None,
            history: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_handoff_transitions() {
        assert!(HandoffStatus::Draft.can_transition_to(HandoffStatus::Ready));
        assert!(HandoffStatus::Rejected.can_transition_to(HandoffStatus::Draft));
        assert!(!HandoffStatus::Draft.can_transition_to(HandoffStatus::Completed));
        assert!(!HandoffStatus::Completed.can_transition_to(HandoffStatus::Rejected));
        let err = HandoffStatus::Ready
            .check_transition("h-1", HandoffStatus::Completed)
            .unwrap_err();
        assert_eq!(err.machine, "handoff");
    }

    #[test]
    fn test_next_tasks_by_priority() {
        let spec = spec(vec![
            HandoffTask::new("docs", "Write docs").with_priority(2),
            HandoffTask::new("api", "Build API").with_priority(1),
            HandoffTask::new("ui", "Build UI").with_priority(1).depends_on(&["api"]),
            HandoffTask::new("schema", "Schema").with_priority(1),
        ]);
        let ids: Vec<&str> = spec.next_tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["api", "schema", "docs"]);
    }

    #[test]
    fn test_unresolved_dependencies() {
        let mut spec = spec(vec![HandoffTask::new("ui", "Build UI").depends_on(&["api", "design_review"])]);
        spec.tasks.push(HandoffTask::new("api", "Build API"));
        assert_eq!(spec.unresolved_dependencies(), vec!["design_review".to_string()]);

        spec.external_completed.insert("design_review".into());
        assert!(spec.unresolved_dependencies().is_empty());
        assert!(spec.is_done("design_review"));
        assert!(!spec.is_done("api"));
    }

    #[test]
    fn test_validate_tasks() {
        let dup = spec(vec![HandoffTask::new("a", "A"), HandoffTask::new("a", "A again")]);
        assert!(dup.validate_tasks().is_err());
        let own = spec(vec![HandoffTask::new("a", "A").depends_on(&["a"])]);
        assert!(own.validate_tasks().unwrap_err().contains("itself"));
    }
}
