//! Node and workflow status enums with their transition rules.

use crate::errors::TransitionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The runtime status of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting for dependencies.
    #[default]
    Pending,
    /// Dependencies satisfied, about to be dispatched.
    Ready,
    /// The task callback is executing.
    Running,
    /// The task finished successfully and its contracts held.
    Completed,
    /// The task failed, or a blocking contract was breached.
    Failed,
    /// The guard condition evaluated to false.
    Skipped,
    /// A dependency or input contract can no longer be satisfied.
    Blocked,
    /// Execution was cancelled while the node was in flight.
    Cancelled,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Blocked => write!(f, "blocked"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl NodeStatus {
    /// Returns true if the status is terminal.
    ///
    /// `Failed` counts as terminal; a failed node awaiting retry is tracked
    /// separately on its state record.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if dependents may proceed past this node.
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Returns true if this node prevents its dependents from ever running.
    #[must_use]
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Blocked)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// `Completed -> Failed` is the contract claw-back; `Failed -> Running` is
    /// a retry; `Blocked -> Pending` is re-evaluation once a breached input
    /// contract is resolved; `Ready -> Pending` is used when a checkpoint is
    /// resumed before dispatch happened; `Failed -> Cancelled` abandons a
    /// pending retry on cancellation.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use NodeStatus::{Blocked, Cancelled, Completed, Failed, Pending, Ready, Running, Skipped};
        matches!(
            (self, next),
            (Pending, Ready | Blocked | Skipped)
                | (Ready, Running | Pending | Cancelled)
                | (Running, Completed | Failed | Cancelled)
                | (Failed, Running | Cancelled)
                | (Completed, Failed)
                | (Blocked, Pending)
        )
    }

    /// Validates a transition for the named node.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the transition is illegal.
    pub fn check_transition(&self, node_id: &str, next: Self) -> Result<(), TransitionError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError::new("node", node_id, self, next))
        }
    }
}

/// The overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not started.
    #[default]
    Pending,
    /// The scheduler is dispatching nodes.
    Running,
    /// Suspended by an explicit pause.
    Paused,
    /// All nodes finished without failure.
    Completed,
    /// At least one node failed or was blocked.
    Failed,
    /// Stopped by an explicit cancel.
    Cancelled,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl WorkflowStatus {
    /// Returns true if the workflow cannot make further progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// A paused workflow may also be cancelled directly, and a completed one
    /// fails when a late contract breach claws back a node. `Failed -> Running`
    /// is not allowed: re-running failed work always uses a fresh execution.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use WorkflowStatus::{Cancelled, Completed, Failed, Paused, Pending, Running};
        matches!(
            (self, next),
            (Pending, Running | Cancelled)
                | (Running, Completed | Failed | Paused | Cancelled)
                | (Paused, Running | Cancelled)
                | (Completed, Failed)
        )
    }

    /// Validates a transition for the named execution.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the transition is illegal.
    pub fn check_transition(&self, execution_id: &str, next: Self) -> Result<(), TransitionError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError::new("workflow", execution_id, self, next))
        }
    }
}
