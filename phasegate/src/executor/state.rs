//! Per-node execution state.

use crate::artifacts::Artifact;
use crate::core::NodeStatus;
use crate::errors::TransitionError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Execution state of one node within one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Current status.
    pub status: NodeStatus,
    /// Start of the latest attempt (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// End of the latest attempt (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Attempts started in this execution.
    #[serde(default)]
    pub attempt_count: u32,
    /// Error from the latest failed attempt or claw-back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Output of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Artifacts the node produced.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Free-form metadata (timings, contract verdicts).
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// A failed node waiting for its next attempt.
    #[serde(default)]
    pub pending_retry: bool,
    /// A finished node whose inputs were invalidated by a late breach.
    #[serde(default)]
    pub invalidated: bool,
    /// Output contract verification of the latest completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationStatus>,
}

/// Progress of output contract verification for a completed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Verification has not finished; dependents wait.
    Pending,
    /// Every output contract held.
    Passed,
    /// A blocking output contract was breached.
    Failed,
}

impl NodeState {
    /// Moves to `next` if the node state machine allows it.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] for illegal transitions.
    pub fn transition(&mut self, node_id: &str, next: NodeStatus) -> Result<(), TransitionError> {
        self.status.check_transition(node_id, next)?;
        self.status = next;
        Ok(())
    }

    /// Returns true if dependents may rely on this node.
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        self.status.satisfies_dependents()
            && !self.invalidated
            && self.verification != Some(VerificationStatus::Pending)
    }

    /// Returns true if this node prevents its dependents from ever running.
    #[must_use]
    pub fn blocks_dependents(&self) -> bool {
        match self.status {
            NodeStatus::Failed => !self.pending_retry,
            NodeStatus::Blocked => true,
            _ => false,
        }
    }

    /// Returns true if the node has reached its final status for this execution.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        if self.verification == Some(VerificationStatus::Pending) {
            return false;
        }
        match self.status {
            NodeStatus::Failed => !self.pending_retry,
            NodeStatus::Blocked => true,
            other => other.is_terminal(),
        }
    }

    /// Returns the recorded execution time of the latest attempt.
    #[must_use]
    pub fn execution_time_ms(&self) -> Option<f64> {
        self.metadata.get("execution_time_ms").and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_rules() {
        let mut state = NodeState::default();
        state.transition("build", NodeStatus::Ready).unwrap();
        state.transition("build", NodeStatus::Running).unwrap();
        assert!(state.transition("build", NodeStatus::Pending).is_err());
        assert_eq!(state.status, NodeStatus::Running);
    }

    #[test]
    fn test_failed_with_pending_retry_is_not_settled() {
        let mut state = NodeState {
            status: NodeStatus::Failed,
            pending_retry: true,
            ..NodeState::default()
        };
        assert!(!state.is_settled());
        assert!(!state.blocks_dependents());

        state.pending_retry = false;
        assert!(state.is_settled());
        assert!(state.blocks_dependents());
    }

    #[test]
    fn test_invalidated_completion_does_not_satisfy() {
        let mut state = NodeState {
            status: NodeStatus::Completed,
            ..NodeState::default()
        };
        assert!(state.satisfies_dependents());
        state.invalidated = true;
        assert!(!state.satisfies_dependents());
        assert!(state.is_settled());
    }

    #[test]
    fn test_pending_verification_holds_dependents() {
        let mut state = NodeState {
            status: NodeStatus::Completed,
            verification: Some(VerificationStatus::Pending),
            ..NodeState::default()
        };
        assert!(!state.satisfies_dependents());
        assert!(!state.is_settled());
        state.verification = Some(VerificationStatus::Passed);
        assert!(state.satisfies_dependents());
    }
}
