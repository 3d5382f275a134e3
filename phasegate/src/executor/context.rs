//! The workflow context: the unit of checkpoint and resume.

use super::NodeState;
use crate::core::{NodeStatus, WorkflowStatus};
use crate::errors::CheckpointError;
use crate::workflow::{ConditionScope, WorkflowDag};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Everything the executor knows about one execution.
///
/// Written after every state transition. `sequence` increases with every
/// write so checkpoint stores can reject stale snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Workflow id.
    pub workflow_id: String,
    /// Execution id.
    pub execution_id: String,
    /// Workflow status.
    pub status: WorkflowStatus,
    /// Node states by node id.
    pub node_states: HashMap<String, NodeState>,
    /// Node outputs by node id.
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    /// Artifact paths by node id.
    #[serde(default)]
    pub artifacts: HashMap<String, Vec<String>>,
    /// Free-form global context.
    #[serde(default)]
    pub global: Map<String, Value>,
    /// Monotonic write counter.
    #[serde(default)]
    pub sequence: u64,
    /// Creation time (ISO 8601).
    pub created_at: String,
    /// Time of the latest write (ISO 8601).
    pub updated_at: String,
}

impl WorkflowContext {
    /// Creates a context with every node of `dag` pending.
    #[must_use]
    pub fn for_dag(dag: &WorkflowDag, execution_id: impl Into<String>, global: Map<String, Value>) -> Self {
        let now = crate::utils::iso_timestamp();
        Self {
            workflow_id: dag.id().to_string(),
            execution_id: execution_id.into(),
            status: WorkflowStatus::Pending,
            node_states: dag.nodes().map(|n| (n.id.clone(), NodeState::default())).collect(),
            outputs: HashMap::new(),
            artifacts: HashMap::new(),
            global,
            sequence: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Returns a node's state.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeState> {
        self.node_states.get(node_id)
    }

    pub(crate) fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeState> {
        self.node_states.get_mut(node_id)
    }

    /// Returns a node's status.
    #[must_use]
    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_states.get(node_id).map(|s| s.status)
    }

    /// Returns a node's output.
    #[must_use]
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    /// Returns a global context value.
    #[must_use]
    pub fn global(&self, key: &str) -> Option<&Value> {
        self.global.get(key)
    }

    /// Returns the ids of nodes with the given status, sorted.
    #[must_use]
    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .node_states
            .iter()
            .filter(|(_, s)| s.status == status)
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Returns true once every node has settled.
    #[must_use]
    pub fn all_settled(&self) -> bool {
        self.node_states.values().all(NodeState::is_settled)
    }

    /// Records a write: bumps the sequence and the update time.
    pub(crate) fn touch(&mut self) {
        self.sequence += 1;
        self.updated_at = crate::utils::iso_timestamp();
    }

    /// Serializes the context as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self).map_err(|err| CheckpointError::Serialization(err.to_string()))
    }

    /// Deserializes a context from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Serialization`] if decoding fails.
    pub fn from_json(input: &str) -> Result<Self, CheckpointError> {
        serde_json::from_str(input).map_err(|err| CheckpointError::Serialization(err.to_string()))
    }
}

impl ConditionScope for WorkflowContext {
    fn global_value(&self, key: &str) -> Option<&Value> {
        self.global.get(key)
    }

    fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.status_of(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Condition, WorkflowNode};
    use serde_json::json;

    fn dag() -> WorkflowDag {
        WorkflowDag::new(
            "wf",
            "wf",
            vec![WorkflowNode::new("a", "A"), WorkflowNode::new("b", "B").depends_on(&["a"])],
            Map::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_context_is_all_pending() {
        let ctx = WorkflowContext::for_dag(&dag(), "exec-1", Map::new());
        assert_eq!(ctx.status, WorkflowStatus::Pending);
        assert_eq!(ctx.nodes_with_status(NodeStatus::Pending), vec!["a", "b"]);
        assert!(!ctx.all_settled());
    }

    #[test]
    fn test_json_round_trip_keeps_sequence() {
        let mut ctx = WorkflowContext::for_dag(&dag(), "exec-1", Map::new());
        ctx.touch();
        ctx.touch();
        ctx.outputs.insert("a".into(), json!({"ok": true}));
        let restored = WorkflowContext::from_json(&ctx.to_json().unwrap()).unwrap();
        assert_eq!(restored, ctx);
        assert_eq!(restored.sequence, 2);
    }

    #[test]
    fn test_condition_scope() {
        let mut ctx = WorkflowContext::for_dag(&dag(), "exec-1", Map::new());
        ctx.global.insert("env".into(), json!("prod"));
        ctx.outputs.insert("a".into(), json!({"approved": true}));

        assert!(Condition::parse("context.env == \"prod\"").unwrap().evaluate(&ctx));
        assert!(Condition::parse("outputs.a.approved").unwrap().evaluate(&ctx));
        assert!(Condition::parse("status.b == \"pending\"").unwrap().evaluate(&ctx));
    }
}
