//! The task callback seam between the executor and the work it schedules.

use crate::artifacts::{ArtifactRole, ArtifactSpec};
use crate::workflow::WorkflowNode;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Everything a task needs to run one attempt of a node.
#[derive(Debug, Clone)]
pub struct NodeRequest {
    /// Workflow id.
    pub workflow_id: String,
    /// Execution id.
    pub execution_id: String,
    /// The node being run.
    pub node: WorkflowNode,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Outputs of the node's direct dependencies.
    pub dependency_outputs: HashMap<String, Value>,
    /// Snapshot of the global context.
    pub global: Map<String, Value>,
}

/// Content a task wants stored as an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedArtifact {
    /// Raw content.
    pub content: Vec<u8>,
    /// Role.
    pub role: ArtifactRole,
    /// Media type.
    pub media_type: String,
    /// Logical name.
    pub name: Option<String>,
    /// Contract the artifact is evidence for.
    pub contract_id: Option<String>,
}

impl ProducedArtifact {
    /// Creates an artifact of the given role and media type.
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>, role: ArtifactRole, media_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role,
            media_type: media_type.into(),
            name: None,
            contract_id: None,
        }
    }

    /// Sets the logical name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Links the artifact to a contract.
    #[must_use]
    pub fn for_contract(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }

    pub(crate) fn spec(&self, request: &NodeRequest) -> ArtifactSpec {
        let mut spec = ArtifactSpec::new(self.role, self.media_type.clone())
            .created_by(request.node.id.clone())
            .for_node(request.node.id.clone())
            .in_phase(request.workflow_id.clone());
        spec.name = self.name.clone();
        spec.contract_id = self.contract_id.clone();
        spec
    }
}

/// Result of a successful attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutcome {
    /// Output payload made available to dependents and conditions.
    pub output: Value,
    /// Artifacts to store.
    pub artifacts: Vec<ProducedArtifact>,
    /// Entries merged into the global context.
    pub context_updates: Map<String, Value>,
}

impl NodeOutcome {
    /// Creates an outcome with an output payload.
    #[must_use]
    pub fn new(output: Value) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    /// Adds an artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: ProducedArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Adds a global context update.
    #[must_use]
    pub fn with_context_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }
}

/// A failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskFailure {
    /// What went wrong.
    pub message: String,
    /// Whether another attempt may succeed.
    pub retryable: bool,
}

impl TaskFailure {
    /// A transient failure; the retry policy decides whether to try again.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent failure; the node fails without further attempts.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Runs the work behind a node. Implementations decide what the work is;
/// the executor decides when and how often it runs.
#[async_trait]
pub trait NodeTask: Send + Sync {
    /// Runs one attempt.
    async fn run(&self, request: NodeRequest) -> Result<NodeOutcome, TaskFailure>;
}

#[async_trait]
impl<F> NodeTask for F
where
    F: Fn(NodeRequest) -> Result<NodeOutcome, TaskFailure> + Send + Sync,
{
    async fn run(&self, request: NodeRequest) -> Result<NodeOutcome, TaskFailure> {
        (self)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_task() {
        let task = |request: NodeRequest| {
            if request.attempt > 1 {
                Ok(NodeOutcome::new(json!({"node": request.node.id})))
            } else {
                Err(TaskFailure::retryable("cold start"))
            }
        };
        let request = NodeRequest {
            workflow_id: "wf".into(),
            execution_id: "exec".into(),
            node: WorkflowNode::new("build", "Build"),
            attempt: 1,
            dependency_outputs: HashMap::new(),
            global: Map::new(),
        };

        let failure = task.run(request.clone()).await.unwrap_err();
        assert!(failure.retryable);
        assert_eq!(failure.to_string(), "cold start");

        let outcome = task.run(NodeRequest { attempt: 2, ..request }).await.unwrap();
        assert_eq!(outcome.output, json!({"node": "build"}));
    }

    #[test]
    fn test_produced_artifact_spec() {
        let request = NodeRequest {
            workflow_id: "delivery".into(),
            execution_id: "exec".into(),
            node: WorkflowNode::new("backend", "Backend"),
            attempt: 1,
            dependency_outputs: HashMap::new(),
            global: Map::new(),
        };
        let spec = ProducedArtifact::new(b"{}".to_vec(), ArtifactRole::Evidence, "application/json")
            .named("openapi.json")
            .for_contract("API_001")
            .spec(&request);
        assert_eq!(spec.node_id.as_deref(), Some("backend"));
        assert_eq!(spec.contract_id.as_deref(), Some("API_001"));
        assert_eq!(spec.phase.as_deref(), Some("delivery"));
        assert_eq!(spec.name.as_deref(), Some("openapi.json"));
    }
}
