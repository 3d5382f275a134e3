//! Workflow node definitions.

use super::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node type tag from the workflow document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A delivery phase.
    Phase,
    /// Arbitrary work.
    #[default]
    Custom,
    /// A grouping node whose children run in parallel.
    ParallelGroup,
    /// A branch guarded by a condition.
    Conditional,
    /// Work that waits on a human decision.
    HumanReview,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase => write!(f, "phase"),
            Self::Custom => write!(f, "custom"),
            Self::ParallelGroup => write!(f, "parallel_group"),
            Self::Conditional => write!(f, "conditional"),
            Self::HumanReview => write!(f, "human_review"),
        }
    }
}

/// How a ready node is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs alone, in declaration order.
    #[default]
    Sequential,
    /// May run concurrently with other parallel nodes.
    Parallel,
    /// Runs alone, after its guard condition holds.
    Conditional,
}

/// A unit of work in a workflow graph.
///
/// Nodes are immutable once the graph is constructed; all runtime state lives
/// in the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique node id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Task-type tag.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Ids of nodes that must finish first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Opaque payload handed to the task callback.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Retry policy.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Dispatch mode; sequential when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    /// Guard condition; the node is skipped when it evaluates to false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Contracts that must be verified before this node runs.
    #[serde(default)]
    pub input_contracts: Vec<String>,
    /// Contracts verified against this node's results.
    #[serde(default)]
    pub output_contracts: Vec<String>,
}

impl WorkflowNode {
    /// Creates a custom node with default settings.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type: NodeType::Custom,
            dependencies: Vec::new(),
            config: serde_json::Value::Null,
            retry_policy: RetryPolicy::default(),
            execution_mode: None,
            condition: None,
            input_contracts: Vec::new(),
            output_contracts: Vec::new(),
        }
    }

    /// Sets the node type.
    #[must_use]
    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    /// Adds dependencies.
    #[must_use]
    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        for dep in deps {
            if !self.dependencies.iter().any(|d| d == dep) {
                self.dependencies.push((*dep).to_string());
            }
        }
        self
    }

    /// Sets the configuration payload.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    /// Shorthand for parallel execution mode.
    #[must_use]
    pub fn parallel(self) -> Self {
        self.with_execution_mode(ExecutionMode::Parallel)
    }

    /// Sets the guard condition.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Adds input contract ids.
    #[must_use]
    pub fn with_input_contracts(mut self, ids: &[&str]) -> Self {
        self.input_contracts
            .extend(ids.iter().map(|id| (*id).to_string()));
        self
    }

    /// Adds output contract ids.
    #[must_use]
    pub fn with_output_contracts(mut self, ids: &[&str]) -> Self {
        self.output_contracts
            .extend(ids.iter().map(|id| (*id).to_string()));
        self
    }

    /// Returns the effective execution mode.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.execution_mode.unwrap_or_default()
    }

    /// Returns true if the node may share the scheduler with other nodes.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.mode() == ExecutionMode::Parallel
    }
}
