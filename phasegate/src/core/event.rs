//! Workflow lifecycle events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The kind of lifecycle transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    /// The execution started (or restarted from a checkpoint).
    WorkflowStarted,
    /// All nodes finished without failure.
    WorkflowCompleted,
    /// The execution ended with failed or blocked nodes.
    WorkflowFailed,
    /// The execution was paused.
    WorkflowPaused,
    /// A paused execution was resumed.
    WorkflowResumed,
    /// The execution was cancelled.
    WorkflowCancelled,
    /// A node attempt was dispatched.
    NodeStarted,
    /// A node attempt succeeded.
    NodeCompleted,
    /// A node attempt failed, or a completed node was clawed back.
    NodeFailed,
    /// A retry was scheduled for a failed node.
    NodeRetry,
    /// A node's guard condition evaluated to false.
    NodeSkipped,
    /// A node can no longer run because a dependency or input contract failed.
    NodeBlocked,
    /// An output contract passed verification.
    ContractVerified,
    /// An output contract failed verification.
    ContractBreached,
}

impl WorkflowEventType {
    /// Returns the wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::WorkflowPaused => "workflow_paused",
            Self::WorkflowResumed => "workflow_resumed",
            Self::WorkflowCancelled => "workflow_cancelled",
            Self::NodeStarted => "node_started",
            Self::NodeCompleted => "node_completed",
            Self::NodeFailed => "node_failed",
            Self::NodeRetry => "node_retry",
            Self::NodeSkipped => "node_skipped",
            Self::NodeBlocked => "node_blocked",
            Self::ContractVerified => "contract_verified",
            Self::ContractBreached => "contract_breached",
        }
    }
}

impl fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured event emitted on every lifecycle transition.
///
/// Consumers only observe these events; the executor never calls into them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// The event type.
    #[serde(rename = "type")]
    pub event_type: WorkflowEventType,

    /// Workflow (graph) identifier.
    pub workflow_id: String,

    /// Execution identifier.
    pub execution_id: String,

    /// Node the event refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// Event-specific payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl WorkflowEvent {
    /// Creates a workflow-level event.
    #[must_use]
    pub fn new(
        event_type: WorkflowEventType,
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            node_id: None,
            timestamp: crate::utils::iso_timestamp(),
            data: Map::new(),
        }
    }

    /// Sets the node the event refers to.
    #[must_use]
    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns a data field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}
