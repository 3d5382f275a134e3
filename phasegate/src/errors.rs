//! Error types for the phasegate framework.
//!
//! Every component has its own error type; `PhasegateError` wraps them all so
//! callers can propagate with `?` across component boundaries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for phasegate operations.
#[derive(Debug, Error)]
pub enum PhasegateError {
    /// A workflow graph failed validation.
    #[error("{0}")]
    Validation(#[from] GraphValidationError),

    /// A cycle was detected in a graph.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A state machine rejected a transition.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// A contract registry operation failed.
    #[error("{0}")]
    Contract(#[from] ContractError),

    /// An artifact store operation failed.
    #[error("{0}")]
    Artifact(#[from] ArtifactError),

    /// A handoff operation failed.
    #[error("{0}")]
    Handoff(#[from] HandoffError),

    /// A checkpoint could not be written or read.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// No execution with the given id is known.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// The execution is currently being driven by another call.
    #[error("Execution already active: {0}")]
    ExecutionActive(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable diagnostic codes attached to validation errors.
pub mod codes {
    /// Dependency cycle in the workflow graph.
    pub const CYCLE: &str = "GRAPH-001-CYCLE";
    /// Node depends on a node that does not exist.
    pub const MISSING_DEP: &str = "GRAPH-002-MISSING_DEP";
    /// Node depends on itself.
    pub const SELF_DEP: &str = "GRAPH-003-SELF_DEP";
    /// Graph has no nodes.
    pub const EMPTY: &str = "GRAPH-004-EMPTY";
    /// Two nodes share an id.
    pub const DUPLICATE: &str = "GRAPH-005-DUPLICATE";
    /// Guard condition could not be parsed.
    pub const CONDITION: &str = "GRAPH-006-CONDITION";
    /// Required document field missing or invalid.
    pub const SCHEMA: &str = "GRAPH-007-SCHEMA";
    /// Node references a contract the registry does not know.
    pub const UNKNOWN_CONTRACT: &str = "CONTRACT-001-UNKNOWN";
    /// Dependency cycle between contracts.
    pub const CONTRACT_CYCLE: &str = "CONTRACT-002-CYCLE";
    /// Contracts with different major schema versions.
    pub const VERSION_MISMATCH: &str = "CONTRACT-003-VERSION";
}

/// Structured diagnostics for surfaced errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "GRAPH-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a workflow graph or document fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The nodes involved in the error.
    pub nodes: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl GraphValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the diagnostic code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in a graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of ids forming the cycle, first id repeated at the end.
    pub cycle_path: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CycleDetectedError {
    /// Creates a cycle error for the workflow graph.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self::with_code(codes::CYCLE, cycle_path)
    }

    /// Creates a cycle error with a specific code.
    #[must_use]
    pub fn with_code(code: &str, cycle_path: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            code,
            format!("Graph contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for GraphValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            nodes: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when a state machine rejects a transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Illegal {machine} transition for '{entity}': {from} -> {to}")]
pub struct TransitionError {
    /// The state machine ("node", "workflow", "contract", "handoff").
    pub machine: &'static str,
    /// The id of the entity whose state was changed.
    pub entity: String,
    /// Current state.
    pub from: String,
    /// Requested state.
    pub to: String,
}

impl TransitionError {
    /// Creates a new transition error.
    #[must_use]
    pub fn new(
        machine: &'static str,
        entity: impl Into<String>,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self {
            machine,
            entity: entity.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Errors raised by the contract registry.
#[derive(Debug, Error)]
pub enum ContractError {
    /// No contract with the given id is registered.
    #[error("Contract not found: {0}")]
    NotFound(String),

    /// A contract with the same id is already registered.
    #[error("Contract already registered: {0}")]
    Duplicate(String),

    /// Registration would create a dependency cycle.
    #[error("{0}")]
    Cycle(#[from] CycleDetectedError),

    /// The contract's lifecycle state does not allow the operation.
    #[error("Contract '{id}' in state {state} cannot be {operation}")]
    InvalidState {
        /// Contract id.
        id: String,
        /// Current state.
        state: String,
        /// Attempted operation.
        operation: String,
    },

    /// The lifecycle state machine rejected a transition.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// Contracts with different major schema versions were compared.
    #[error("Schema major version mismatch: {left} vs {right}")]
    VersionMismatch {
        /// Left-hand schema version.
        left: String,
        /// Right-hand schema version.
        right: String,
    },

    /// A supplied migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// No negotiation with the given id exists.
    #[error("Negotiation not found: {0}")]
    NegotiationNotFound(String),

    /// The negotiation has already been resolved.
    #[error("Negotiation already resolved: {0}")]
    NegotiationClosed(String),

    /// A contract document could not be parsed or is malformed.
    #[error("Invalid contract document: {0}")]
    InvalidDocument(String),
}

/// Errors raised by the artifact store.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No content is stored under the digest.
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Stored content no longer matches its recorded digest.
    #[error("Integrity check failed for {digest}: recomputed {actual}")]
    IntegrityMismatch {
        /// Recorded digest.
        digest: String,
        /// Digest of the bytes currently on disk.
        actual: String,
    },

    /// A `.meta` record could not be read or written.
    #[error("Artifact metadata error: {0}")]
    Metadata(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the handoff coordinator.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// No handoff with the given id exists.
    #[error("Handoff not found: {0}")]
    NotFound(String),

    /// Tasks have dependencies that are not satisfied.
    #[error("Handoff '{id}' has unmet task dependencies: {}", tasks.join(", "))]
    UnmetDependencies {
        /// Handoff id.
        id: String,
        /// Offending task ids.
        tasks: Vec<String>,
    },

    /// Tasks are not yet complete.
    #[error("Handoff '{id}' has incomplete tasks: {}", tasks.join(", "))]
    IncompleteTasks {
        /// Handoff id.
        id: String,
        /// Incomplete task ids.
        tasks: Vec<String>,
    },

    /// Acceptance criteria are not yet verified.
    #[error("Handoff '{id}' has unverified criteria: {}", criteria.join(", "))]
    UnverifiedCriteria {
        /// Handoff id.
        id: String,
        /// Unverified criterion ids.
        criteria: Vec<String>,
    },

    /// The task list is malformed.
    #[error("Invalid handoff task: {0}")]
    InvalidTask(String),

    /// The handoff has no criterion with the given id.
    #[error("Handoff '{id}' has no criterion '{criterion}'")]
    UnknownCriterion {
        /// Handoff id.
        id: String,
        /// Requested criterion id.
        criterion: String,
    },

    /// The criterion is bound to a contract and is verified only through
    /// the contract registry.
    #[error("Handoff '{id}' criterion '{criterion}' is bound to contract '{contract_id}'")]
    ContractBound {
        /// Handoff id.
        id: String,
        /// Criterion id.
        criterion: String,
        /// Bound contract id.
        contract_id: String,
    },

    /// The lifecycle state machine rejected a transition.
    #[error("{0}")]
    Transition(#[from] TransitionError),
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// A write would rewind the execution to an older context.
    #[error("Stale checkpoint for {execution_id}: stored sequence {stored}, attempted {attempted}")]
    Stale {
        /// Execution id.
        execution_id: String,
        /// Sequence currently stored.
        stored: u64,
        /// Sequence of the rejected write.
        attempted: u64,
    },

    /// The checkpoint could not be encoded or decoded.
    #[error("Checkpoint serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("node", "build");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("node"), Some(&"build".to_string()));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.error_info.code, codes::CYCLE);

        let validation: GraphValidationError = err.into();
        assert_eq!(validation.code(), Some(codes::CYCLE));
        assert_eq!(validation.nodes.len(), 3);
    }

    #[test]
    fn test_transition_error_message() {
        let err = TransitionError::new("node", "build", "completed", "running");
        assert_eq!(
            err.to_string(),
            "Illegal node transition for 'build': completed -> running"
        );
    }

    #[test]
    fn test_domain_errors_convert() {
        let err: PhasegateError = ContractError::NotFound("API_001".to_string()).into();
        assert!(matches!(err, PhasegateError::Contract(_)));

        let err: PhasegateError = ArtifactError::NotFound("abc".to_string()).into();
        assert!(err.to_string().contains("abc"));
    }
}
