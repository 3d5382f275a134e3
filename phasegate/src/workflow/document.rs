//! Declarative workflow documents (JSON or YAML).
//!
//! ```yaml
//! workflow:
//!   id: delivery
//!   name: Delivery pipeline
//! nodes:
//!   - id: design
//!     name: Design
//!     type: phase
//!   - id: backend
//!     name: Backend
//!     type: phase
//!     dependencies: [design]
//!     execution_mode: parallel
//!     output_contracts: [API_001]
//! ```
//!
//! The companion JSON schema ships in `schemas/workflow.schema.json`.

use super::{Edge, WorkflowDag, WorkflowNode};
use crate::errors::{codes, ErrorInfo, GraphValidationError, PhasegateError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// The `workflow` block of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHeader {
    /// Workflow id.
    pub id: String,
    /// Workflow name.
    pub name: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A parsed workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    /// Workflow header.
    pub workflow: WorkflowHeader,
    /// Node definitions in declaration order.
    pub nodes: Vec<WorkflowNode>,
    /// Optional explicit edges, merged into node dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
}

impl WorkflowDocument {
    /// Parses a JSON document.
    pub fn from_json_str(input: &str) -> Result<Self, PhasegateError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Parses a YAML document.
    pub fn from_yaml_str(input: &str) -> Result<Self, PhasegateError> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Loads a document, choosing the format from the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PhasegateError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&input),
            _ => Self::from_json_str(&input),
        }
    }

    /// Checks the structural rules of the companion schema.
    ///
    /// Enumerated fields (`type`, `execution_mode`) are already enforced by
    /// deserialization; this covers required strings and edge endpoints.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphValidationError`] with code `GRAPH-007-SCHEMA`.
    pub fn validate(&self) -> Result<(), GraphValidationError> {
        if self.workflow.id.trim().is_empty() {
            return Err(schema_error("workflow.id must not be empty", None));
        }
        if self.workflow.name.trim().is_empty() {
            return Err(schema_error("workflow.name must not be empty", None));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                return Err(schema_error(&format!("nodes[{i}].id must not be empty"), None));
            }
            if node.name.trim().is_empty() {
                return Err(schema_error(
                    &format!("nodes[{i}].name must not be empty"),
                    Some(&node.id),
                ));
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !self.nodes.iter().any(|n| &n.id == endpoint) {
                    return Err(GraphValidationError::new(format!(
                        "Edge {} -> {} references unknown node '{endpoint}'",
                        edge.from, edge.to
                    ))
                    .with_nodes(vec![edge.from.clone(), edge.to.clone()])
                    .with_error_info(ErrorInfo::new(
                        codes::MISSING_DEP,
                        format!("Edge endpoint '{endpoint}' not found"),
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validates the document and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphValidationError`] for schema violations or any graph
    /// construction failure.
    pub fn into_dag(self) -> Result<WorkflowDag, GraphValidationError> {
        self.validate()?;
        let Self {
            workflow,
            mut nodes,
            edges,
        } = self;

        for edge in edges {
            if let Some(node) = nodes.iter_mut().find(|n| n.id == edge.to) {
                if !node.dependencies.contains(&edge.from) {
                    node.dependencies.push(edge.from);
                }
            }
        }

        WorkflowDag::new(workflow.id, workflow.name, nodes, workflow.metadata)
    }

    /// Builds a document describing an existing graph.
    #[must_use]
    pub fn from_dag(dag: &WorkflowDag) -> Self {
        Self {
            workflow: WorkflowHeader {
                id: dag.id().to_string(),
                name: dag.name().to_string(),
                metadata: dag.metadata().clone(),
            },
            nodes: dag.nodes().cloned().collect(),
            edges: Vec::new(),
        }
    }
}

fn schema_error(message: &str, node: Option<&str>) -> GraphValidationError {
    let err = GraphValidationError::new(format!("Invalid workflow document: {message}"))
        .with_error_info(
            ErrorInfo::new(codes::SCHEMA, message)
                .with_fix_hint("See schemas/workflow.schema.json for the document layout."),
        );
    match node {
        Some(id) => err.with_nodes(vec![id.to_string()]),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ExecutionMode, NodeType};

    const YAML: &str = r"
workflow:
  id: delivery
  name: Delivery pipeline
  metadata:
    team: platform
nodes:
  - id: requirements
    name: Requirements
    type: phase
  - id: design
    name: Design
    type: phase
    dependencies: [requirements]
  - id: backend
    name: Backend
    type: phase
    execution_mode: parallel
    retry_policy:
      max_attempts: 2
      retry_delay_seconds: 0.5
    output_contracts: [API_001]
  - id: review
    name: Review
    type: human_review
    condition: outputs.backend.ready == true
edges:
  - from: design
    to: backend
  - from: backend
    to: review
";

    #[test]
    fn test_yaml_document_into_dag() {
        let doc = WorkflowDocument::from_yaml_str(YAML).unwrap();
        assert_eq!(doc.nodes.len(), 4);
        assert_eq!(doc.nodes[2].execution_mode, Some(ExecutionMode::Parallel));
        assert_eq!(doc.nodes[3].node_type, NodeType::HumanReview);

        let dag = doc.into_dag().unwrap();
        assert_eq!(dag.metadata().get("team"), Some(&Value::String("platform".into())));
        assert_eq!(dag.node("backend").unwrap().dependencies, vec!["design".to_string()]);
        assert_eq!(dag.node("backend").unwrap().retry_policy.max_attempts, 2);
        assert_eq!(
            dag.topological_order(),
            vec!["requirements", "design", "backend", "review"]
        );
    }

    #[test]
    fn test_json_document_round_trip() {
        let doc = WorkflowDocument::from_yaml_str(YAML).unwrap();
        let dag = doc.into_dag().unwrap();
        let json = serde_json::to_string(&WorkflowDocument::from_dag(&dag)).unwrap();
        let rebuilt = WorkflowDocument::from_json_str(&json).unwrap().into_dag().unwrap();
        assert_eq!(rebuilt.edges(), dag.edges());
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let err = WorkflowDocument::from_json_str(
            r#"{"workflow": {"id": "wf", "name": "wf"}, "nodes": [{"id": "a", "name": "A"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PhasegateError::Serialization(_)));
    }

    #[test]
    fn test_unknown_execution_mode_is_rejected() {
        let err = WorkflowDocument::from_json_str(
            r#"{"workflow": {"id": "wf", "name": "wf"},
                "nodes": [{"id": "a", "name": "A", "type": "custom", "execution_mode": "eventually"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PhasegateError::Serialization(_)));
    }

    #[test]
    fn test_schema_rules() {
        let doc = WorkflowDocument::from_json_str(
            r#"{"workflow": {"id": "wf", "name": ""}, "nodes": [{"id": "a", "name": "A", "type": "custom"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.validate().unwrap_err().code(), Some(codes::SCHEMA));

        let doc = WorkflowDocument::from_json_str(
            r#"{"workflow": {"id": "wf", "name": "wf"},
                "nodes": [{"id": "a", "name": "A", "type": "custom"}],
                "edges": [{"from": "ghost", "to": "a"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.into_dag().unwrap_err().code(), Some(codes::MISSING_DEP));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.yaml");
        std::fs::write(&path, YAML).unwrap();
        let doc = WorkflowDocument::from_path(&path).unwrap();
        assert_eq!(doc.workflow.id, "delivery");
    }
}
