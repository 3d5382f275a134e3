//! Incremental workflow builder.

use super::{Condition, WorkflowDag, WorkflowNode};
use crate::errors::{codes, ErrorInfo, GraphValidationError};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Builder for creating validated workflow graphs.
///
/// Cheap checks (duplicate ids, self-dependencies, condition syntax) run as
/// each node is added; dependency resolution and cycle detection run in
/// [`WorkflowBuilder::build`], so nodes may be added in any order.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    id: String,
    name: String,
    metadata: Map<String, Value>,
    nodes: Vec<WorkflowNode>,
    ids: HashSet<String>,
}

impl WorkflowBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            metadata: Map::new(),
            nodes: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Adds a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already used, the node depends on
    /// itself, or its condition does not parse.
    pub fn node(mut self, node: WorkflowNode) -> Result<Self, GraphValidationError> {
        self.add_node(node)?;
        Ok(self)
    }

    /// Adds a node in place.
    ///
    /// # Errors
    ///
    /// See [`WorkflowBuilder::node`].
    pub fn add_node(&mut self, node: WorkflowNode) -> Result<(), GraphValidationError> {
        if self.ids.contains(&node.id) {
            return Err(GraphValidationError::new(format!("Duplicate node id '{}'", node.id))
                .with_nodes(vec![node.id.clone()])
                .with_error_info(
                    ErrorInfo::new(codes::DUPLICATE, format!("Node '{}' is declared twice", node.id))
                        .with_fix_hint("Give every node a unique id."),
                ));
        }
        if node.dependencies.iter().any(|d| d == &node.id) {
            return Err(GraphValidationError::new(format!(
                "Node '{}' cannot depend on itself",
                node.id
            ))
            .with_nodes(vec![node.id.clone()])
            .with_error_info(ErrorInfo::new(
                codes::SELF_DEP,
                format!("Node '{}' lists itself as a dependency", node.id),
            )));
        }
        if let Some(expr) = node.condition.as_deref() {
            Condition::parse(expr).map_err(|err| err.with_nodes(vec![node.id.clone()]))?;
        }

        self.ids.insert(node.id.clone());
        self.nodes.push(node);
        Ok(())
    }

    /// Returns the number of nodes added so far.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder is empty, a dependency is unknown, or
    /// the dependencies form a cycle.
    pub fn build(self) -> Result<WorkflowDag, GraphValidationError> {
        WorkflowDag::new(self.id, self.name, self.nodes, self.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_creation() {
        let dag = WorkflowBuilder::new("wf", "Workflow")
            .metadata("owner", json!("platform"))
            .node(WorkflowNode::new("a", "A"))
            .unwrap()
            .node(WorkflowNode::new("b", "B").depends_on(&["a"]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(dag.id(), "wf");
        assert_eq!(dag.len(), 2);
        assert_eq!(dag.metadata().get("owner"), Some(&json!("platform")));
    }

    #[test]
    fn test_builder_duplicate_is_rejected_immediately() {
        let err = WorkflowBuilder::new("wf", "wf")
            .node(WorkflowNode::new("a", "A"))
            .unwrap()
            .node(WorkflowNode::new("a", "again"))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::DUPLICATE));
    }

    #[test]
    fn test_builder_self_dependency() {
        let err = WorkflowBuilder::new("wf", "wf")
            .node(WorkflowNode::new("a", "A").depends_on(&["a"]))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::SELF_DEP));
    }

    #[test]
    fn test_builder_bad_condition() {
        let err = WorkflowBuilder::new("wf", "wf")
            .node(WorkflowNode::new("a", "A").with_condition("flag ==="))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::CONDITION));
        assert_eq!(err.nodes, vec!["a".to_string()]);
    }

    #[test]
    fn test_builder_unknown_dependency_at_build() {
        let mut builder = WorkflowBuilder::new("wf", "wf");
        builder
            .add_node(WorkflowNode::new("a", "A").depends_on(&["missing"]))
            .unwrap();
        assert_eq!(builder.node_count(), 1);
        let err = builder.build().unwrap_err();
        assert_eq!(err.code(), Some(codes::MISSING_DEP));
    }

    #[test]
    fn test_builder_cycle_detection() {
        let err = WorkflowBuilder::new("wf", "wf")
            .node(WorkflowNode::new("a", "A").depends_on(&["b"]))
            .unwrap()
            .node(WorkflowNode::new("b", "B").depends_on(&["a"]))
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::CYCLE));
        assert!(err.message.contains("a -> b -> a"));
    }

    #[test]
    fn test_builder_empty() {
        let err = WorkflowBuilder::new("wf", "wf").build().unwrap_err();
        assert_eq!(err.code(), Some(codes::EMPTY));
    }
}
