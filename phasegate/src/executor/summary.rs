//! Post-run execution summaries.

use super::WorkflowContext;
use crate::core::{NodeStatus, WorkflowStatus};
use crate::workflow::WorkflowDag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A node that ended failed or blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    /// Node id.
    pub node_id: String,
    /// Final status.
    pub status: NodeStatus,
    /// Recorded error.
    pub error: Option<String>,
    /// Attempts made.
    pub attempts: u32,
    /// Every node this one depends on, in topological order.
    pub dependency_chain: Vec<String>,
}

/// Counts and failures of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Workflow id.
    pub workflow_id: String,
    /// Execution id.
    pub execution_id: String,
    /// Workflow status.
    pub status: WorkflowStatus,
    /// Number of nodes per status name.
    pub counts: BTreeMap<String, usize>,
    /// Attempts across all nodes.
    pub total_attempts: u32,
    /// Failed and blocked nodes in topological order.
    pub failures: Vec<NodeFailure>,
}

impl ExecutionSummary {
    /// Summarizes a context against the graph it was run from.
    #[must_use]
    pub fn from_context(dag: &WorkflowDag, ctx: &WorkflowContext) -> Self {
        let mut counts = BTreeMap::new();
        let mut total_attempts = 0;
        for state in ctx.node_states.values() {
            *counts.entry(state.status.to_string()).or_insert(0) += 1;
            total_attempts += state.attempt_count;
        }

        let position: Vec<usize> = {
            let mut pos = vec![0; dag.len()];
            for (rank, &index) in dag.topological_indices().iter().enumerate() {
                pos[index] = rank;
            }
            pos
        };

        let failures = dag
            .topological_indices()
            .iter()
            .filter_map(|&index| dag.node_at(index))
            .filter_map(|node| {
                let state = ctx.node(&node.id)?;
                if !matches!(state.status, NodeStatus::Failed | NodeStatus::Blocked) {
                    return None;
                }
                let mut chain: Vec<(usize, String)> = dag
                    .ancestors(&node.id)
                    .into_iter()
                    .filter_map(|id| dag.index_of(id).map(|i| (position[i], id.to_string())))
                    .collect();
                chain.sort();
                Some(NodeFailure {
                    node_id: node.id.clone(),
                    status: state.status,
                    error: state.last_error.clone(),
                    attempts: state.attempt_count,
                    dependency_chain: chain.into_iter().map(|(_, id)| id).collect(),
                })
            })
            .collect();

        Self {
            workflow_id: ctx.workflow_id.clone(),
            execution_id: ctx.execution_id.clone(),
            status: ctx.status,
            counts,
            total_attempts,
            failures,
        }
    }

    /// Returns how many nodes ended in `status`.
    #[must_use]
    pub fn count(&self, status: NodeStatus) -> usize {
        self.counts.get(&status.to_string()).copied().unwrap_or(0)
    }

    /// Returns true if the workflow completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.workflow_id, self.execution_id, self.status)?;
        for (status, count) in &self.counts {
            write!(f, " {status}={count}")?;
        }
        for failure in &self.failures {
            write!(
                f,
                "\n  {} {}: {}",
                failure.node_id,
                failure.status,
                failure.error.as_deref().unwrap_or("no error recorded")
            )?;
            if !failure.dependency_chain.is_empty() {
                write!(f, " (after {})", failure.dependency_chain.join(" -> "))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowNode;
    use pretty_assertions::assert_eq;
    use serde_json::Map;

    #[test]
    fn test_summary_lists_failures_with_chain() {
        let dag = WorkflowDag::new(
            "wf",
            "wf",
            vec![
                WorkflowNode::new("design", "Design"),
                WorkflowNode::new("backend", "Backend").depends_on(&["design"]),
                WorkflowNode::new("testing", "Testing").depends_on(&["backend"]),
            ],
            Map::new(),
        )
        .unwrap();
        let mut ctx = WorkflowContext::for_dag(&dag, "exec-1", Map::new());
        ctx.status = WorkflowStatus::Failed;
        {
            let design = ctx.node_mut("design").unwrap();
            design.status = NodeStatus::Completed;
            design.attempt_count = 1;
        }
        {
            let backend = ctx.node_mut("backend").unwrap();
            backend.status = NodeStatus::Failed;
            backend.attempt_count = 2;
            backend.last_error = Some("compile error".into());
        }
        {
            let testing = ctx.node_mut("testing").unwrap();
            testing.status = NodeStatus::Blocked;
            testing.last_error = Some("dependency 'backend' is failed".into());
        }

        let summary = ExecutionSummary::from_context(&dag, &ctx);
        assert!(!summary.is_success());
        assert_eq!(summary.count(NodeStatus::Completed), 1);
        assert_eq!(summary.count(NodeStatus::Skipped), 0);
        assert_eq!(summary.total_attempts, 3);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.failures[0].node_id, "backend");
        assert_eq!(summary.failures[1].dependency_chain, vec!["design", "backend"]);

        let rendered = summary.to_string();
        assert!(rendered.contains("backend failed: compile error"));
        assert!(rendered.contains("(after design -> backend)"));
    }
}
