//! Readiness decisions for pending nodes.
//!
//! Pure functions over the graph and the persisted context, so a resumed
//! execution derives exactly the same ready set as the one it replaces.

use super::WorkflowContext;
use crate::contracts::{ContractRegistry, InputGate};
use crate::core::NodeStatus;
use crate::workflow::WorkflowDag;

/// What the scheduler should do with a pending node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Every dependency and input contract holds; dispatch it.
    Ready,
    /// Something upstream has not finished yet.
    Waiting,
    /// The guard condition is false.
    Skip,
    /// The node can never run in this execution.
    Blocked {
        /// Why.
        reason: String,
    },
}

/// Decides what to do with the node at `index`.
///
/// Non-pending nodes are reported as [`Readiness::Waiting`]. Dependency
/// failures are checked before anything else, then unfinished dependencies,
/// then input contracts, and the guard condition last.
#[must_use]
pub fn assess(
    dag: &WorkflowDag,
    ctx: &WorkflowContext,
    index: usize,
    contracts: Option<&ContractRegistry>,
) -> Readiness {
    let Some(node) = dag.node_at(index) else {
        return Readiness::Waiting;
    };
    if ctx.status_of(&node.id) != Some(NodeStatus::Pending) {
        return Readiness::Waiting;
    }

    let mut waiting = false;
    for &dep in dag.upstream_of(index) {
        let Some(dep_node) = dag.node_at(dep) else {
            continue;
        };
        let Some(state) = ctx.node(&dep_node.id) else {
            waiting = true;
            continue;
        };
        if state.blocks_dependents() {
            return Readiness::Blocked {
                reason: format!("dependency '{}' is {}", dep_node.id, state.status),
            };
        }
        if state.invalidated {
            return Readiness::Blocked {
                reason: format!("dependency '{}' was invalidated", dep_node.id),
            };
        }
        if !state.satisfies_dependents() {
            waiting = true;
        }
    }
    if waiting {
        return Readiness::Waiting;
    }

    for contract_id in &node.input_contracts {
        let Some(registry) = contracts else {
            return Readiness::Blocked {
                reason: format!("input contract '{contract_id}' has no registry"),
            };
        };
        match registry.input_gate(contract_id) {
            Ok(InputGate::Satisfied) => {}
            Ok(InputGate::Waiting { .. }) => return Readiness::Waiting,
            Ok(InputGate::Blocked { by }) => {
                return Readiness::Blocked {
                    reason: format!(
                        "input contract '{contract_id}' blocked by breach of {}",
                        by.join(", ")
                    ),
                }
            }
            Err(err) => {
                return Readiness::Blocked {
                    reason: err.to_string(),
                }
            }
        }
    }

    match dag.condition(&node.id) {
        Some(condition) if !condition.evaluate(ctx) => Readiness::Skip,
        _ => Readiness::Ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ContractState, UniversalContract};
    use crate::workflow::WorkflowNode;
    use serde_json::{json, Map};

    fn dag() -> WorkflowDag {
        WorkflowDag::new(
            "wf",
            "wf",
            vec![
                WorkflowNode::new("a", "A"),
                WorkflowNode::new("b", "B").depends_on(&["a"]),
                WorkflowNode::new("c", "C")
                    .depends_on(&["a"])
                    .with_condition("outputs.a.deploy"),
                WorkflowNode::new("d", "D").with_input_contracts(&["API_001"]),
            ],
            Map::new(),
        )
        .unwrap()
    }

    fn set(ctx: &mut WorkflowContext, id: &str, status: NodeStatus) {
        if let Some(state) = ctx.node_mut(id) {
            state.status = status;
        }
    }

    #[test]
    fn test_dependency_ordering() {
        let dag = dag();
        let mut ctx = WorkflowContext::for_dag(&dag, "exec", Map::new());
        assert_eq!(assess(&dag, &ctx, 0, None), Readiness::Ready);
        assert_eq!(assess(&dag, &ctx, 1, None), Readiness::Waiting);

        set(&mut ctx, "a", NodeStatus::Completed);
        assert_eq!(assess(&dag, &ctx, 1, None), Readiness::Ready);

        set(&mut ctx, "a", NodeStatus::Failed);
        assert!(matches!(assess(&dag, &ctx, 1, None), Readiness::Blocked { .. }));
    }

    #[test]
    fn test_failed_dependency_with_pending_retry_waits() {
        let dag = dag();
        let mut ctx = WorkflowContext::for_dag(&dag, "exec", Map::new());
        set(&mut ctx, "a", NodeStatus::Failed);
        ctx.node_mut("a").unwrap().pending_retry = true;
        assert_eq!(assess(&dag, &ctx, 1, None), Readiness::Waiting);
    }

    #[test]
    fn test_condition_skips() {
        let dag = dag();
        let mut ctx = WorkflowContext::for_dag(&dag, "exec", Map::new());
        set(&mut ctx, "a", NodeStatus::Completed);
        ctx.outputs.insert("a".into(), json!({"deploy": false}));
        assert_eq!(assess(&dag, &ctx, 2, None), Readiness::Skip);

        ctx.outputs.insert("a".into(), json!({"deploy": true}));
        assert_eq!(assess(&dag, &ctx, 2, None), Readiness::Ready);
    }

    #[test]
    fn test_input_contract_gate() {
        let dag = dag();
        let ctx = WorkflowContext::for_dag(&dag, "exec", Map::new());
        let registry = ContractRegistry::new();
        registry
            .register(
                UniversalContract::new("API_001", "api", "API", "backend", "frontend")
                    .with_state(ContractState::Accepted),
            )
            .unwrap();

        assert_eq!(assess(&dag, &ctx, 3, Some(&registry)), Readiness::Waiting);
        assert!(matches!(assess(&dag, &ctx, 3, None), Readiness::Blocked { .. }));

        registry.update_state("API_001", ContractState::InProgress).unwrap();
        registry.update_state("API_001", ContractState::Fulfilled).unwrap();
        registry.update_state("API_001", ContractState::Breached).unwrap();
        assert!(matches!(
            assess(&dag, &ctx, 3, Some(&registry)),
            Readiness::Blocked { .. }
        ));
    }
}
