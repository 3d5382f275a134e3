//! Graph and contract fixtures.

use serde_json::{json, Map};
use std::sync::Arc;

use crate::contracts::{AcceptanceCriterion, ContractRegistry, ContractState, UniversalContract};
use crate::workflow::{RetryPolicy, WorkflowDag, WorkflowNode};

/// Id of the API contract used by the delivery fixtures.
pub const API_CONTRACT: &str = "API_001";

/// A retry policy with millisecond delays.
#[must_use]
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(max_attempts)
        .with_delay_seconds(0.001)
        .with_exponential_backoff(false)
}

fn delivery_nodes() -> Vec<WorkflowNode> {
    vec![
        WorkflowNode::new("requirements", "Requirements").with_retry_policy(fast_retry(1)),
        WorkflowNode::new("design", "Design")
            .depends_on(&["requirements"])
            .with_retry_policy(fast_retry(1)),
        WorkflowNode::new("backend", "Backend")
            .depends_on(&["design"])
            .parallel()
            .with_retry_policy(fast_retry(2)),
        WorkflowNode::new("frontend", "Frontend")
            .depends_on(&["design"])
            .parallel()
            .with_retry_policy(fast_retry(2)),
        WorkflowNode::new("testing", "Testing")
            .depends_on(&["backend", "frontend"])
            .with_retry_policy(fast_retry(1)),
    ]
}

/// `requirements -> design -> {backend, frontend} -> testing`, with backend
/// and frontend parallel and allowed two attempts each.
///
/// # Panics
///
/// Never; the graph is statically valid.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn delivery_pipeline() -> WorkflowDag {
    WorkflowDag::new("delivery", "Delivery pipeline", delivery_nodes(), Map::new()).unwrap()
}

/// The delivery pipeline with backend producing [`API_CONTRACT`] and
/// frontend consuming it.
///
/// # Panics
///
/// Never; the graph is statically valid.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn delivery_pipeline_with_api_contract() -> WorkflowDag {
    let nodes = delivery_nodes()
        .into_iter()
        .map(|node| match node.id.as_str() {
            "backend" => node.with_output_contracts(&[API_CONTRACT]),
            "frontend" => node.with_input_contracts(&[API_CONTRACT]),
            _ => node,
        })
        .collect();
    WorkflowDag::new("delivery", "Delivery pipeline", nodes, Map::new()).unwrap()
}

/// An accepted, blocking API contract whose single critical criterion needs
/// the backend output to carry `openapi == "3.1"`.
#[must_use]
pub fn api_contract() -> UniversalContract {
    UniversalContract::new(API_CONTRACT, "api", "Order API", "backend", "frontend")
        .with_criterion(
            AcceptanceCriterion::new("openapi", "OpenAPI 3.1 document published", "output_field")
                .with_parameters(json!({ "path": "openapi", "equals": "3.1" })),
        )
        .with_state(ContractState::Accepted)
}

/// Backend output that satisfies [`api_contract`].
#[must_use]
pub fn passing_api_output() -> serde_json::Value {
    json!({ "openapi": "3.1", "endpoints": ["/orders"] })
}

/// A registry holding the given contracts.
///
/// # Panics
///
/// Panics if a contract cannot be registered.
#[must_use]
#[allow(clippy::expect_used)]
pub fn registry_with(contracts: Vec<UniversalContract>) -> Arc<ContractRegistry> {
    let registry = ContractRegistry::new();
    for contract in contracts {
        registry.register(contract).expect("fixture contract registers");
    }
    Arc::new(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_pipeline_layers() {
        let dag = delivery_pipeline();
        let layers = dag.execution_layers();
        assert_eq!(layers.len(), 4);
        assert_eq!(layers[2], vec!["backend", "frontend"]);
    }

    #[test]
    fn test_contract_fixture_wiring() {
        let dag = delivery_pipeline_with_api_contract();
        assert_eq!(dag.producers_of(API_CONTRACT), vec!["backend"]);
        let registry = registry_with(vec![api_contract()]);
        assert_eq!(registry.state(API_CONTRACT), Some(ContractState::Accepted));
    }
}
