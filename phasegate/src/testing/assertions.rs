//! Test assertions for workflow executions.

use crate::core::{NodeStatus, WorkflowEventType, WorkflowStatus};
use crate::events::CollectingEventSink;
use crate::executor::WorkflowContext;

/// Asserts the workflow status.
pub fn assert_workflow_status(ctx: &WorkflowContext, expected: WorkflowStatus) {
    assert_eq!(
        ctx.status, expected,
        "Expected workflow {} to be {expected}, got {}",
        ctx.execution_id, ctx.status
    );
}

/// Asserts the status of one node.
pub fn assert_node_status(ctx: &WorkflowContext, node_id: &str, expected: NodeStatus) {
    let actual = ctx.status_of(node_id);
    assert_eq!(
        actual,
        Some(expected),
        "Expected node '{node_id}' to be {expected}, got {actual:?} (last error: {:?})",
        ctx.node(node_id).and_then(|s| s.last_error.as_deref())
    );
}

/// Asserts that a node never started.
pub fn assert_never_started(sink: &CollectingEventSink, node_id: &str) {
    let started = sink.node_events(WorkflowEventType::NodeStarted, node_id);
    assert!(
        started.is_empty(),
        "Expected node '{node_id}' never to start, but it started {} time(s)",
        started.len()
    );
}

/// Asserts that the first `first` event for `first_node` precedes the first
/// `then` event for `then_node`.
pub fn assert_event_before(
    sink: &CollectingEventSink,
    first: (WorkflowEventType, &str),
    then: (WorkflowEventType, &str),
) {
    let a = sink.position(first.0, first.1);
    let b = sink.position(then.0, then.1);
    match (a, b) {
        (Some(a), Some(b)) => assert!(
            a < b,
            "Expected {:?} for '{}' (#{a}) before {:?} for '{}' (#{b})",
            first.0,
            first.1,
            then.0,
            then.1
        ),
        _ => panic!(
            "Missing event: {:?} for '{}' at {a:?}, {:?} for '{}' at {b:?}",
            first.0, first.1, then.0, then.1
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkflowEvent;
    use crate::events::EventSink;
    use crate::workflow::{WorkflowDag, WorkflowNode};
    use serde_json::Map;

    fn context() -> WorkflowContext {
        let dag = WorkflowDag::new("wf", "wf", vec![WorkflowNode::new("a", "A")], Map::new()).unwrap();
        WorkflowContext::for_dag(&dag, "exec", Map::new())
    }

    #[test]
    fn test_status_assertions() {
        let ctx = context();
        assert_workflow_status(&ctx, WorkflowStatus::Pending);
        assert_node_status(&ctx, "a", NodeStatus::Pending);
    }

    #[test]
    #[should_panic(expected = "Expected node 'a' to be completed")]
    fn test_node_status_assertion_fails() {
        assert_node_status(&context(), "a", NodeStatus::Completed);
    }

    #[test]
    fn test_event_order_assertions() {
        let sink = CollectingEventSink::new();
        sink.try_emit(WorkflowEvent::new(WorkflowEventType::NodeStarted, "wf", "exec").for_node("a"));
        sink.try_emit(WorkflowEvent::new(WorkflowEventType::NodeCompleted, "wf", "exec").for_node("a"));
        assert_event_before(
            &sink,
            (WorkflowEventType::NodeStarted, "a"),
            (WorkflowEventType::NodeCompleted, "a"),
        );
        assert_never_started(&sink, "b");
    }
}
