//! Event sink trait and implementations.

use crate::core::{WorkflowEvent, WorkflowEventType};
use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Trait for event sinks that can receive workflow events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: WorkflowEvent);

    /// Tries to emit an event without blocking.
    ///
    /// This method must never fail. Errors are logged but suppressed.
    fn try_emit(&self, event: WorkflowEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: WorkflowEvent) {}

    fn try_emit(&self, _event: WorkflowEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &WorkflowEvent) {
        let node_id = event.node_id.as_deref().unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.event_type,
                workflow_id = %event.workflow_id,
                execution_id = %event.execution_id,
                node_id = %node_id,
                event_data = ?event.data,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                event_type = %event.event_type,
                workflow_id = %event.workflow_id,
                execution_id = %event.execution_id,
                node_id = %node_id,
                event_data = ?event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: WorkflowEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: WorkflowEvent) {
        self.log_event(&event);
    }
}

/// A collecting event sink for testing and inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<WorkflowEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of the given type.
    #[must_use]
    pub fn events_of_type(&self, event_type: WorkflowEventType) -> Vec<WorkflowEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Returns events of the given type for one node.
    #[must_use]
    pub fn node_events(&self, event_type: WorkflowEventType, node_id: &str) -> Vec<WorkflowEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type && e.node_id.as_deref() == Some(node_id))
            .cloned()
            .collect()
    }

    /// Returns the position of the first matching event, if any.
    #[must_use]
    pub fn position(&self, event_type: WorkflowEventType, node_id: &str) -> Option<usize> {
        self.events
            .read()
            .iter()
            .position(|e| e.event_type == event_type && e.node_id.as_deref() == Some(node_id))
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: WorkflowEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: WorkflowEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: WorkflowEventType, node: Option<&str>) -> WorkflowEvent {
        let e = WorkflowEvent::new(kind, "wf", "exec");
        match node {
            Some(node) => e.for_node(node),
            None => e,
        }
    }

    #[test]
    fn test_noop_sink() {
        let sink = NoOpEventSink;
        tokio_test::block_on(sink.emit(event(WorkflowEventType::WorkflowStarted, None)));
        sink.try_emit(event(WorkflowEventType::NodeStarted, Some("a")));
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::debug();
        sink.emit(event(WorkflowEventType::NodeFailed, Some("a"))).await;
        LoggingEventSink::default().try_emit(event(WorkflowEventType::WorkflowFailed, None));
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(event(WorkflowEventType::NodeStarted, Some("a"))).await;
        sink.try_emit(event(WorkflowEventType::NodeCompleted, Some("a")));
        sink.try_emit(event(WorkflowEventType::NodeStarted, Some("b")));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type(WorkflowEventType::NodeStarted).len(), 2);
        assert_eq!(sink.node_events(WorkflowEventType::NodeStarted, "b").len(), 1);
        assert_eq!(sink.position(WorkflowEventType::NodeCompleted, "a"), Some(1));
        assert_eq!(sink.position(WorkflowEventType::NodeCompleted, "b"), None);

        sink.clear();
        assert!(sink.is_empty());
    }
}
