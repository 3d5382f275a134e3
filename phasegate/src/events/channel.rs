//! Bounded-channel event delivery.
//!
//! The executor hands events to a [`ChannelEventSink`], which queues them on a
//! bounded `mpsc` channel drained by a dedicated observer task. A slow
//! downstream sink fills the queue; once full, further events are dropped and
//! counted rather than stalling the scheduler.

use super::{EventSink, LoggingEventSink};
use crate::core::WorkflowEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delivery counters for a channel sink.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    queued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryMetrics {
    fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of events accepted onto the queue.
    #[must_use]
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Number of events handed to the downstream sink.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of events dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the drop rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn drop_rate(&self) -> f64 {
        let queued = self.queued();
        let dropped = self.dropped();
        let total = queued + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }

    /// Converts metrics to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "queued": self.queued(),
            "delivered": self.delivered(),
            "dropped": self.dropped(),
            "drop_rate_percent": (self.drop_rate() * 100.0).round() / 100.0
        })
    }
}

/// An event sink that forwards events through a bounded queue.
pub struct ChannelEventSink {
    tx: Mutex<Option<mpsc::Sender<WorkflowEvent>>>,
    capacity: usize,
    metrics: Arc<DeliveryMetrics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChannelEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEventSink")
            .field("capacity", &self.capacity)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl ChannelEventSink {
    /// Creates the sink and spawns its observer task.
    ///
    /// Must be called from within a Tokio runtime. A `capacity` of zero is
    /// raised to one.
    #[must_use]
    pub fn spawn(downstream: Arc<dyn EventSink>, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, mut rx) = mpsc::channel::<WorkflowEvent>(capacity);
        let metrics = Arc::new(DeliveryMetrics::default());

        let worker_metrics = Arc::clone(&metrics);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                downstream.emit(event).await;
                worker_metrics.record_delivered();
            }
            debug!("Event observer drained and stopped");
        });

        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            capacity,
            metrics,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Creates a sink with a logging downstream.
    #[must_use]
    pub fn with_logging(capacity: usize) -> Arc<Self> {
        Self::spawn(Arc::new(LoggingEventSink::default()), capacity)
    }

    /// Returns the number of events currently waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.tx
            .lock()
            .as_ref()
            .map_or(0, |tx| self.capacity - tx.capacity())
    }

    /// Returns the delivery metrics.
    #[must_use]
    pub fn metrics(&self) -> &DeliveryMetrics {
        &self.metrics
    }

    /// Closes the queue and waits for the observer to deliver what remains.
    ///
    /// Events emitted after shutdown are counted as dropped.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Event observer task ended abnormally");
            }
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<WorkflowEvent>> {
        self.tx.lock().clone()
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: WorkflowEvent) {
        let Some(tx) = self.sender() else {
            self.metrics.record_drop();
            return;
        };
        if tx.send(event).await.is_ok() {
            self.metrics.record_queued();
        } else {
            self.metrics.record_drop();
        }
    }

    fn try_emit(&self, event: WorkflowEvent) {
        let Some(tx) = self.sender() else {
            self.metrics.record_drop();
            return;
        };
        let event_type = event.event_type;
        match tx.try_send(event) {
            Ok(()) => self.metrics.record_queued(),
            Err(_) => {
                self.metrics.record_drop();
                warn!(
                    event_type = %event_type,
                    capacity = self.capacity,
                    dropped_total = self.metrics.dropped(),
                    "Event dropped due to backpressure"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkflowEventType;
    use crate::events::CollectingEventSink;
    use std::time::Duration;

    /// A downstream sink that is slower than the producer.
    struct SlowSink {
        inner: CollectingEventSink,
    }

    #[async_trait]
    impl EventSink for SlowSink {
        async fn emit(&self, event: WorkflowEvent) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.try_emit(event);
        }

        fn try_emit(&self, event: WorkflowEvent) {
            self.inner.try_emit(event);
        }
    }

    fn event(n: u64) -> WorkflowEvent {
        WorkflowEvent::new(WorkflowEventType::NodeStarted, "wf", "exec")
            .add_data("n", serde_json::json!(n))
    }

    #[test]
    fn test_metrics_default() {
        let metrics = DeliveryMetrics::default();
        assert_eq!(metrics.queued(), 0);
        assert_eq!(metrics.dropped(), 0);
        assert!(metrics.drop_rate().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_order() {
        let downstream = Arc::new(CollectingEventSink::new());
        let sink = ChannelEventSink::spawn(downstream.clone(), 16);

        for n in 0..5 {
            sink.try_emit(event(n));
        }
        sink.shutdown().await;

        let events = downstream.events();
        assert_eq!(events.len(), 5);
        assert_eq!(events[4].get("n"), Some(&serde_json::json!(4)));
        assert_eq!(sink.metrics().delivered(), 5);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let downstream = Arc::new(SlowSink {
            inner: CollectingEventSink::new(),
        });
        let sink = ChannelEventSink::spawn(downstream.clone(), 2);

        let started = std::time::Instant::now();
        for n in 0..20 {
            sink.try_emit(event(n));
        }
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(sink.metrics().dropped() > 0);

        sink.shutdown().await;
        let delivered = downstream.inner.len() as u64;
        assert_eq!(delivered, sink.metrics().queued());
        assert_eq!(sink.metrics().queued() + sink.metrics().dropped(), 20);
    }

    #[tokio::test]
    async fn test_emit_after_shutdown_is_dropped() {
        let sink = ChannelEventSink::spawn(Arc::new(CollectingEventSink::new()), 4);
        sink.shutdown().await;
        sink.emit(event(1)).await;
        sink.try_emit(event(2));
        assert_eq!(sink.metrics().dropped(), 2);
        assert_eq!(sink.queue_len(), 0);
    }
}
