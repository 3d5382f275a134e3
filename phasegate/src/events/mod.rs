//! Event delivery for the workflow event stream.
//!
//! Sinks are injected into the executor explicitly; there is no process-wide
//! sink. Wrap a slow sink in a [`ChannelEventSink`] to decouple it from the
//! scheduler loop.

mod channel;
mod sink;

pub use channel::{ChannelEventSink, DeliveryMetrics};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
