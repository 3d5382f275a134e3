//! Observability utilities: subscriber setup and span timing.

mod logging;
mod timing;

pub use logging::init_tracing;
pub use timing::SpanTimer;
