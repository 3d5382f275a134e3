//! Wall-clock timing for node attempts and contract verification.

use std::time::Instant;

/// Measures one timed operation and logs its duration when finished.
///
/// The `scope` names what is being timed (`node`, `verification`) and the
/// `subject` which node or contract it concerns, so the finishing log line
/// can be filtered on either.
#[derive(Debug)]
pub struct SpanTimer {
    started: Instant,
    scope: &'static str,
    subject: String,
}

impl SpanTimer {
    /// Starts timing `subject` within `scope`.
    #[must_use]
    pub fn start(scope: &'static str, subject: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            scope,
            subject: subject.into(),
        }
    }

    /// Milliseconds since the timer started.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// The scope label.
    #[must_use]
    pub fn scope(&self) -> &'static str {
        self.scope
    }

    /// The node or contract being timed.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Stops the timer and returns the elapsed milliseconds.
    pub fn finish(self) -> f64 {
        let duration_ms = self.elapsed_ms();
        tracing::debug!(scope = self.scope, subject = %self.subject, duration_ms, "Timed operation finished");
        duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_measures_and_labels() {
        let timer = SpanTimer::start("verification", "API_001");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(timer.scope(), "verification");
        assert_eq!(timer.subject(), "API_001");
        assert!(timer.finish() >= 10.0);
    }
}
