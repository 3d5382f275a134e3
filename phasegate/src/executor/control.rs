//! Pause and cancel signals for a running execution.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Signals shared between the scheduler loop and its callers.
#[derive(Debug, Default)]
pub(crate) struct ExecutionControl {
    pause: AtomicBool,
    cancel: AtomicBool,
    notify: Notify,
}

impl ExecutionControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Resolves on the next pause or cancel request. A request made while
    /// nobody waits is kept as a permit for the next call.
    pub(crate) async fn signalled(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_before_wait_is_kept() {
        let control = ExecutionControl::new();
        assert!(!control.pause_requested());
        control.request_pause();
        tokio::time::timeout(std::time::Duration::from_millis(100), control.signalled())
            .await
            .unwrap();
        assert!(control.pause_requested());
        assert!(!control.cancel_requested());
    }
}
