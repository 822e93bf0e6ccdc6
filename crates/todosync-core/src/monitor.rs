//! Served-pull counter.
//!
//! The server bumps the counter each time it finishes sending a payload. A
//! pusher records the count before inviting the peer and waits for it to
//! move, so it knows its invitation was honored before it drops its pull
//! override.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

/// Watch channel over the number of pulls served.
///
/// Clones observe the same counter.
#[derive(Debug, Clone)]
pub struct ServeMonitor {
    served: Arc<watch::Sender<u64>>,
}

impl ServeMonitor {
    /// Counter starting at zero.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { served: Arc::new(tx) }
    }

    /// Record one completed pull.
    pub fn record_served(&self) {
        self.served.send_modify(|count| *count += 1);
    }

    /// Pulls served so far.
    pub fn served(&self) -> u64 {
        *self.served.borrow()
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.served.subscribe()
    }

    /// Wait until more than `baseline` pulls have been served.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_served_after(&self, baseline: u64, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let outcome = tokio::time::timeout(timeout, rx.wait_for(|count| *count > baseline)).await;
        matches!(outcome, Ok(Ok(_)))
    }
}

impl Default for ServeMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_served_pulls() {
        let monitor = ServeMonitor::new();
        let clone = monitor.clone();
        monitor.record_served();
        clone.record_served();
        assert_eq!(monitor.served(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_once_counter_moves() {
        let monitor = ServeMonitor::new();
        let baseline = monitor.served();

        let server_side = monitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            server_side.record_served();
        });

        assert!(monitor.wait_served_after(baseline, Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_without_pull() {
        let monitor = ServeMonitor::new();
        assert!(!monitor.wait_served_after(0, Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn already_served_returns_immediately() {
        let monitor = ServeMonitor::new();
        monitor.record_served();
        assert!(monitor.wait_served_after(0, Duration::from_millis(1)).await);
    }
}
