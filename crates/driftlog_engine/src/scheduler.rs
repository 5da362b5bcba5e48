//! Periodic trigger for automatic sync cycles.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

/// Recurring timer that fires a tick callback on an interval.
///
/// Re-arming always disarms the previous timer first, so changing the
/// interval or toggling sync never leaves two timers running. Disarming
/// does not cancel a tick already in progress; it only prevents the next
/// one. The tick itself decides whether a cycle should actually run
/// (settings, reachability, conflicts).
#[derive(Default)]
pub struct PeriodicScheduler {
    worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl PeriodicScheduler {
    /// Creates a disarmed scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a timer thread is running.
    pub fn is_armed(&self) -> bool {
        self.worker.is_some()
    }

    /// Arms the timer, replacing any previous one.
    pub fn arm<F>(&mut self, interval: Duration, mut tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.disarm();
        info!(interval_secs = interval.as_secs(), "scheduler armed");

        let (stop_tx, stop_rx) = channel();
        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => tick(),
                // Stop signal or the scheduler was dropped.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("scheduler worker stopping");
                    return;
                }
            }
        });
        self.worker = Some((stop_tx, handle));
    }

    /// Stops the timer. Safe to call when already disarmed.
    pub fn disarm(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(());
            let _ = handle.join();
            info!("scheduler disarmed");
        }
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
