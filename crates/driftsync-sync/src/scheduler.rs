//! Per-folder cycle scheduling
//!
//! Each active folder owns a [`CycleScheduler`]: a timer tick (the
//! configured poll interval), a watcher-driven signal, and a cancellation
//! token folded into one awaitable trigger source. The folder's loop task
//! sits in `next_trigger()` between cycles; suspension points are exactly
//! "waiting for the next timer tick" or "awaiting I/O", both cancellable
//! when a folder is paused or removed.
//!
//! Multiple watcher signals arriving while a cycle runs coalesce into a
//! single following trigger (`Notify` keeps at most one stored permit).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why the folder's loop woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    /// The poll interval elapsed
    Timer,
    /// Debounced watcher activity (or an explicit "sync now")
    Signal,
    /// The folder is being paused, removed, or the engine is shutting down
    Shutdown,
}

/// Trigger source for one folder's scan/poll loop
pub struct CycleScheduler {
    timer: Interval,
    signal: Arc<Notify>,
    cancel: CancellationToken,
}

impl CycleScheduler {
    /// Creates a scheduler with the given poll interval
    ///
    /// The first timer tick fires immediately, so a freshly added or
    /// resumed folder scans right away.
    pub fn new(poll_interval: Duration, signal: Arc<Notify>, cancel: CancellationToken) -> Self {
        let mut timer = interval(poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            timer,
            signal,
            cancel,
        }
    }

    /// Waits for the next cycle trigger
    ///
    /// Cancellation wins over pending ticks and signals.
    pub async fn next_trigger(&mut self) -> CycleTrigger {
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                debug!("Cycle scheduler cancelled");
                CycleTrigger::Shutdown
            }
            _ = self.signal.notified() => {
                debug!("Cycle triggered by watcher signal");
                CycleTrigger::Signal
            }
            _ = self.timer.tick() => {
                debug!("Cycle triggered by timer");
                CycleTrigger::Timer
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_timer_tick_is_immediate() {
        let signal = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let mut scheduler = CycleScheduler::new(Duration::from_secs(3600), signal, cancel);

        let trigger = tokio::time::timeout(Duration::from_millis(100), scheduler.next_trigger())
            .await
            .expect("first tick should be immediate");
        assert_eq!(trigger, CycleTrigger::Timer);
    }

    #[tokio::test]
    async fn test_signal_triggers_between_ticks() {
        let signal = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let mut scheduler =
            CycleScheduler::new(Duration::from_secs(3600), signal.clone(), cancel);

        // Consume the immediate first tick
        scheduler.next_trigger().await;

        signal.notify_one();
        let trigger = tokio::time::timeout(Duration::from_millis(100), scheduler.next_trigger())
            .await
            .expect("signal should wake the scheduler");
        assert_eq!(trigger, CycleTrigger::Signal);
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let signal = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let mut scheduler =
            CycleScheduler::new(Duration::from_secs(3600), signal.clone(), cancel.clone());

        scheduler.next_trigger().await; // immediate tick

        // Both a signal and a cancellation pending: shutdown is reported
        signal.notify_one();
        cancel.cancel();

        let trigger = scheduler.next_trigger().await;
        assert_eq!(trigger, CycleTrigger::Shutdown);
    }

    #[tokio::test]
    async fn test_multiple_signals_coalesce() {
        let signal = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let mut scheduler =
            CycleScheduler::new(Duration::from_secs(3600), signal.clone(), cancel);

        scheduler.next_trigger().await; // immediate tick

        // A burst of signals stores a single permit
        signal.notify_one();
        signal.notify_one();
        signal.notify_one();

        let first = scheduler.next_trigger().await;
        assert_eq!(first, CycleTrigger::Signal);

        // No second stored signal: the next wait would block until the timer
        let second =
            tokio::time::timeout(Duration::from_millis(50), scheduler.next_trigger()).await;
        assert!(second.is_err());
    }
}
