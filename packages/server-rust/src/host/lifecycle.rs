//! Listener lifecycle state with in-flight request tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions and an atomic counter
//! with RAII guards for in-flight tracking, so serving tasks can report
//! faults and count requests without locking the listener.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Listener state.
///
/// State machine: Created -> Opening -> Opened -> Closing -> Closed, with
/// Faulted reachable from Opening (bind failure) and Opened (accept failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Endpoints may still be added.
    Created,
    /// Binding sockets.
    Opening,
    /// Accepting requests.
    Opened,
    /// Draining in-flight requests.
    Closing,
    /// Stopped; cannot be reopened.
    Closed,
    /// Failed; can only be aborted.
    Faulted,
}

impl ListenerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Opening => "opening",
            Self::Opened => "opened",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Faulted => "faulted",
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared lifecycle of one listener.
///
/// 1. Serving tasks select on `shutdown_receiver()` alongside their loops
/// 2. Request handlers hold an `in_flight_guard()` while dispatching
/// 3. `trigger_shutdown()` signals every task
/// 4. `wait_for_drain()` waits for in-flight requests to finish
#[derive(Debug)]
pub struct ListenerLifecycle {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<ListenerState>,
}

impl ListenerLifecycle {
    /// Creates a lifecycle in the `Created` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(ListenerState::Created),
        }
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        **self.state.load()
    }

    pub fn set_state(&self, state: ListenerState) {
        self.state.store(Arc::new(state));
    }

    /// Moves to `Faulted` unless the listener is already closing or closed.
    ///
    /// Returns `true` if the state changed.
    pub fn fault(&self) -> bool {
        let previous = self.state.rcu(|current| match **current {
            ListenerState::Closing | ListenerState::Closed | ListenerState::Faulted => {
                Arc::clone(current)
            }
            _ => Arc::new(ListenerState::Faulted),
        });
        !matches!(
            *previous,
            ListenerState::Closing | ListenerState::Closed | ListenerState::Faulted
        )
    }

    /// Returns a receiver notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Signals every serving task to stop.
    pub fn trigger_shutdown(&self) {
        // Ignore send errors -- receivers may have been dropped
        let _ = self.shutdown_signal.send(true);
    }

    /// Returns `true` once shutdown has been triggered.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Creates an RAII guard that tracks an in-flight request.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight requests to complete, up to `timeout`.
    ///
    /// Returns `false` if the timeout expired first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            // Poll at 10ms intervals to avoid busy-waiting
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ListenerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
