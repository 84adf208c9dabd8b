//! Transport lifecycle state and in-flight handler tracking.
//!
//! `ArcSwap` holds the lifecycle state so readers never block, and an atomic
//! counter with RAII guards tracks handlers that are still running so
//! `shutdown()` can wait for them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Lifecycle of a transport.
///
/// State machine: Idle -> Listening -> Draining -> Stopped. A transport that
/// only dials out goes straight from Idle to Draining on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Created; no listener bound yet.
    Idle,
    /// Listener bound and accepting connections.
    Listening,
    /// Shutdown requested; waiting for in-flight handlers.
    Draining,
    /// All handlers finished (or the drain timed out) and sockets are closed.
    Stopped,
}

/// Coordinates shutdown between the accept loop, connection tasks, and handlers.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    state: ArcSwap<TransportState>,
    in_flight: Arc<InFlight>,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    idle: Notify,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            signal,
            state: ArcSwap::from_pointee(TransportState::Idle),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn set_listening(&self) {
        self.state.store(Arc::new(TransportState::Listening));
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        **self.state.load()
    }

    /// Receiver that flips to `true` once shutdown begins.
    ///
    /// Long-running tasks select on it alongside their main loop.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.signal.borrow()
    }

    /// Moves to `Draining` and signals every subscriber.
    ///
    /// Returns `false` if shutdown had already begun.
    pub fn begin_shutdown(&self) -> bool {
        let first = !self.signal.send_replace(true);
        if first {
            self.state.store(Arc::new(TransportState::Draining));
        }
        first
    }

    /// Marks a handler as running until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no handler is in flight or `timeout` elapses.
    ///
    /// Returns `true` and moves to `Stopped` if everything drained; returns
    /// `false` on timeout, leaving the state at `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let idle = self.in_flight.idle.notified();
                if self.in_flight_count() == 0 {
                    break;
                }
                idle.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.state.store(Arc::new(TransportState::Stopped));
        }
        drained
    }

    /// Forces `Stopped` after a drain that timed out.
    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(TransportState::Stopped));
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop, including during a handler panic unwind.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}
