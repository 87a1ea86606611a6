//! Single-slot completion channel.
//!
//! A driver is handed a [`Completer`] when an operation starts and calls
//! [`Completer::complete`] from whatever context finishes the operation.
//! That call only records the result and wakes the waiter. The owner blocks
//! in [`CompletionSlot::wait`] with a timeout.
//!
//! A wait that times out leaves the operation in flight: a late completion
//! is stored and returned by the next wait. [`CompletionSlot::close`]
//! releases any waiter with [`WaitResult::Cancelled`] and makes completions
//! of earlier operations stale, so they are dropped on arrival.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Outcome of [`CompletionSlot::wait`].
#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult<T> {
    /// The in-flight operation finished with this result.
    Ready(T),
    /// The timeout elapsed first; the operation is still in flight.
    TimedOut,
    /// The slot was closed before a result arrived.
    Cancelled,
    /// Nothing was in flight.
    Idle,
}

#[derive(Debug)]
struct SlotState<T> {
    generation: u64,
    in_flight: bool,
    result: Option<T>,
    closed: bool,
}

#[derive(Debug)]
struct Shared<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner side: starts operations and waits for their completion.
///
/// Clones share the slot, so a clone can close it from another thread to
/// release a blocked waiter.
#[derive(Debug)]
pub struct CompletionSlot<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CompletionSlot<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for CompletionSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionSlot<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SlotState {
                    generation: 0,
                    in_flight: false,
                    result: None,
                    closed: false,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Start tracking a new operation.
    ///
    /// Returns `None` when the slot is closed or an operation is already in
    /// flight; at most one operation per slot is supported.
    pub fn begin(&self) -> Option<Completer<T>> {
        let mut state = self.shared.lock();
        if state.closed || state.in_flight {
            return None;
        }
        state.generation += 1;
        state.in_flight = true;
        state.result = None;
        Some(Completer {
            shared: Arc::clone(&self.shared),
            generation: state.generation,
        })
    }

    /// Block until the in-flight operation completes, the timeout elapses
    /// or the slot is closed. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitResult<T> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        let mut state = self.shared.lock();
        let generation = state.generation;

        loop {
            if state.closed || state.generation != generation {
                return WaitResult::Cancelled;
            }
            if let Some(result) = state.result.take() {
                state.in_flight = false;
                return WaitResult::Ready(result);
            }
            if !state.in_flight {
                return WaitResult::Idle;
            }

            state = match deadline {
                None => self
                    .shared
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(at) => {
                    let now = Instant::now();
                    if now >= at {
                        return WaitResult::TimedOut;
                    }
                    self.shared
                        .ready
                        .wait_timeout(state, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Whether an operation has started and its result was not yet taken.
    pub fn is_in_flight(&self) -> bool {
        self.shared.lock().in_flight
    }

    /// Whether a completion has arrived and is waiting to be taken.
    pub fn is_ready(&self) -> bool {
        self.shared.lock().result.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Forget the in-flight operation without closing the slot.
    ///
    /// Used when the driver refused to start it; a completion that still
    /// arrives for it is dropped.
    pub fn abandon(&self) {
        let mut state = self.shared.lock();
        state.generation += 1;
        state.in_flight = false;
        state.result = None;
    }

    /// Close the slot: release waiters with [`WaitResult::Cancelled`], drop
    /// any stored result and ignore completions still outstanding. Closing
    /// twice is harmless.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.generation += 1;
        state.in_flight = false;
        if state.result.take().is_some() {
            debug!("discarding completion nobody waited for");
        }
        drop(state);
        self.shared.ready.notify_all();
    }
}

/// Driver side of one operation. Consumed by [`Completer::complete`].
#[derive(Debug)]
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
    generation: u64,
}

impl<T> Completer<T> {
    /// Hand the result to the waiter.
    ///
    /// Returns `false` when the result was discarded because the slot was
    /// closed after the operation started.
    pub fn complete(self, result: T) -> bool {
        let mut state = self.shared.lock();
        if state.closed || state.generation != self.generation {
            debug!(generation = self.generation, "stale completion dropped");
            return false;
        }
        state.result = Some(result);
        drop(state);
        self.shared.ready.notify_all();
        true
    }
}
