//! FIFO task queue shared by the pool's workers.
//!
//! The queue also tracks how many popped items are still being worked on, so
//! "queued + in flight" lives under the same lock as the items themselves.
//! That sum is the pool's outstanding count; [`TaskQueue::wait_idle`] blocks
//! until it reaches zero.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct State<T> {
    items: VecDeque<T>,
    in_flight: usize,
    /// Items accepted so far; the next item's sequence number.
    accepted: u64,
    closed: bool,
}

impl<T> State<T> {
    fn outstanding(&self) -> usize {
        self.items.len() + self.in_flight
    }
}

pub struct TaskQueue<T> {
    state: Mutex<State<T>>,
    /// Signalled when an item is pushed or the queue closes.
    available: Condvar,
    /// Signalled when a bounded queue drops below capacity or closes.
    space: Condvar,
    /// Signalled when the outstanding count reaches zero.
    idle: Condvar,
    capacity: Option<usize>,
}

impl<T> TaskQueue<T> {
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// A queue whose `push` blocks while `capacity` items are waiting.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                in_flight: 0,
                accepted: 0,
                closed: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
            idle: Condvar::new(),
            capacity,
        }
    }

    /// Appends `item` at the tail.
    ///
    /// Returns the item back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        self.push_with(|_| item)
            .map(|_| ())
            .map_err(|make| make(0))
    }

    /// Builds the tail item from its sequence number while holding the lock,
    /// so sequence order is exactly queue order across concurrent producers.
    ///
    /// Returns the sequence number, or hands `make` back if the queue has been
    /// closed.
    pub fn push_with<F>(&self, make: F) -> Result<u64, F>
    where
        F: FnOnce(u64) -> T,
    {
        let mut state = self.lock();
        if let Some(cap) = self.capacity {
            while !state.closed && state.items.len() >= cap {
                state = self
                    .space
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        if state.closed {
            return Err(make);
        }
        let seq = state.accepted;
        state.accepted += 1;
        state.items.push_back(make(seq));
        drop(state);
        self.available.notify_one();
        Ok(seq)
    }

    /// Removes the head item, waiting for one if the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained. Every `Some` must
    /// be matched by exactly one [`TaskQueue::done`].
    pub fn pop_blocking(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                state.in_flight += 1;
                drop(state);
                if self.capacity.is_some() {
                    self.space.notify_one();
                }
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Marks one popped item as finished.
    pub fn done(&self) {
        let mut state = self.lock();
        debug_assert!(state.in_flight > 0, "done() without a matching pop");
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.outstanding() == 0 {
            self.idle.notify_all();
        }
    }

    /// Blocks until nothing is queued and nothing is in flight.
    pub fn wait_idle(&self) {
        let mut state = self.lock();
        while state.outstanding() > 0 {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stops accepting items and wakes every blocked caller. Items already
    /// queued are still handed out by `pop_blocking`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
        self.space.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Items waiting to be popped.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued plus in-flight items.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding()
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
