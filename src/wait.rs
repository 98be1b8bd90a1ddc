//! Blocking waits for a future key transition.
//!
//! A waiter is registered before its caller blocks, and the token remembers a signal
//! that arrives before the wait begins, so no wakeup can be lost in between.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::event::KeyState;
use crate::key::Key;

enum Outcome<T> {
    Pending,
    Fired(T),
    Cancelled,
}

/// A one-shot rendezvous between the dispatch path and one blocked caller.
pub(crate) struct WaitToken<T> {
    outcome: Mutex<Outcome<T>>,
    changed: Condvar,
}

impl<T> WaitToken<T> {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Mutex::new(Outcome::Pending),
            changed: Condvar::new(),
        }
    }

    /// Fire the token. Only the first signal or cancel counts.
    pub(crate) fn signal(&self, value: T) -> bool {
        self.settle(Outcome::Fired(value))
    }

    pub(crate) fn cancel(&self) -> bool {
        self.settle(Outcome::Cancelled)
    }

    fn settle(&self, next: Outcome<T>) -> bool {
        let mut outcome = self.outcome.lock();
        if !matches!(*outcome, Outcome::Pending) {
            return false;
        }
        *outcome = next;
        drop(outcome);
        self.changed.notify_all();
        true
    }

    /// Block until fired, cancelled, or `timeout` elapses. `None` waits forever.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut outcome = self.outcome.lock();
        loop {
            match std::mem::replace(&mut *outcome, Outcome::Cancelled) {
                Outcome::Fired(value) => return Some(value),
                Outcome::Cancelled => return None,
                Outcome::Pending => *outcome = Outcome::Pending,
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut outcome, deadline).timed_out() {
                        return match std::mem::replace(&mut *outcome, Outcome::Cancelled) {
                            Outcome::Fired(value) => Some(value),
                            _ => None,
                        };
                    }
                }
                None => self.changed.wait(&mut outcome),
            }
        }
    }
}

type Filter = Box<dyn Fn(Key, KeyState, KeyState) -> bool + Send + Sync>;

struct Waiter {
    id: u64,
    filter: Filter,
    token: Arc<WaitToken<Key>>,
}

#[derive(Default)]
struct Waiters {
    active: Vec<Waiter>,
    next_id: u64,
    closed: bool,
}

/// Callers blocked in a wait, checked on every dispatched key transition.
#[derive(Default)]
pub(crate) struct WaitSet {
    waiters: Mutex<Waiters>,
}

impl WaitSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a waiter matching `filter(key, incoming, recorded)`.
    ///
    /// Returns `None` after [`WaitSet::cancel_all`].
    pub(crate) fn register<F>(&self, filter: F) -> Option<Registered<'_>>
    where
        F: Fn(Key, KeyState, KeyState) -> bool + Send + Sync + 'static,
    {
        let mut waiters = self.waiters.lock();
        if waiters.closed {
            return None;
        }
        waiters.next_id += 1;
        let id = waiters.next_id;
        let token = Arc::new(WaitToken::new());
        waiters.active.push(Waiter {
            id,
            filter: Box::new(filter),
            token: Arc::clone(&token),
        });
        Some(Registered {
            set: self,
            id,
            token,
        })
    }

    /// Signal every waiter interested in this transition. Never blocks on a waiter.
    pub(crate) fn notify(&self, key: Key, incoming: KeyState, recorded: KeyState) {
        let waiters = self.waiters.lock();
        for waiter in &waiters.active {
            if (waiter.filter)(key, incoming, recorded) {
                waiter.token.signal(key);
            }
        }
    }

    /// Wake every blocked waiter empty-handed and refuse new ones.
    pub(crate) fn cancel_all(&self) {
        let mut waiters = self.waiters.lock();
        waiters.closed = true;
        for waiter in &waiters.active {
            waiter.token.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.lock().active.len()
    }

    fn remove(&self, id: u64) {
        self.waiters.lock().active.retain(|w| w.id != id);
    }
}

/// A registered waiter. Dropping it deregisters, on every exit path.
pub(crate) struct Registered<'a> {
    set: &'a WaitSet,
    id: u64,
    token: Arc<WaitToken<Key>>,
}

impl Registered<'_> {
    pub(crate) fn wait(self, timeout: Option<Duration>) -> Option<Key> {
        self.token.wait(timeout)
    }
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.set.remove(self.id);
    }
}
