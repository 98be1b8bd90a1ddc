//! Subscriber lists with copy-on-write snapshots.
//!
//! Structural changes take a short lock and publish a new list; a dispatch pass
//! iterates the list it snapshotted and never observes a half-applied change.
//! Removal waits for in-flight invocations of the removed callback on other threads,
//! so once `remove` returns the callback will not run again. The one exception is an
//! invocation whose thread is itself blocked removing another callback: waiting on it
//! could close a cycle, so removal only waits for threads that are not removing.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::panic_message;
use crate::key::Key;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

// Threads currently inside `Subscriber::revoke`.
static REVOKING: Mutex<Vec<ThreadId>> = parking_lot::const_mutex(Vec::new());

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type Callback<A> = Box<dyn Fn(&A) + Send + Sync>;

#[derive(Default)]
struct Gate {
    removed: bool,
    in_flight: Vec<ThreadId>,
}

pub(crate) struct Subscriber<A> {
    id: SubscriptionId,
    callback: Callback<A>,
    gate: Mutex<Gate>,
    idle: Condvar,
}

impl<A> Subscriber<A> {
    fn new(callback: Callback<A>) -> Self {
        Self {
            id: SubscriptionId::next(),
            callback,
            gate: Mutex::new(Gate::default()),
            idle: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Run the callback unless it has been removed. Panics are logged and dropped.
    pub(crate) fn invoke(&self, arg: &A) {
        let me = thread::current().id();
        {
            let mut gate = self.gate.lock();
            if gate.removed {
                return;
            }
            gate.in_flight.push(me);
        }

        let callback = &self.callback;
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(arg))) {
            log::error!(
                "subscriber {} panicked: {}",
                self.id,
                panic_message(panic.as_ref())
            );
        }

        let mut gate = self.gate.lock();
        if let Some(pos) = gate.in_flight.iter().position(|id| *id == me) {
            gate.in_flight.swap_remove(pos);
        }
        drop(gate);
        self.idle.notify_all();
    }

    /// Stop future invocations and wait out the ones running on other threads.
    ///
    /// A callback may revoke itself. An invocation on a thread that is already revoking
    /// something else is not waited for, so callbacks revoking each other from
    /// concurrent invocations both return.
    fn revoke(&self) {
        let _revoking = RevokingGuard::enter();
        let me = thread::current().id();
        let mut gate = self.gate.lock();
        gate.removed = true;
        while gate
            .in_flight
            .iter()
            .any(|id| *id != me && !REVOKING.lock().contains(id))
        {
            self.idle.wait(&mut gate);
        }
    }
}

struct RevokingGuard(ThreadId);

impl RevokingGuard {
    fn enter() -> Self {
        let me = thread::current().id();
        REVOKING.lock().push(me);
        Self(me)
    }
}

impl Drop for RevokingGuard {
    fn drop(&mut self) {
        let mut revoking = REVOKING.lock();
        if let Some(pos) = revoking.iter().position(|id| *id == self.0) {
            revoking.swap_remove(pos);
        }
    }
}

/// A consistent view of the callbacks registered at one moment.
pub(crate) type Snapshot<A> = Arc<Vec<Arc<Subscriber<A>>>>;

/// An ordered subscriber list.
pub(crate) struct Subscribers<A> {
    list: Mutex<Snapshot<A>>,
}

impl<A> Subscribers<A> {
    pub(crate) fn new() -> Self {
        Self {
            list: Mutex::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn add(&self, callback: Callback<A>) -> SubscriptionId {
        let subscriber = Arc::new(Subscriber::new(callback));
        let id = subscriber.id();
        let mut list = self.list.lock();
        let mut next = Vec::with_capacity(list.len() + 1);
        next.extend(list.iter().cloned());
        next.push(subscriber);
        *list = Arc::new(next);
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut list = self.list.lock();
            let Some(pos) = list.iter().position(|s| s.id() == id) else {
                return false;
            };
            let mut next: Vec<_> = list.iter().cloned().collect();
            let removed = next.remove(pos);
            *list = Arc::new(next);
            removed
        };
        removed.revoke();
        true
    }

    pub(crate) fn snapshot(&self) -> Snapshot<A> {
        Arc::clone(&self.list.lock())
    }

    pub(crate) fn clear(&self) {
        let old = std::mem::replace(&mut *self.list.lock(), Arc::new(Vec::new()));
        for subscriber in old.iter() {
            subscriber.revoke();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.list.lock().len()
    }
}

/// What a per-key callback is told: the incoming state and the code.
pub(crate) type KeyChange = (crate::event::KeyState, Key);

/// Per-key callbacks, in insertion order per key.
pub(crate) struct CallbackRegistry {
    by_key: Mutex<HashMap<Key, Snapshot<KeyChange>>>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            by_key: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn add(&self, key: Key, callback: Callback<KeyChange>) -> SubscriptionId {
        let subscriber = Arc::new(Subscriber::new(callback));
        let id = subscriber.id();
        let mut by_key = self.by_key.lock();
        let entry = by_key.entry(key).or_default();
        let mut next = Vec::with_capacity(entry.len() + 1);
        next.extend(entry.iter().cloned());
        next.push(subscriber);
        *entry = Arc::new(next);
        id
    }

    pub(crate) fn remove(&self, key: Key, id: SubscriptionId) -> bool {
        let removed = {
            let mut by_key = self.by_key.lock();
            let Some(entry) = by_key.get_mut(&key) else {
                return false;
            };
            let Some(pos) = entry.iter().position(|s| s.id() == id) else {
                return false;
            };
            let mut next: Vec<_> = entry.iter().cloned().collect();
            let removed = next.remove(pos);
            if next.is_empty() {
                by_key.remove(&key);
            } else {
                *entry = Arc::new(next);
            }
            removed
        };
        removed.revoke();
        true
    }

    /// Callbacks registered for `key`, or `None` if there are none.
    pub(crate) fn snapshot(&self, key: Key) -> Option<Snapshot<KeyChange>> {
        self.by_key.lock().get(&key).cloned()
    }

    pub(crate) fn clear(&self) {
        let old = std::mem::take(&mut *self.by_key.lock());
        for subscriber in old.values().flat_map(|list| list.iter()) {
            subscriber.revoke();
        }
    }

    pub(crate) fn count(&self, key: Key) -> usize {
        self.by_key.lock().get(&key).map_or(0, |list| list.len())
    }
}
