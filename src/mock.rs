//! In-process hook binding for tests.
//!
//! `MockBinding` gives every thread that asks for its id a message queue, records hook
//! registrations, and runs the registering thread's hook procedure when that thread
//! pumps an injected event. It also checks that each hook is removed by the thread
//! that installed it.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::binding::{HookBinding, HookHandle, HookKind, NativeThreadId, PumpMessage, RawEvent};
use crate::message::HC_ACTION;
use crate::trampoline::{self, Trampoline};

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_ID: Cell<u32> = const { Cell::new(0) };
}

fn thread_id() -> NativeThreadId {
    THREAD_ID.with(|id| {
        if id.get() == 0 {
            id.set(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        }
        NativeThreadId(id.get())
    })
}

enum Queued {
    Quit,
    Noise,
    Input(RawEvent),
}

struct Hook {
    handle: HookHandle,
    kind: HookKind,
    thread: NativeThreadId,
}

#[derive(Default)]
struct Queues {
    by_thread: HashMap<NativeThreadId, VecDeque<Queued>>,
    hooks: Vec<Hook>,
    // Events taken off a queue whose hook procedure has not returned yet.
    busy: usize,
}

impl Queues {
    fn idle(&self) -> bool {
        self.busy == 0 && self.by_thread.values().all(VecDeque::is_empty)
    }
}

#[derive(Default)]
pub struct MockBinding {
    queues: Mutex<Queues>,
    changed: Condvar,
    next_handle: AtomicUsize,
    chained: AtomicUsize,
    violations: AtomicUsize,
    fail_next: AtomicBool,
    fail_keyboard: AtomicBool,
    fail_mouse: AtomicBool,
    stall_quit: AtomicBool,
}

impl MockBinding {
    /// Create a binding with no threads or hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hooks currently registered.
    pub fn handle_count(&self) -> usize {
        self.queues.lock().hooks.len()
    }

    /// Number of hooks of `kind` currently registered.
    pub fn registration_count(&self, kind: HookKind) -> usize {
        self.queues
            .lock()
            .hooks
            .iter()
            .filter(|h| h.kind == kind)
            .count()
    }

    /// Threads owning a registration of `kind`, in registration order.
    pub fn registered_threads(&self, kind: HookKind) -> Vec<NativeThreadId> {
        self.queues
            .lock()
            .hooks
            .iter()
            .filter(|h| h.kind == kind)
            .map(|h| h.thread)
            .collect()
    }

    /// Number of calls passed on to the next hook.
    pub fn chain_count(&self) -> usize {
        self.chained.load(Ordering::SeqCst)
    }

    /// Calls that touched a hook or queue from the wrong thread.
    pub fn affinity_violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    /// Make the next `register` call fail as if the OS refused it.
    pub fn fail_next_registration(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make the next `register` call for `kind` fail.
    pub fn fail_next_registration_of(&self, kind: HookKind) {
        self.fail_flag(kind).store(true, Ordering::SeqCst);
    }

    /// While set, `post_quit` reports success but the quit message is lost.
    pub fn stall_quit(&self, stall: bool) {
        self.stall_quit.store(stall, Ordering::SeqCst);
    }

    /// Queue `event` for every thread owning a hook of `kind`.
    ///
    /// Returns how many queues received it.
    pub fn inject(&self, kind: HookKind, event: RawEvent) -> usize {
        let mut queues = self.queues.lock();
        let targets: Vec<NativeThreadId> = queues
            .hooks
            .iter()
            .filter(|h| h.kind == kind)
            .map(|h| h.thread)
            .collect();
        let mut delivered = 0;
        for thread in targets {
            if let Some(queue) = queues.by_thread.get_mut(&thread) {
                queue.push_back(Queued::Input(event));
                delivered += 1;
            }
        }
        drop(queues);
        self.changed.notify_all();
        delivered
    }

    /// Queue an ordinary window message for `thread`.
    pub fn post_noise(&self, thread: NativeThreadId) -> bool {
        self.post(thread, Queued::Noise)
    }

    /// Block until every queued message has been pumped and handled.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        while !queues.idle() {
            if self.changed.wait_until(&mut queues, deadline).timed_out() {
                return queues.idle();
            }
        }
        true
    }

    fn post(&self, thread: NativeThreadId, message: Queued) -> bool {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.by_thread.get_mut(&thread) else {
            return false;
        };
        queue.push_back(message);
        drop(queues);
        self.changed.notify_all();
        true
    }

    fn fail_flag(&self, kind: HookKind) -> &AtomicBool {
        match kind {
            HookKind::Keyboard => &self.fail_keyboard,
            HookKind::Mouse => &self.fail_mouse,
        }
    }

    fn check_thread(&self, expected: NativeThreadId) -> bool {
        if thread_id() == expected {
            true
        } else {
            self.violations.fetch_add(1, Ordering::SeqCst);
            false
        }
    }
}

impl HookBinding for MockBinding {
    fn current_thread_id(&self) -> NativeThreadId {
        let id = thread_id();
        self.queues.lock().by_thread.entry(id).or_default();
        id
    }

    fn register(
        &self,
        kind: HookKind,
        _trampoline: &Trampoline,
        thread: NativeThreadId,
    ) -> Option<HookHandle> {
        if !self.check_thread(thread)
            || self.fail_next.swap(false, Ordering::SeqCst)
            || self.fail_flag(kind).swap(false, Ordering::SeqCst)
        {
            return None;
        }
        let handle = HookHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.queues.lock().hooks.push(Hook {
            handle,
            kind,
            thread,
        });
        Some(handle)
    }

    fn unregister(&self, handle: HookHandle) -> bool {
        let mut queues = self.queues.lock();
        let Some(pos) = queues.hooks.iter().position(|h| h.handle == handle) else {
            return false;
        };
        if !self.check_thread(queues.hooks[pos].thread) {
            return false;
        }
        queues.hooks.remove(pos);
        true
    }

    fn pump_next_message(&self, thread: NativeThreadId) -> PumpMessage {
        if !self.check_thread(thread) {
            return PumpMessage::Failed;
        }
        let message = {
            let mut queues = self.queues.lock();
            loop {
                let Some(queue) = queues.by_thread.get_mut(&thread) else {
                    return PumpMessage::Failed;
                };
                if let Some(message) = queue.pop_front() {
                    if matches!(message, Queued::Input(_)) {
                        queues.busy += 1;
                    }
                    break message;
                }
                self.changed.wait(&mut queues);
            }
        };

        match message {
            Queued::Quit => {
                // The queue dies with the thread; later posts fail.
                self.queues.lock().by_thread.remove(&thread);
                self.changed.notify_all();
                PumpMessage::Quit
            }
            Queued::Noise => {
                self.changed.notify_all();
                PumpMessage::Message
            }
            Queued::Input(event) => {
                if trampoline::with_active(|t| t.invoke(HC_ACTION, &event)).is_none() {
                    self.chain_next(None, HC_ACTION, &event);
                }
                self.queues.lock().busy -= 1;
                self.changed.notify_all();
                PumpMessage::Message
            }
        }
    }

    fn post_quit(&self, thread: NativeThreadId) -> bool {
        if self.stall_quit.load(Ordering::SeqCst) {
            return self.queues.lock().by_thread.contains_key(&thread);
        }
        self.post(thread, Queued::Quit)
    }

    fn chain_next(&self, _handle: Option<HookHandle>, _code: i32, _event: &RawEvent) -> isize {
        self.chained.fetch_add(1, Ordering::SeqCst);
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::KeyboardData;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_thread_ids_are_stable_and_distinct() {
        let mock = MockBinding::new();
        let here = mock.current_thread_id();
        assert_eq!(mock.current_thread_id(), here);
        let there = thread::spawn(thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_post_to_unknown_thread_fails() {
        let mock = MockBinding::new();
        assert!(!mock.post_quit(NativeThreadId(u32::MAX)));
        assert!(!mock.post_noise(NativeThreadId(u32::MAX)));
    }

    #[test]
    fn test_quit_then_queue_is_gone() {
        let mock = MockBinding::new();
        let me = mock.current_thread_id();
        assert!(mock.post_noise(me));
        assert!(mock.post_quit(me));
        assert_eq!(mock.pump_next_message(me), PumpMessage::Message);
        assert_eq!(mock.pump_next_message(me), PumpMessage::Quit);
        assert!(!mock.post_quit(me));
        assert_eq!(mock.pump_next_message(me), PumpMessage::Failed);
    }

    #[test]
    fn test_unregister_from_other_thread_is_a_violation() {
        let mock = Arc::new(MockBinding::new());
        let registered = Arc::clone(&mock);
        let handle = thread::spawn(move || {
            let binding: Arc<dyn HookBinding> = registered.clone();
            let trampoline = Trampoline::new(HookKind::Keyboard, binding, Arc::new(|_| {}));
            let me = registered.current_thread_id();
            registered.register(HookKind::Keyboard, &trampoline, me)
        })
        .join()
        .unwrap()
        .unwrap();

        assert!(!mock.unregister(handle));
        assert_eq!(mock.affinity_violations(), 1);
        assert_eq!(mock.handle_count(), 1);
    }

    #[test]
    fn test_input_without_hook_procedure_is_chained() {
        let mock = MockBinding::new();
        let me = mock.current_thread_id();
        assert!(mock.post(
            me,
            Queued::Input(RawEvent::keyboard(0x0100, KeyboardData::default()))
        ));
        assert_eq!(mock.pump_next_message(me), PumpMessage::Message);
        assert_eq!(mock.chain_count(), 1);
        assert!(mock.wait_idle(Duration::ZERO));
    }
}
