//! The hook procedure handed to the OS.
//!
//! Low-level hook procedures carry no user pointer, but the OS always calls them
//! on the thread that registered the hook. Each pump thread therefore keeps the
//! address of its own [`Trampoline`] in a thread-local slot, and the binding's
//! native entry point looks it up there.
//!
//! The engine fills the slot just before registering and clears it right after
//! unregistering. Its registration guard keeps the trampoline borrowed for that whole
//! window, so the address in the slot always points at a live, unmoved value.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, OnceLock};

use crate::binding::{HookBinding, HookHandle, HookKind, RawEvent};
use crate::error::panic_message;
use crate::message::HC_ACTION;

/// Receiver of every raw event that carries data.
pub type RawEventSink = Arc<dyn Fn(&RawEvent) + Send + Sync>;

thread_local! {
    static ACTIVE: Cell<*const Trampoline> = const { Cell::new(ptr::null()) };
}

pub struct Trampoline {
    kind: HookKind,
    binding: Arc<dyn HookBinding>,
    sink: RawEventSink,
    handle: OnceLock<HookHandle>,
}

impl Trampoline {
    pub(crate) fn new(kind: HookKind, binding: Arc<dyn HookBinding>, sink: RawEventSink) -> Self {
        Self {
            kind,
            binding,
            sink,
            handle: OnceLock::new(),
        }
    }

    /// Which hook this procedure serves.
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub(crate) fn bind_handle(&self, handle: HookHandle) {
        let _ = self.handle.set(handle);
    }

    /// Run the hook procedure for one OS call.
    ///
    /// Forwards the event when it carries data, then always chains to the next hook.
    /// A panic raised while forwarding is caught here and never reaches the OS.
    pub fn invoke(&self, code: i32, event: &RawEvent) -> isize {
        if code == HC_ACTION && event.payload.is_some() {
            let sink = &self.sink;
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| sink(event))) {
                log::error!(
                    "{} hook handler panicked: {}",
                    self.kind,
                    panic_message(panic.as_ref())
                );
            }
        }
        self.binding
            .chain_next(self.handle.get().copied(), code, event)
    }
}

/// Make `trampoline` the hook procedure of the calling thread.
///
/// Returns `false` if the thread already has one.
///
/// # Safety
///
/// The caller must call [`deactivate`] on this same thread before `trampoline`
/// is moved or dropped.
pub unsafe fn activate(trampoline: &Trampoline) -> bool {
    ACTIVE.with(|slot| {
        if !slot.get().is_null() {
            return false;
        }
        slot.set(trampoline as *const Trampoline);
        true
    })
}

/// Clear the calling thread's hook procedure.
pub fn deactivate() {
    ACTIVE.with(|slot| slot.set(ptr::null()));
}

/// Run `f` with the calling thread's hook procedure, if one is active.
pub fn with_active<R>(f: impl FnOnce(&Trampoline) -> R) -> Option<R> {
    let active = ACTIVE.with(Cell::get);
    if active.is_null() {
        return None;
    }
    // SAFETY: the pointer was stored by `activate` on this thread and is cleared by
    // `deactivate` before the trampoline can move or drop.
    Some(f(unsafe { &*active }))
}
