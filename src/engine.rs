//! One native hook registration bound to its own message-pump thread.
//!
//! Registration, message retrieval and unregistration all happen on the pump thread.
//! Other threads only ever post the directed quit signal and join. The trampoline lives
//! on the pump thread's stack and is borrowed by the registration guard, so it cannot
//! be dropped or moved until the hook has been removed.

use std::marker::PhantomData;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::binding::{HookBinding, HookHandle, HookKind, NativeThreadId, PumpMessage, RawEvent};
use crate::error::HookError;
use crate::trampoline::{self, RawEventSink, Trampoline};

/// How long `uninstall` waits for the pump thread after posting quit.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

enum Lifecycle {
    Uninstalled,
    Installed(PumpThread),
}

struct PumpThread {
    thread_id: NativeThreadId,
    handle: JoinHandle<()>,
    /// Disconnects when the pump thread exits, including by panic.
    exited: Receiver<()>,
}

/// A low-level hook with a dedicated pump thread.
///
/// `install` and `uninstall` are serialized by one lock and are idempotent: a
/// redundant transition returns `Ok(false)`.
pub struct HookEngine {
    kind: HookKind,
    binding: Arc<dyn HookBinding>,
    sink: RawEventSink,
    join_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl HookEngine {
    /// Create an uninstalled engine that forwards raw events to `sink`.
    ///
    /// `sink` runs on the pump thread inside the OS callback and must not block.
    pub fn new<F>(kind: HookKind, binding: Arc<dyn HookBinding>, sink: F) -> Self
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        Self {
            kind,
            binding,
            sink: Arc::new(sink),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            lifecycle: Mutex::new(Lifecycle::Uninstalled),
        }
    }

    /// Set how long `uninstall` waits for the pump thread to exit.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Which hook this engine installs.
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Whether a pump thread currently owns a registration.
    pub fn is_installed(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Installed(_))
    }

    /// Native id of the current pump thread, if installed.
    pub fn pump_thread_id(&self) -> Option<NativeThreadId> {
        match &*self.lifecycle.lock() {
            Lifecycle::Installed(pump) => Some(pump.thread_id),
            Lifecycle::Uninstalled => None,
        }
    }

    /// Spawn a pump thread and register the hook on it.
    ///
    /// Returns once the registration has succeeded or failed. A refused registration
    /// is reported as [`HookError::InstallFailed`] and leaves the engine uninstalled.
    pub fn install(&self) -> Result<bool, HookError> {
        let mut lifecycle = self.lifecycle.lock();
        if matches!(*lifecycle, Lifecycle::Installed(_)) {
            return Ok(false);
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (exit_tx, exit_rx) = mpsc::channel::<()>();
        let kind = self.kind;
        let binding = Arc::clone(&self.binding);
        let sink = Arc::clone(&self.sink);

        let handle = thread::Builder::new()
            .name(format!("{}-hook-pump", kind))
            .spawn(move || {
                let _exit = exit_tx;
                run_pump(kind, binding, sink, ready_tx);
            })?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                log::debug!("{} hook installed on thread {}", kind, thread_id);
                *lifecycle = Lifecycle::Installed(PumpThread {
                    thread_id,
                    handle,
                    exited: exit_rx,
                });
                Ok(true)
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                log::error!("{}", err);
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                let err = HookError::PumpThreadPanicked { kind };
                log::error!("{}", err);
                Err(err)
            }
        }
    }

    /// Post quit to the pump thread and wait for it to unregister and exit.
    ///
    /// If the thread does not exit within the join timeout the engine stays installed
    /// and [`HookError::JoinTimeout`] is returned, so a later call can retry.
    pub fn uninstall(&self) -> Result<bool, HookError> {
        let mut lifecycle = self.lifecycle.lock();
        let pump = match std::mem::replace(&mut *lifecycle, Lifecycle::Uninstalled) {
            Lifecycle::Uninstalled => return Ok(false),
            Lifecycle::Installed(pump) => pump,
        };

        if !self.binding.post_quit(pump.thread_id) {
            log::warn!(
                "could not post quit to {} hook thread {}, it may have exited already",
                self.kind,
                pump.thread_id
            );
        }

        if let Err(RecvTimeoutError::Timeout) = pump.exited.recv_timeout(self.join_timeout) {
            let err = HookError::JoinTimeout {
                kind: self.kind,
                thread_id: pump.thread_id,
                waited: self.join_timeout,
            };
            log::warn!("{}", err);
            *lifecycle = Lifecycle::Installed(pump);
            return Err(err);
        }

        if pump.handle.join().is_err() {
            log::error!("{} hook thread {} panicked", self.kind, pump.thread_id);
        }
        log::debug!("{} hook uninstalled from thread {}", self.kind, pump.thread_id);
        Ok(true)
    }
}

impl Drop for HookEngine {
    fn drop(&mut self) {
        if let Err(e) = self.uninstall() {
            log::warn!("{} hook not released on drop: {}", self.kind, e);
        }
    }
}

/// A live registration. Dropping it unregisters on the current thread.
struct Registration<'t> {
    binding: &'t dyn HookBinding,
    handle: HookHandle,
    _trampoline: PhantomData<&'t Trampoline>,
    // Keeps the guard on the thread that registered it.
    _not_send: PhantomData<*const ()>,
}

impl<'t> Registration<'t> {
    fn new(
        binding: &'t dyn HookBinding,
        kind: HookKind,
        trampoline: &'t Trampoline,
        thread: NativeThreadId,
    ) -> Option<Self> {
        // SAFETY: `Drop` deactivates on this thread, and the `'t` borrow keeps the
        // trampoline in place until then.
        if !unsafe { trampoline::activate(trampoline) } {
            log::error!("thread {} already runs a hook procedure", thread);
            return None;
        }
        let Some(handle) = binding.register(kind, trampoline, thread) else {
            trampoline::deactivate();
            return None;
        };
        trampoline.bind_handle(handle);
        Some(Self {
            binding,
            handle,
            _trampoline: PhantomData,
            _not_send: PhantomData,
        })
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.binding.unregister(self.handle) {
            log::warn!("failed to unregister hook {:?}", self.handle);
        }
        trampoline::deactivate();
    }
}

/// Body of the pump thread.
fn run_pump(
    kind: HookKind,
    binding: Arc<dyn HookBinding>,
    sink: RawEventSink,
    ready: SyncSender<Result<NativeThreadId, HookError>>,
) {
    let thread_id = binding.current_thread_id();
    let trampoline = Trampoline::new(kind, Arc::clone(&binding), sink);

    let Some(registration) = Registration::new(&*binding, kind, &trampoline, thread_id)
    else {
        let _ = ready.send(Err(HookError::InstallFailed { kind }));
        return;
    };

    if ready.send(Ok(thread_id)).is_err() {
        return;
    }

    loop {
        match binding.pump_next_message(thread_id) {
            PumpMessage::Quit => break,
            PumpMessage::Message => {}
            PumpMessage::Failed => {
                log::warn!("{} hook message loop failed on thread {}", kind, thread_id);
                break;
            }
        }
    }

    drop(registration);
    log::debug!("{} hook unregistered on thread {}", kind, thread_id);
}
