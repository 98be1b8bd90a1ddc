//! Capability boundary between the hook engine and the operating system.
//!
//! A [`HookBinding`] is constructed once at startup and injected into every
//! [`HookEngine`](crate::HookEngine). The engine only ever calls `register`,
//! `unregister` and `pump_next_message` from the pump thread that owns the
//! registration; `post_quit` is the single operation issued from other threads.

use crate::trampoline::Trampoline;

/// Native thread identifier, the target of directed quit signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeThreadId(pub u32);

impl std::fmt::Display for NativeThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of an installed hook.
///
/// Stored as an integer so it can travel between threads; only the binding that
/// produced it knows how to interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(pub usize);

/// Which low-level hook to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Keyboard,
    Mouse,
}

impl HookKind {
    /// The `WH_*` identifier passed to the OS.
    pub fn hook_id(self) -> i32 {
        match self {
            HookKind::Keyboard => 13,
            HookKind::Mouse => 14,
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookKind::Keyboard => write!(f, "keyboard"),
            HookKind::Mouse => write!(f, "mouse"),
        }
    }
}

/// Payload of a low-level keyboard hook call (`KBDLLHOOKSTRUCT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyboardData {
    pub vk_code: u32,
    pub scan_code: u32,
    pub flags: u32,
    pub time: u32,
}

/// Payload of a low-level mouse hook call (`MSLLHOOKSTRUCT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseData {
    pub x: i32,
    pub y: i32,
    pub mouse_data: u32,
    pub flags: u32,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawPayload {
    Keyboard(KeyboardData),
    Mouse(MouseData),
}

/// One hook invocation as read by the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// The window message (`wParam`).
    pub message: u32,
    /// Decoded `lParam` structure, `None` when the OS passed a null pointer.
    pub payload: Option<RawPayload>,
    /// The untouched `lParam`, forwarded when chaining. Zero for synthetic events.
    pub lparam: isize,
}

impl RawEvent {
    /// A keyboard hook call with no native pointer behind it.
    pub fn keyboard(message: u32, data: KeyboardData) -> Self {
        Self {
            message,
            payload: Some(RawPayload::Keyboard(data)),
            lparam: 0,
        }
    }

    /// A mouse hook call with no native pointer behind it.
    pub fn mouse(message: u32, data: MouseData) -> Self {
        Self {
            message,
            payload: Some(RawPayload::Mouse(data)),
            lparam: 0,
        }
    }
}

/// Result of one blocking message retrieval on a pump thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpMessage {
    /// Any message other than quit. Never interesting to the pump.
    Message,
    /// The directed quit signal.
    Quit,
    /// Retrieval failed; the pump cannot continue.
    Failed,
}

/// OS primitives needed to run a low-level hook.
pub trait HookBinding: Send + Sync {
    /// Id of the calling thread, also the key for its message queue.
    fn current_thread_id(&self) -> NativeThreadId;

    /// Install a system-wide hook whose procedure is `trampoline`.
    ///
    /// Called on `thread`, which must be the calling thread. Returns `None` when the
    /// OS refuses the registration. The trampoline stays borrowed until `unregister`.
    fn register(
        &self,
        kind: HookKind,
        trampoline: &Trampoline,
        thread: NativeThreadId,
    ) -> Option<HookHandle>;

    /// Remove a hook. Must run on the thread that registered it.
    fn unregister(&self, handle: HookHandle) -> bool;

    /// Block until the next message for `thread` (the calling thread) arrives.
    ///
    /// Hook procedures for registrations owned by this thread are invoked from
    /// inside this call.
    fn pump_next_message(&self, thread: NativeThreadId) -> PumpMessage;

    /// Post the quit signal to the queue of `thread` only.
    fn post_quit(&self, thread: NativeThreadId) -> bool;

    /// Hand the event to the next hook in the system-wide chain.
    fn chain_next(&self, handle: Option<HookHandle>, code: i32, event: &RawEvent) -> isize;
}
