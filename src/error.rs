//! Errors surfaced by hook install and uninstall.

use std::any::Any;
use std::time::Duration;

use crate::binding::{HookKind, NativeThreadId};

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The OS returned no handle for the registration.
    #[error("failed to install {kind} hook")]
    InstallFailed { kind: HookKind },

    /// Quit was posted but the pump thread did not exit in time.
    #[error("{kind} hook thread {thread_id} did not exit within {waited:?}")]
    JoinTimeout {
        kind: HookKind,
        thread_id: NativeThreadId,
        waited: Duration,
    },

    #[error("{kind} hook thread panicked during startup")]
    PumpThreadPanicked { kind: HookKind },

    #[error("failed to spawn hook thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("platform not supported: {0}")]
    Unsupported(String),

    #[error("input manager has been disposed")]
    Disposed,
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
