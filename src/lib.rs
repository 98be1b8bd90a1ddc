//! Global keyboard and mouse capture through Windows low-level hooks.
//!
//! This crate installs `WH_KEYBOARD_LL` and `WH_MOUSE_LL` hooks, each on its own
//! message-pump thread, and folds the events into a per-key state map with one-shot
//! "pressed" edges, per-key callbacks and blocking waits.
//!
//! # Features
//!
//! - **Thread-affine hooks** - Every hook is registered, pumped and removed on one
//!   dedicated thread; other threads only post a directed quit
//! - **Always chains** - Every hook call is passed on to the next hook, even when a
//!   handler panics
//! - **Never blocks the hook thread** - Callbacks run on a small worker pool
//! - **Edge-triggered queries** - `was_pressed` reports each press exactly once
//! - **Testable anywhere** - [`mock::MockBinding`] simulates the OS hook machinery
//!
//! # Example
//!
//! ```no_run
//! use lowlevel_input::{InputManager, Key, KeyState};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let input = InputManager::builder().build()?;
//!
//!     input.register_event(Key::F1, |state, key| {
//!         println!("{} is now {}", key, state);
//!     });
//!
//!     // Block until Escape is released after being pressed
//!     input.wait_for_event(Key::ESCAPE, KeyState::Pressed, None);
//!
//!     if input.was_pressed(Key::SPACE) {
//!         println!("space was pressed");
//!     }
//!
//!     // Hooks are removed when `input` is dropped
//!     Ok(())
//! }
//! ```
//!
//! # Platform support
//!
//! The native binding exists only on Windows. Elsewhere `build` fails unless a binding
//! is supplied, such as [`mock::MockBinding`].

mod binding;
mod dispatch;
mod engine;
mod error;
mod event;
mod key;
mod keyboard;
mod lifecycle;
mod manager;
pub mod message;
pub mod mock;
mod mouse;
mod registry;
mod state;
mod trampoline;
mod wait;

#[cfg(target_os = "windows")]
mod windows;

pub use binding::{
    HookBinding, HookHandle, HookKind, KeyboardData, MouseData, NativeThreadId, PumpMessage,
    RawEvent, RawPayload,
};
pub use engine::{HookEngine, DEFAULT_JOIN_TIMEOUT};
pub use error::HookError;
pub use event::{KeyState, KeyboardEvent, MouseAction, MouseEvent};
pub use key::Key;
pub use keyboard::KeyboardHook;
pub use lifecycle::{ExitHook, ExitNotifier, ExitSubscription, ProcessLifecycle};
pub use manager::{InputManager, InputManagerBuilder};
pub use mouse::{MouseButtons, MouseDecoder, MouseHook};
pub use registry::SubscriptionId;
pub use state::StateMap;
pub use trampoline::Trampoline;

#[cfg(target_os = "windows")]
pub use crate::windows::WindowsBinding;

/// Decode one raw keyboard hook call.
pub use keyboard::decode as decode_keyboard;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
