use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::binding::{HookBinding, HookKind, MouseData, RawEvent, RawPayload};
use crate::engine::HookEngine;
use crate::error::HookError;
use crate::event::{KeyState, MouseAction, MouseEvent};
use crate::key::Key;
use crate::message::*;

/// Which mouse buttons are held, as last seen by the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseButtons {
    pub left: bool,
    pub right: bool,
    pub middle: bool,
    pub x1: bool,
    pub x2: bool,
}

impl MouseButtons {
    /// Whether `button` is held. Non-button keys are never held.
    pub fn is_down(&self, button: Key) -> bool {
        match button {
            Key::LBUTTON => self.left,
            Key::RBUTTON => self.right,
            Key::MBUTTON => self.middle,
            Key::XBUTTON1 => self.x1,
            Key::XBUTTON2 => self.x2,
            _ => false,
        }
    }

    /// Whether any button is held.
    pub fn any(&self) -> bool {
        self.left || self.right || self.middle || self.x1 || self.x2
    }
}

/// Stateful mouse message translator.
///
/// Button flags are updated before the matching event is emitted. A wheel click has
/// no release message: it is emitted as a middle Down followed by an Up, and its flag
/// stays set until the next message is decoded.
#[derive(Debug, Default)]
pub struct MouseDecoder {
    left: AtomicBool,
    right: AtomicBool,
    middle: AtomicBool,
    wheel_click: AtomicBool,
    x1: AtomicBool,
    x2: AtomicBool,
    capture_move: AtomicBool,
}

impl MouseDecoder {
    /// Create a decoder with no buttons held.
    pub fn new(capture_move: bool) -> Self {
        let decoder = Self::default();
        decoder.set_capture_move(capture_move);
        decoder
    }

    /// Whether moves and scrolls are emitted.
    pub fn capture_move(&self) -> bool {
        self.capture_move.load(Ordering::Relaxed)
    }

    /// Report moves and scrolls in addition to buttons.
    pub fn set_capture_move(&self, capture: bool) {
        self.capture_move.store(capture, Ordering::Relaxed);
    }

    /// Snapshot of the held buttons, including a wheel click being dispatched.
    pub fn buttons(&self) -> MouseButtons {
        MouseButtons {
            left: self.left.load(Ordering::Acquire),
            right: self.right.load(Ordering::Acquire),
            middle: self.middle.load(Ordering::Acquire) || self.wheel_click.load(Ordering::Acquire),
            x1: self.x1.load(Ordering::Acquire),
            x2: self.x2.load(Ordering::Acquire),
        }
    }

    /// Whether `button` is held.
    pub fn is_down(&self, button: Key) -> bool {
        self.buttons().is_down(button)
    }

    /// Forget every held button.
    pub fn reset(&self) {
        for flag in [
            &self.left,
            &self.right,
            &self.middle,
            &self.wheel_click,
            &self.x1,
            &self.x2,
        ] {
            flag.store(false, Ordering::Release);
        }
    }

    /// Decode one raw mouse hook call, emitting zero, one or two events.
    pub fn decode(&self, raw: &RawEvent, mut emit: impl FnMut(MouseEvent)) {
        self.wheel_click.store(false, Ordering::Release);

        let Some(RawPayload::Mouse(data)) = raw.payload else {
            return;
        };
        let mut button = |key: Key, state: KeyState| {
            if let Some(flag) = self.flag(key) {
                flag.store(state == KeyState::Down, Ordering::Release);
            }
            emit(at(&data, MouseAction::Button { button: key, state }));
        };

        match raw.message {
            WM_LBUTTONDOWN => button(Key::LBUTTON, KeyState::Down),
            WM_LBUTTONUP => button(Key::LBUTTON, KeyState::Up),
            WM_RBUTTONDOWN => button(Key::RBUTTON, KeyState::Down),
            WM_RBUTTONUP => button(Key::RBUTTON, KeyState::Up),
            WM_MBUTTONDOWN => button(Key::MBUTTON, KeyState::Down),
            WM_MBUTTONUP => button(Key::MBUTTON, KeyState::Up),
            WM_XBUTTONDOWN | WM_NCXBUTTONDOWN => button(x_button(&data), KeyState::Down),
            WM_XBUTTONUP | WM_NCXBUTTONUP => button(x_button(&data), KeyState::Up),

            WM_LBUTTONDBLCLK | WM_NCLBUTTONDBLCLK => {
                button(Key::LBUTTON, KeyState::Down);
                button(Key::LBUTTON, KeyState::Up);
            }
            WM_RBUTTONDBLCLK | WM_NCRBUTTONDBLCLK => {
                button(Key::RBUTTON, KeyState::Down);
                button(Key::RBUTTON, KeyState::Up);
            }
            WM_MBUTTONDBLCLK | WM_NCMBUTTONDBLCLK => {
                button(Key::MBUTTON, KeyState::Down);
                button(Key::MBUTTON, KeyState::Up);
            }
            WM_XBUTTONDBLCLK | WM_NCXBUTTONDBLCLK => {
                let key = x_button(&data);
                button(key, KeyState::Down);
                button(key, KeyState::Up);
            }

            WM_MOUSEWHEEL | WM_MOUSEHWHEEL if is_wheel_click(&data) => {
                self.wheel_click.store(true, Ordering::Release);
                let click = |state| MouseAction::Button {
                    button: Key::MBUTTON,
                    state,
                };
                emit(at(&data, click(KeyState::Down)));
                // A held middle button keeps its own Down; otherwise close the click.
                if !self.middle.load(Ordering::Acquire) {
                    emit(at(&data, click(KeyState::Up)));
                }
            }
            WM_MOUSEWHEEL if self.capture_move() => {
                let delta = high_word(data.mouse_data) as i16;
                emit(at(&data, MouseAction::Wheel { delta }));
            }
            WM_MOUSEHWHEEL if self.capture_move() => {
                let delta = high_word(data.mouse_data) as i16;
                emit(at(&data, MouseAction::HorizontalWheel { delta }));
            }
            WM_MOUSEMOVE if self.capture_move() => emit(at(&data, MouseAction::Move)),
            _ => {}
        }
    }

    fn flag(&self, button: Key) -> Option<&AtomicBool> {
        match button {
            Key::LBUTTON => Some(&self.left),
            Key::RBUTTON => Some(&self.right),
            Key::MBUTTON => Some(&self.middle),
            Key::XBUTTON1 => Some(&self.x1),
            Key::XBUTTON2 => Some(&self.x2),
            _ => None,
        }
    }
}

fn at(data: &MouseData, action: MouseAction) -> MouseEvent {
    MouseEvent {
        action,
        x: data.x,
        y: data.y,
    }
}

fn x_button(data: &MouseData) -> Key {
    if high_word(data.mouse_data) == XBUTTON1 {
        Key::XBUTTON1
    } else {
        Key::XBUTTON2
    }
}

// The wheel button is reported through the wheel message's low word.
fn is_wheel_click(data: &MouseData) -> bool {
    low_word(data.mouse_data) as i16 == WHEEL_DELTA
}

/// A low-level mouse hook that reports decoded events.
pub struct MouseHook {
    engine: HookEngine,
    decoder: Arc<MouseDecoder>,
}

impl MouseHook {
    /// The handler runs on the pump thread and must return quickly.
    pub fn new<F>(
        binding: Arc<dyn HookBinding>,
        join_timeout: Duration,
        capture_move: bool,
        handler: F,
    ) -> Self
    where
        F: Fn(MouseEvent) + Send + Sync + 'static,
    {
        let decoder = Arc::new(MouseDecoder::new(capture_move));
        let hook_decoder = Arc::clone(&decoder);
        let engine = HookEngine::new(HookKind::Mouse, binding, move |raw| {
            hook_decoder.decode(raw, &handler);
        })
        .with_join_timeout(join_timeout);
        Self { engine, decoder }
    }

    /// Install the hook. Returns `Ok(false)` if it was already installed.
    pub fn install(&self) -> Result<bool, HookError> {
        self.engine.install()
    }

    /// Remove the hook. Returns `Ok(false)` if it was not installed.
    pub fn uninstall(&self) -> Result<bool, HookError> {
        self.engine.uninstall()
    }

    /// Whether the hook is installed.
    pub fn is_installed(&self) -> bool {
        self.engine.is_installed()
    }

    /// The decoder, for button state and capture settings.
    pub fn decoder(&self) -> &MouseDecoder {
        &self.decoder
    }

    /// The underlying engine.
    pub fn engine(&self) -> &HookEngine {
        &self.engine
    }
}
