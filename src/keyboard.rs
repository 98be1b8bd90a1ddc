use std::sync::Arc;
use std::time::Duration;

use crate::binding::{HookBinding, HookKind, RawEvent, RawPayload};
use crate::engine::HookEngine;
use crate::error::HookError;
use crate::event::{KeyState, KeyboardEvent};
use crate::key::Key;
use crate::message::{WM_KEYDOWN, WM_KEYUP, WM_SYSKEYDOWN, WM_SYSKEYUP};

/// Translate one raw keyboard hook call.
///
/// System variants (Alt held) map to the same Down/Up as plain ones.
pub fn decode(raw: &RawEvent) -> Option<KeyboardEvent> {
    let Some(RawPayload::Keyboard(data)) = raw.payload else {
        return None;
    };
    let state = match raw.message {
        WM_KEYDOWN | WM_SYSKEYDOWN => KeyState::Down,
        WM_KEYUP | WM_SYSKEYUP => KeyState::Up,
        _ => return None,
    };
    let key = Key::from_code(data.vk_code)?;
    Some(KeyboardEvent { state, key })
}

/// A low-level keyboard hook that reports decoded events.
///
/// The handler runs on the pump thread and must return quickly.
pub struct KeyboardHook {
    engine: HookEngine,
}

impl KeyboardHook {
    /// Create an uninstalled hook.
    ///
    /// The handler runs on the pump thread and must return quickly.
    pub fn new<F>(binding: Arc<dyn HookBinding>, join_timeout: Duration, handler: F) -> Self
    where
        F: Fn(KeyboardEvent) + Send + Sync + 'static,
    {
        let engine = HookEngine::new(HookKind::Keyboard, binding, move |raw| {
            if let Some(event) = decode(raw) {
                handler(event);
            }
        })
        .with_join_timeout(join_timeout);
        Self { engine }
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

    /// The underlying engine.
    pub fn engine(&self) -> &HookEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{KeyboardData, MouseData};
    use crate::mock::MockBinding;
    use parking_lot::Mutex;

    fn raw(message: u32, vk_code: u32) -> RawEvent {
        RawEvent::keyboard(
            message,
            KeyboardData {
                vk_code,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_decode_down_and_up() {
        assert_eq!(
            decode(&raw(WM_KEYDOWN, 0x41)),
            Some(KeyboardEvent {
                state: KeyState::Down,
                key: Key::A
            })
        );
        assert_eq!(
            decode(&raw(WM_KEYUP, 0x41)),
            Some(KeyboardEvent {
                state: KeyState::Up,
                key: Key::A
            })
        );
    }

    #[test]
    fn test_decode_system_variants() {
        assert_eq!(decode(&raw(WM_SYSKEYDOWN, 0x12)).unwrap().state, KeyState::Down);
        assert_eq!(decode(&raw(WM_SYSKEYUP, 0x12)).unwrap().state, KeyState::Up);
    }

    #[test]
    fn test_decode_rejects_other_input() {
        assert_eq!(decode(&raw(0x0102, 0x41)), None);
        assert_eq!(decode(&raw(WM_KEYDOWN, 0x1FF)), None);
        assert_eq!(
            decode(&RawEvent::mouse(WM_KEYDOWN, MouseData::default())),
            None
        );
        let empty = RawEvent {
            message: WM_KEYDOWN,
            payload: None,
            lparam: 0,
        };
        assert_eq!(decode(&empty), None);
    }

    #[test]
    fn test_hook_reports_decoded_events() {
        let mock = Arc::new(MockBinding::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook = KeyboardHook::new(mock.clone(), Duration::from_secs(2), move |event| {
            sink.lock().push(event)
        });
        assert!(hook.install().unwrap());

        mock.inject(HookKind::Keyboard, raw(WM_KEYDOWN, 0x20));
        mock.inject(HookKind::Keyboard, raw(0x0102, 0x20));
        mock.inject(HookKind::Keyboard, raw(WM_KEYUP, 0x20));
        assert!(mock.wait_idle(Duration::from_secs(5)));

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                KeyboardEvent {
                    state: KeyState::Down,
                    key: Key::SPACE
                },
                KeyboardEvent {
                    state: KeyState::Up,
                    key: Key::SPACE
                },
            ]
        );
        assert_eq!(mock.chain_count(), 3);
        assert!(hook.uninstall().unwrap());
        assert!(!hook.is_installed());
    }
}
