//! Events emitted by the keyboard and mouse hooks.

use crate::key::Key;
use anyhow::{anyhow, Result};

/// Recorded state of a key or mouse button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum KeyState {
    /// No state has been recorded for this code.
    #[default]
    None = 0,
    /// Released.
    Up = 1,
    /// Held down.
    Down = 2,
    /// Went down and came back up since the last time this was consumed.
    Pressed = 3,
}

impl KeyState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => KeyState::Up,
            2 => KeyState::Down,
            3 => KeyState::Pressed,
            _ => KeyState::None,
        }
    }

    /// Parse a state from a string like "down" or "Pressed".
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "NONE" => Ok(KeyState::None),
            "UP" => Ok(KeyState::Up),
            "DOWN" => Ok(KeyState::Down),
            "PRESSED" => Ok(KeyState::Pressed),
            _ => Err(anyhow!("Unknown key state: {}", s)),
        }
    }
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyState::None => write!(f, "None"),
            KeyState::Up => write!(f, "Up"),
            KeyState::Down => write!(f, "Down"),
            KeyState::Pressed => write!(f, "Pressed"),
        }
    }
}

/// A key went down or up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardEvent {
    pub state: KeyState,
    pub key: Key,
}

/// What happened in a [`MouseEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    /// A button went down or up.
    Button { button: Key, state: KeyState },
    /// The cursor moved. Only reported when mouse-move capture is enabled.
    Move,
    /// Vertical wheel rotation; positive is away from the user.
    Wheel { delta: i16 },
    /// Horizontal wheel rotation; positive is to the right.
    HorizontalWheel { delta: i16 },
}

/// A mouse event with the cursor position in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub action: MouseAction,
    pub x: i32,
    pub y: i32,
}

impl MouseEvent {
    /// The `(state, button)` pair for button events.
    pub fn button(&self) -> Option<(KeyState, Key)> {
        match self.action {
            MouseAction::Button { button, state } => Some((state, button)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse_and_display() {
        for state in [KeyState::None, KeyState::Up, KeyState::Down, KeyState::Pressed] {
            assert_eq!(KeyState::parse(&state.to_string()).unwrap(), state);
        }
        assert_eq!(KeyState::parse(" down ").unwrap(), KeyState::Down);
        assert!(KeyState::parse("held").is_err());
    }

    #[test]
    fn test_state_from_u8() {
        assert_eq!(KeyState::from_u8(KeyState::Pressed as u8), KeyState::Pressed);
        assert_eq!(KeyState::from_u8(200), KeyState::None);
    }

    #[test]
    fn test_mouse_event_button() {
        let event = MouseEvent {
            action: MouseAction::Button {
                button: Key::LBUTTON,
                state: KeyState::Down,
            },
            x: 1,
            y: 2,
        };
        assert_eq!(event.button(), Some((KeyState::Down, Key::LBUTTON)));

        let moved = MouseEvent {
            action: MouseAction::Move,
            x: 1,
            y: 2,
        };
        assert_eq!(moved.button(), None);
    }
}
