use std::array;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::event::KeyState;
use crate::key::Key;

/// Lock-free state of every key code.
///
/// Written by the dispatch path of the pump threads, read from anywhere.
pub struct StateMap {
    states: [AtomicU8; 256],
}

impl StateMap {
    /// Defined codes start `Up`, unassigned codes `None`.
    pub fn new() -> Self {
        Self {
            states: array::from_fn(|code| AtomicU8::new(initial_state(Key(code as u8)) as u8)),
        }
    }

    /// Record an incoming state and return what was stored.
    ///
    /// `Up` following `Down` is stored as the one-shot `Pressed` edge; everything else
    /// is stored verbatim.
    pub fn apply(&self, key: Key, incoming: KeyState) -> KeyState {
        let slot = &self.states[key.code() as usize];
        let previous = slot
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(collapse(KeyState::from_u8(current), incoming) as u8)
            })
            .unwrap_or_else(|current| current);
        collapse(KeyState::from_u8(previous), incoming)
    }

    /// The recorded state of `key`.
    pub fn get(&self, key: Key) -> KeyState {
        KeyState::from_u8(self.states[key.code() as usize].load(Ordering::Acquire))
    }

    /// Whether `key` is currently down.
    pub fn is_pressed(&self, key: Key) -> bool {
        self.get(key) == KeyState::Down
    }

    /// Consume the `Pressed` edge. Only one caller observes a given edge.
    pub fn was_pressed(&self, key: Key) -> bool {
        self.states[key.code() as usize]
            .compare_exchange(
                KeyState::Pressed as u8,
                KeyState::Up as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Forget everything, including the initial `Up` of defined codes.
    pub fn clear(&self) {
        for slot in &self.states {
            slot.store(KeyState::None as u8, Ordering::Release);
        }
    }
}

impl Default for StateMap {
    fn default() -> Self {
        Self::new()
    }
}

fn initial_state(key: Key) -> KeyState {
    if key.is_defined() {
        KeyState::Up
    } else {
        KeyState::None
    }
}

fn collapse(previous: KeyState, incoming: KeyState) -> KeyState {
    match (previous, incoming) {
        (KeyState::Down, KeyState::Up) => KeyState::Pressed,
        (_, incoming) => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_states() {
        let map = StateMap::new();
        assert_eq!(map.get(Key::A), KeyState::Up);
        assert_eq!(map.get(Key(0x07)), KeyState::None);
    }

    #[test]
    fn test_up_after_down_is_pressed() {
        let map = StateMap::new();
        assert_eq!(map.apply(Key::A, KeyState::Down), KeyState::Down);
        assert!(map.is_pressed(Key::A));
        assert_eq!(map.apply(Key::A, KeyState::Up), KeyState::Pressed);
        assert!(!map.is_pressed(Key::A));
        assert_eq!(map.get(Key::A), KeyState::Pressed);
    }

    #[test]
    fn test_other_transitions_are_verbatim() {
        let map = StateMap::new();
        assert_eq!(map.apply(Key::A, KeyState::Up), KeyState::Up);
        assert_eq!(map.apply(Key::A, KeyState::Down), KeyState::Down);
        assert_eq!(map.apply(Key::A, KeyState::Down), KeyState::Down);
        assert_eq!(map.apply(Key::A, KeyState::Up), KeyState::Pressed);
        assert_eq!(map.apply(Key::A, KeyState::Up), KeyState::Up);
        assert_eq!(map.apply(Key::A, KeyState::Down), KeyState::Down);
    }

    #[test]
    fn test_was_pressed_consumes_once() {
        let map = StateMap::new();
        assert!(!map.was_pressed(Key::SPACE));

        map.apply(Key::SPACE, KeyState::Down);
        assert!(!map.was_pressed(Key::SPACE));
        map.apply(Key::SPACE, KeyState::Up);
        assert!(map.was_pressed(Key::SPACE));
        assert!(!map.was_pressed(Key::SPACE));
        assert_eq!(map.get(Key::SPACE), KeyState::Up);
    }

    #[test]
    fn test_was_pressed_single_consumer_across_threads() {
        let map = Arc::new(StateMap::new());
        map.apply(Key::F1, KeyState::Down);
        map.apply(Key::F1, KeyState::Up);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = Arc::clone(&map);
                thread::spawn(move || map.was_pressed(Key::F1))
            })
            .collect();
        let consumed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&seen| seen)
            .count();
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_clear() {
        let map = StateMap::new();
        map.apply(Key::A, KeyState::Down);
        map.clear();
        assert_eq!(map.get(Key::A), KeyState::None);
        assert_eq!(map.get(Key::LBUTTON), KeyState::None);
    }
}
