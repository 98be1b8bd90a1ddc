//! Virtual key codes shared by keyboard keys and mouse buttons.

use anyhow::{anyhow, Result};

/// A Windows virtual key code.
///
/// Mouse buttons live in the same code space as keyboard keys (`LBUTTON`, `RBUTTON`,
/// `MBUTTON`, `XBUTTON1`, `XBUTTON2`), so a single state map covers both devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub u8);

impl Key {
    pub const LBUTTON: Key = Key(0x01);
    pub const RBUTTON: Key = Key(0x02);
    pub const CANCEL: Key = Key(0x03);
    pub const MBUTTON: Key = Key(0x04);
    pub const XBUTTON1: Key = Key(0x05);
    pub const XBUTTON2: Key = Key(0x06);
    pub const BACK: Key = Key(0x08);
    pub const TAB: Key = Key(0x09);
    pub const RETURN: Key = Key(0x0D);
    pub const SHIFT: Key = Key(0x10);
    pub const CONTROL: Key = Key(0x11);
    pub const MENU: Key = Key(0x12);
    pub const PAUSE: Key = Key(0x13);
    pub const CAPITAL: Key = Key(0x14);
    pub const ESCAPE: Key = Key(0x1B);
    pub const SPACE: Key = Key(0x20);
    pub const LEFT: Key = Key(0x25);
    pub const UP: Key = Key(0x26);
    pub const RIGHT: Key = Key(0x27);
    pub const DOWN: Key = Key(0x28);
    pub const INSERT: Key = Key(0x2D);
    pub const DELETE: Key = Key(0x2E);
    pub const A: Key = Key(0x41);
    pub const Z: Key = Key(0x5A);
    pub const F1: Key = Key(0x70);
    pub const F12: Key = Key(0x7B);
    pub const NUMLOCK: Key = Key(0x90);
    pub const SCROLL: Key = Key(0x91);
    pub const LSHIFT: Key = Key(0xA0);
    pub const RSHIFT: Key = Key(0xA1);
    pub const LCONTROL: Key = Key(0xA2);
    pub const RCONTROL: Key = Key(0xA3);
    pub const LMENU: Key = Key(0xA4);
    pub const RMENU: Key = Key(0xA5);
    pub const NONAME: Key = Key(0xFC);

    /// Convert a raw code reported by the OS. Codes outside `0..=255` have no key.
    pub fn from_code(code: u32) -> Option<Self> {
        u8::try_from(code).ok().map(Key)
    }

    /// The virtual-key code.
    pub fn code(self) -> u8 {
        self.0
    }

    /// Canonical name of this code, or `None` for unassigned codes.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0x01 => "LBUTTON",
            0x02 => "RBUTTON",
            0x03 => "CANCEL",
            0x04 => "MBUTTON",
            0x05 => "XBUTTON1",
            0x06 => "XBUTTON2",
            0x08 => "BACK",
            0x09 => "TAB",
            0x0C => "CLEAR",
            0x0D => "RETURN",
            0x10 => "SHIFT",
            0x11 => "CONTROL",
            0x12 => "MENU",
            0x13 => "PAUSE",
            0x14 => "CAPITAL",
            0x15 => "KANA",
            0x17 => "JUNJA",
            0x18 => "FINAL",
            0x19 => "KANJI",
            0x1B => "ESCAPE",
            0x1C => "CONVERT",
            0x1D => "NONCONVERT",
            0x1E => "ACCEPT",
            0x1F => "MODECHANGE",
            0x20 => "SPACE",
            0x21 => "PRIOR",
            0x22 => "NEXT",
            0x23 => "END",
            0x24 => "HOME",
            0x25 => "LEFT",
            0x26 => "UP",
            0x27 => "RIGHT",
            0x28 => "DOWN",
            0x29 => "SELECT",
            0x2A => "PRINT",
            0x2B => "EXECUTE",
            0x2C => "SNAPSHOT",
            0x2D => "INSERT",
            0x2E => "DELETE",
            0x2F => "HELP",
            0x30..=0x39 => DIGITS[(self.0 - 0x30) as usize],
            0x41..=0x5A => LETTERS[(self.0 - 0x41) as usize],
            0x5B => "LWIN",
            0x5C => "RWIN",
            0x5D => "APPS",
            0x5F => "SLEEP",
            0x60..=0x69 => NUMPAD[(self.0 - 0x60) as usize],
            0x6A => "MULTIPLY",
            0x6B => "ADD",
            0x6C => "SEPARATOR",
            0x6D => "SUBTRACT",
            0x6E => "DECIMAL",
            0x6F => "DIVIDE",
            0x70..=0x87 => FUNCTION[(self.0 - 0x70) as usize],
            0x90 => "NUMLOCK",
            0x91 => "SCROLL",
            0xA0 => "LSHIFT",
            0xA1 => "RSHIFT",
            0xA2 => "LCONTROL",
            0xA3 => "RCONTROL",
            0xA4 => "LMENU",
            0xA5 => "RMENU",
            0xA6 => "BROWSER_BACK",
            0xA7 => "BROWSER_FORWARD",
            0xA8 => "BROWSER_REFRESH",
            0xA9 => "BROWSER_STOP",
            0xAA => "BROWSER_SEARCH",
            0xAB => "BROWSER_FAVORITES",
            0xAC => "BROWSER_HOME",
            0xAD => "VOLUME_MUTE",
            0xAE => "VOLUME_DOWN",
            0xAF => "VOLUME_UP",
            0xB0 => "MEDIA_NEXT_TRACK",
            0xB1 => "MEDIA_PREV_TRACK",
            0xB2 => "MEDIA_STOP",
            0xB3 => "MEDIA_PLAY_PAUSE",
            0xB4 => "LAUNCH_MAIL",
            0xB5 => "LAUNCH_MEDIA_SELECT",
            0xB6 => "LAUNCH_APP1",
            0xB7 => "LAUNCH_APP2",
            0xBA => "OEM_1",
            0xBB => "OEM_PLUS",
            0xBC => "OEM_COMMA",
            0xBD => "OEM_MINUS",
            0xBE => "OEM_PERIOD",
            0xBF => "OEM_2",
            0xC0 => "OEM_3",
            0xDB => "OEM_4",
            0xDC => "OEM_5",
            0xDD => "OEM_6",
            0xDE => "OEM_7",
            0xDF => "OEM_8",
            0xE2 => "OEM_102",
            0xE5 => "PROCESSKEY",
            0xE7 => "PACKET",
            0xF6 => "ATTN",
            0xF7 => "CRSEL",
            0xF8 => "EXSEL",
            0xF9 => "EREOF",
            0xFA => "PLAY",
            0xFB => "ZOOM",
            0xFC => "NONAME",
            0xFD => "PA1",
            0xFE => "OEM_CLEAR",
            _ => return None,
        };
        Some(name)
    }

    /// Whether this code has a canonical name.
    pub fn is_defined(self) -> bool {
        self.name().is_some()
    }

    /// Whether this code belongs to a mouse button.
    pub fn is_mouse_button(self) -> bool {
        matches!(
            self,
            Key::LBUTTON | Key::RBUTTON | Key::MBUTTON | Key::XBUTTON1 | Key::XBUTTON2
        )
    }

    /// All defined codes in ascending order.
    pub fn defined() -> impl Iterator<Item = Key> {
        (0..=u8::MAX).map(Key).filter(|key| key.is_defined())
    }

    /// Parse a key from its canonical name ("F8", "lbutton") or a hex code ("0x41").
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let code =
                u8::from_str_radix(hex, 16).map_err(|_| anyhow!("Invalid key code: {}", s))?;
            return Ok(Key(code));
        }
        let upper = s.to_uppercase();
        Key::defined()
            .find(|key| key.name() == Some(upper.as_str()))
            .ok_or_else(|| anyhow!("Unknown key: {}", s))
    }
}

const DIGITS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

const LETTERS: [&str; 26] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
    "T", "U", "V", "W", "X", "Y", "Z",
];

const NUMPAD: [&str; 10] = [
    "NUMPAD0", "NUMPAD1", "NUMPAD2", "NUMPAD3", "NUMPAD4", "NUMPAD5", "NUMPAD6", "NUMPAD7",
    "NUMPAD8", "NUMPAD9",
];

const FUNCTION: [&str; 24] = [
    "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "F13", "F14",
    "F15", "F16", "F17", "F18", "F19", "F20", "F21", "F22", "F23", "F24",
];

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "0x{:02X}", self.0),
        }
    }
}

impl std::str::FromStr for Key {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Key::parse(s)
    }
}
