// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Key names and typeable characters mapped to kernel key codes
//!
//! Names are matched case-insensitively. Single characters share the
//! table with names, so `a`, `A` and `;` are all valid lookups.

use evdev::Key;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct KeyEntry {
    pub code: Key,
    pub name: &'static str,
}

const fn entry(code: Key, name: &'static str) -> KeyEntry {
    KeyEntry { code, name }
}

const KEYMAP: &[KeyEntry] = &[
    entry(Key::KEY_ESC, "ESCAPE"),
    entry(Key::KEY_ESC, "ESC"),
    entry(Key::KEY_1, "1"),
    entry(Key::KEY_2, "2"),
    entry(Key::KEY_3, "3"),
    entry(Key::KEY_4, "4"),
    entry(Key::KEY_5, "5"),
    entry(Key::KEY_6, "6"),
    entry(Key::KEY_7, "7"),
    entry(Key::KEY_8, "8"),
    entry(Key::KEY_9, "9"),
    entry(Key::KEY_0, "0"),
    entry(Key::KEY_MINUS, "-"),
    entry(Key::KEY_EQUAL, "="),
    entry(Key::KEY_BACKSPACE, "BACKSPACE"),
    entry(Key::KEY_TAB, "TAB"),
    entry(Key::KEY_TAB, "\t"),
    entry(Key::KEY_Q, "Q"),
    entry(Key::KEY_W, "W"),
    entry(Key::KEY_E, "E"),
    entry(Key::KEY_R, "R"),
    entry(Key::KEY_T, "T"),
    entry(Key::KEY_Y, "Y"),
    entry(Key::KEY_U, "U"),
    entry(Key::KEY_I, "I"),
    entry(Key::KEY_O, "O"),
    entry(Key::KEY_P, "P"),
    entry(Key::KEY_LEFTBRACE, "LEFTBRACE"),
    entry(Key::KEY_LEFTBRACE, "["),
    entry(Key::KEY_RIGHTBRACE, "RIGHTBRACE"),
    entry(Key::KEY_RIGHTBRACE, "]"),
    entry(Key::KEY_ENTER, "ENTER"),
    entry(Key::KEY_LEFTCTRL, "LEFTCTRL"),
    entry(Key::KEY_A, "A"),
    entry(Key::KEY_S, "S"),
    entry(Key::KEY_D, "D"),
    entry(Key::KEY_F, "F"),
    entry(Key::KEY_G, "G"),
    entry(Key::KEY_H, "H"),
    entry(Key::KEY_J, "J"),
    entry(Key::KEY_K, "K"),
    entry(Key::KEY_L, "L"),
    entry(Key::KEY_SEMICOLON, ";"),
    entry(Key::KEY_APOSTROPHE, "'"),
    entry(Key::KEY_GRAVE, "GRAVE"),
    entry(Key::KEY_GRAVE, "`"),
    entry(Key::KEY_LEFTSHIFT, "LEFTSHIFT"),
    entry(Key::KEY_BACKSLASH, "\\"),
    entry(Key::KEY_Z, "Z"),
    entry(Key::KEY_X, "X"),
    entry(Key::KEY_C, "C"),
    entry(Key::KEY_V, "V"),
    entry(Key::KEY_B, "B"),
    entry(Key::KEY_N, "N"),
    entry(Key::KEY_M, "M"),
    entry(Key::KEY_COMMA, ","),
    entry(Key::KEY_DOT, "."),
    entry(Key::KEY_SLASH, "/"),
    entry(Key::KEY_RIGHTSHIFT, "RIGHTSHIFT"),
    entry(Key::KEY_KPASTERISK, "KPASTERISK"),
    entry(Key::KEY_LEFTALT, "LEFTALT"),
    entry(Key::KEY_SPACE, " "),
    entry(Key::KEY_SPACE, "SPACE"),
    entry(Key::KEY_CAPSLOCK, "CAPSLOCK"),
    entry(Key::KEY_F1, "F1"),
    entry(Key::KEY_F2, "F2"),
    entry(Key::KEY_F3, "F3"),
    entry(Key::KEY_F4, "F4"),
    entry(Key::KEY_F5, "F5"),
    entry(Key::KEY_F6, "F6"),
    entry(Key::KEY_F7, "F7"),
    entry(Key::KEY_F8, "F8"),
    entry(Key::KEY_F9, "F9"),
    entry(Key::KEY_F10, "F10"),
    entry(Key::KEY_NUMLOCK, "NUMLOCK"),
    entry(Key::KEY_SCROLLLOCK, "SCROLLLOCK"),
    entry(Key::KEY_KP7, "KP7"),
    entry(Key::KEY_KP8, "KP8"),
    entry(Key::KEY_KP9, "KP9"),
    entry(Key::KEY_KPMINUS, "KPMINUS"),
    entry(Key::KEY_KP4, "KP4"),
    entry(Key::KEY_KP5, "KP5"),
    entry(Key::KEY_KP6, "KP6"),
    entry(Key::KEY_KPPLUS, "KPPLUS"),
    entry(Key::KEY_KP1, "KP1"),
    entry(Key::KEY_KP2, "KP2"),
    entry(Key::KEY_KP3, "KP3"),
    entry(Key::KEY_KP0, "KP0"),
    entry(Key::KEY_KPDOT, "KPDOT"),
    entry(Key::KEY_F11, "F11"),
    entry(Key::KEY_F12, "F12"),
    entry(Key::KEY_KPJPCOMMA, "KPJPCOMMA"),
    entry(Key::KEY_KPENTER, "KPENTER"),
    entry(Key::KEY_RIGHTCTRL, "RIGHTCTRL"),
    entry(Key::KEY_KPSLASH, "KPSLASH"),
    entry(Key::KEY_SYSRQ, "SYSRQ"),
    entry(Key::KEY_RIGHTALT, "RIGHTALT"),
    entry(Key::KEY_LINEFEED, "LINEFEED"),
    entry(Key::KEY_HOME, "HOME"),
    entry(Key::KEY_UP, "UP"),
    entry(Key::KEY_PAGEUP, "PAGEUP"),
    entry(Key::KEY_LEFT, "LEFT"),
    entry(Key::KEY_RIGHT, "RIGHT"),
    entry(Key::KEY_END, "END"),
    entry(Key::KEY_DOWN, "DOWN"),
    entry(Key::KEY_PAGEDOWN, "PAGEDOWN"),
    entry(Key::KEY_INSERT, "INSERT"),
    entry(Key::KEY_DELETE, "DELETE"),
    entry(Key::KEY_MACRO, "MACRO"),
    entry(Key::KEY_MUTE, "MUTE"),
    entry(Key::KEY_VOLUMEDOWN, "VOLUMEDOWN"),
    entry(Key::KEY_VOLUMEUP, "VOLUMEUP"),
    entry(Key::KEY_KPEQUAL, "KPEQUAL"),
    entry(Key::KEY_KPPLUSMINUS, "KPPLUSMINUS"),
    entry(Key::KEY_PAUSE, "PAUSE"),
    entry(Key::KEY_KPCOMMA, "KPCOMMA"),
    entry(Key::KEY_LEFTMETA, "LEFTMETA"),
    entry(Key::KEY_RIGHTMETA, "RIGHTMETA"),
    entry(Key::KEY_COMPOSE, "COMPOSE"),
    entry(Key::KEY_NEXTSONG, "NEXTSONG"),
    entry(Key::KEY_PLAYPAUSE, "PLAYPAUSE"),
    entry(Key::KEY_PREVIOUSSONG, "PREVIOUSSONG"),
    entry(Key::KEY_STOPCD, "STOPCD"),
    entry(Key::KEY_SCROLLUP, "SCROLLUP"),
    entry(Key::KEY_SCROLLDOWN, "SCROLLDOWN"),
    entry(Key::KEY_F13, "F13"),
    entry(Key::KEY_F14, "F14"),
    entry(Key::KEY_F15, "F15"),
    entry(Key::KEY_F16, "F16"),
    entry(Key::KEY_F17, "F17"),
    entry(Key::KEY_F18, "F18"),
    entry(Key::KEY_F19, "F19"),
    entry(Key::KEY_F20, "F20"),
    entry(Key::KEY_F21, "F21"),
    entry(Key::KEY_F22, "F22"),
    entry(Key::KEY_F23, "F23"),
    entry(Key::KEY_F24, "F24"),
];

/// Read-only lookup table, built once and shared by every playback.
#[derive(Debug)]
pub struct KeyTable {
    by_name: HashMap<String, KeyEntry>,
}

impl KeyTable {
    pub fn new() -> Self {
        let by_name = KEYMAP
            .iter()
            .map(|entry| (entry.name.to_lowercase(), *entry))
            .collect();
        Self { by_name }
    }

    pub fn lookup(&self, name: &str) -> Option<Key> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|entry| entry.code)
    }

    pub fn lookup_char(&self, c: char) -> Option<Key> {
        let mut buf = [0u8; 4];
        self.lookup(c.encode_utf8(&mut buf))
    }

    /// Every entry in the table, aliases included.
    pub fn entries(&self) -> impl Iterator<Item = &KeyEntry> {
        self.by_name.values()
    }
}

impl Default for KeyTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let keys = KeyTable::new();
        assert_eq!(keys.lookup("ENTER"), Some(Key::KEY_ENTER));
        assert_eq!(keys.lookup("enter"), keys.lookup("ENTER"));
        assert_eq!(keys.lookup("Enter"), keys.lookup("ENTER"));
    }

    #[test]
    fn test_lookup_unknown_name() {
        let keys = KeyTable::new();
        assert_eq!(keys.lookup("NOPE"), None);
        assert_eq!(keys.lookup(""), None);
    }

    #[test]
    fn test_lookup_char() {
        let keys = KeyTable::new();
        assert_eq!(keys.lookup_char('h'), Some(Key::KEY_H));
        assert_eq!(keys.lookup_char('H'), Some(Key::KEY_H));
        assert_eq!(keys.lookup_char(' '), Some(Key::KEY_SPACE));
        assert_eq!(keys.lookup_char(';'), Some(Key::KEY_SEMICOLON));
        assert_eq!(keys.lookup_char('\\'), Some(Key::KEY_BACKSLASH));
        assert_eq!(keys.lookup_char('é'), None);
    }

    #[test]
    fn test_names_unique_after_lowercasing() {
        let mut seen = HashSet::new();
        for entry in KEYMAP {
            assert!(
                seen.insert(entry.name.to_lowercase()),
                "duplicate key name {:?}",
                entry.name
            );
        }
        assert_eq!(KeyTable::new().entries().count(), KEYMAP.len());
    }
}
