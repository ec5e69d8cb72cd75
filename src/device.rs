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

//! Virtual keyboard management for kinject
//!
//! Creates a uinput keyboard capable of every key in the key table and
//! emits press/release events on it

use evdev::{
    AttributeSet, BusType, EventType, InputEvent, InputId, Key,
    uinput::{VirtualDevice, VirtualDeviceBuilder},
};
use std::io;
use std::time::Duration;
use tracing::info;

use crate::error::DeviceError;
use crate::keymap::KeyTable;

const DEVICE_NAME: &str = "kinject virtual keyboard";

/// Time to let the OS attach a freshly created device before the first event.
pub const DEVICE_SETTLE: Duration = Duration::from_millis(50);

/// Sink for raw input events. The uinput device is the real one; tests
/// record into memory.
pub trait EventWriter {
    fn write_events(&mut self, events: &[InputEvent]) -> io::Result<()>;
}

impl EventWriter for VirtualDevice {
    fn write_events(&mut self, events: &[InputEvent]) -> io::Result<()> {
        self.emit(events)
    }
}

pub struct Keyboard<W = VirtualDevice> {
    writer: W,
}

impl Keyboard<VirtualDevice> {
    pub fn open(keys: &KeyTable) -> Result<Self, DeviceError> {
        let mut capabilities = AttributeSet::<Key>::new();
        for entry in keys.entries() {
            capabilities.insert(entry.code);
        }

        let device = VirtualDeviceBuilder::new()
            .map_err(DeviceError::Open)?
            .name(DEVICE_NAME)
            .input_id(InputId::new(BusType::BUS_USB, 1, 1, 1))
            .with_keys(&capabilities)
            .map_err(DeviceError::RegisterKeys)?
            .build()
            .map_err(DeviceError::Create)?;

        info!("virtual keyboard '{}' created", DEVICE_NAME);
        Ok(Self::from_writer(device))
    }
}

impl<W: EventWriter> Keyboard<W> {
    pub fn from_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Key event followed by SYN_REPORT so subscribers see it as one unit.
    pub fn send_key(&mut self, key: Key, pressed: bool) -> Result<(), DeviceError> {
        let value = if pressed { 1 } else { 0 };
        let events = [
            InputEvent::new(EventType::KEY, key.code(), value),
            InputEvent::new(EventType::SYNCHRONIZATION, 0, 0),
        ];
        self.writer
            .write_events(&events)
            .map_err(|source| DeviceError::Write {
                code: key.code(),
                source,
            })
    }

    #[cfg(test)]
    pub fn writer(&self) -> &W {
        &self.writer
    }
}

/// Everything a playback needs: the key table and the one device it drives.
pub struct Injector<W = VirtualDevice> {
    keys: KeyTable,
    keyboard: Keyboard<W>,
}

impl Injector<VirtualDevice> {
    pub fn open() -> Result<Self, DeviceError> {
        let keys = KeyTable::new();
        let keyboard = Keyboard::open(&keys)?;
        Ok(Self { keys, keyboard })
    }
}

impl<W: EventWriter> Injector<W> {
    pub fn new(keys: KeyTable, keyboard: Keyboard<W>) -> Self {
        Self { keys, keyboard }
    }

    pub fn keys(&self) -> &KeyTable {
        &self.keys
    }

    pub fn send_key(&mut self, key: Key, pressed: bool) -> Result<(), DeviceError> {
        self.keyboard.send_key(key, pressed)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Recorder;
    use super::*;

    #[test]
    fn test_send_key_is_followed_by_sync() {
        let mut keyboard = Keyboard::from_writer(Recorder::default());
        keyboard.send_key(Key::KEY_A, true).unwrap();
        keyboard.send_key(Key::KEY_A, false).unwrap();

        assert_eq!(
            keyboard.writer().events(),
            vec![
                (EventType::KEY, Key::KEY_A.code(), 1),
                (EventType::SYNCHRONIZATION, 0, 0),
                (EventType::KEY, Key::KEY_A.code(), 0),
                (EventType::SYNCHRONIZATION, 0, 0),
            ]
        );
    }

    #[test]
    fn test_press_release_every_key() {
        let keys = KeyTable::new();
        for entry in keys.entries() {
            let mut keyboard = Keyboard::from_writer(Recorder::default());
            keyboard.send_key(entry.code, true).unwrap();
            keyboard.send_key(entry.code, false).unwrap();

            let code = entry.code.code();
            assert_eq!(
                keyboard.writer().events(),
                vec![
                    (EventType::KEY, code, 1),
                    (EventType::SYNCHRONIZATION, 0, 0),
                    (EventType::KEY, code, 0),
                    (EventType::SYNCHRONIZATION, 0, 0),
                ],
                "key {:?}",
                entry.name
            );
        }
    }

    #[test]
    fn test_write_failure_reports_key() {
        let mut keyboard = Keyboard::from_writer(Recorder::failing());
        let err = keyboard.send_key(Key::KEY_B, true).unwrap_err();
        assert!(matches!(err, DeviceError::Write { code, .. } if code == Key::KEY_B.code()));
    }
}
