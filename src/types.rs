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

//! Core types for kinject script execution

use evdev::Key;
use rand::Rng;
use std::time::Duration;

/// A parser token with its key names resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PressRelease(Key),
    SetState(Key, bool),
    Wait(Duration),
    EndOfScript,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    // Pause after every key event
    pub key_interval: Duration,
    // Jitter as a fraction (0.0 to 1.0) of key_interval
    pub jitter: f64,
}

impl PlaybackConfig {
    /// Blocking runs leave room for slow consumers of the input stack.
    pub fn synchronous() -> Self {
        Self {
            key_interval: Duration::from_millis(50),
            jitter: 0.0,
        }
    }

    /// Timer-driven runs in an interactive session.
    pub fn cooperative() -> Self {
        Self {
            key_interval: Duration::from_millis(10),
            jitter: 0.0,
        }
    }

    pub fn with_interval(mut self, interval: Option<Duration>) -> Self {
        if let Some(interval) = interval {
            self.key_interval = interval;
        }
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Pause to take after one key event.
    pub fn key_delay(&self) -> Duration {
        let base_ms = self.key_interval.as_millis() as u64;
        let jitter_ms = (base_ms as f64 * self.jitter) as u64;

        if jitter_ms > 0 {
            let variation = rand::rng().random_range(0..=jitter_ms * 2);
            let delay = base_ms.saturating_add(variation).saturating_sub(jitter_ms);
            Duration::from_millis(delay)
        } else {
            Duration::from_millis(base_ms)
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self::synchronous()
    }
}
