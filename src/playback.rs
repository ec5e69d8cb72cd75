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

//! Playback engine for kinject scripts
//!
//! [`PlaybackState`] advances a script by exactly one device event per
//! step. [`PlaybackEngine`] drives it to completion, pausing after every
//! key event; the cooperative session drives it from timers instead.

use anyhow::Result;
use evdev::Key;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::device::{EventWriter, Injector};
use crate::error::{DeviceError, PlaybackError};
use crate::keymap::KeyTable;
use crate::parser::{Cursor, Token};
use crate::script::Script;
use crate::types::{Command, PlaybackConfig};

/// Outcome of one [`PlaybackState::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One key event went out; pace before the next step.
    Emitted,
    /// A DELAY was reached; nothing was emitted.
    Wait(Duration),
    Finished,
}

pub fn resolve(keys: &KeyTable, token: Token<'_>) -> Result<Command, PlaybackError> {
    let find = |name: &str| {
        keys.lookup(name)
            .ok_or_else(|| PlaybackError::KeyNotFound(name.to_string()))
    };

    Ok(match token {
        Token::Tap(name) => Command::PressRelease(find(name)?),
        Token::Char(c) => Command::PressRelease(
            keys.lookup_char(c)
                .ok_or_else(|| PlaybackError::KeyNotFound(c.to_string()))?,
        ),
        Token::Press(name) => Command::SetState(find(name)?, true),
        Token::Release(name) => Command::SetState(find(name)?, false),
        Token::Delay(ms) => Command::Wait(Duration::from_millis(ms)),
        Token::End => Command::EndOfScript,
    })
}

/// A loaded script plus everything needed to resume it between events.
#[derive(Debug)]
pub struct PlaybackState {
    script: Script,
    cursor: Cursor,
    // Second half of a KEY/TYPE tap
    release_pending: Option<Key>,
    // KEY_DOWN keys not yet released, in press order
    held: Vec<Key>,
}

impl PlaybackState {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            cursor: Cursor::new(),
            release_pending: None,
            held: Vec::new(),
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn step<W: EventWriter>(
        &mut self,
        injector: &mut Injector<W>,
    ) -> Result<Step, PlaybackError> {
        if let Some(key) = self.release_pending.take() {
            injector.send_key(key, false)?;
            return Ok(Step::Emitted);
        }

        let token = self.cursor.next(self.script.source())?;
        match resolve(injector.keys(), token)? {
            Command::PressRelease(key) => {
                injector.send_key(key, true)?;
                self.release_pending = Some(key);
                Ok(Step::Emitted)
            }
            Command::SetState(key, true) => {
                injector.send_key(key, true)?;
                if !self.held.contains(&key) {
                    self.held.push(key);
                }
                Ok(Step::Emitted)
            }
            Command::SetState(key, false) => {
                injector.send_key(key, false)?;
                self.held.retain(|held| *held != key);
                Ok(Step::Emitted)
            }
            Command::Wait(duration) => Ok(Step::Wait(duration)),
            Command::EndOfScript => Ok(Step::Finished),
        }
    }

    /// Releases every key this run left down, most recent first.
    ///
    /// Every release is attempted; the first failure is returned.
    pub fn release_held<W: EventWriter>(
        &mut self,
        injector: &mut Injector<W>,
    ) -> Result<(), DeviceError> {
        let mut keys: Vec<Key> = self.release_pending.take().into_iter().collect();
        keys.extend(self.held.drain(..).rev());

        let mut result = Ok(());
        for key in keys {
            debug!("releasing {:?}", key);
            if let Err(e) = injector.send_key(key, false) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Runs one script to completion, pausing after every key event.
pub struct PlaybackEngine<W: EventWriter> {
    injector: Injector<W>,
    config: PlaybackConfig,
    stop: watch::Receiver<bool>,
}

/// Resolves once `true` is sent. A dropped sender never stops playback.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl<W: EventWriter> PlaybackEngine<W> {
    pub fn new(injector: Injector<W>, config: PlaybackConfig) -> Result<Self> {
        let (tx, stop) = watch::channel(false);

        ctrlc::set_handler(move || {
            warn!("received Ctrl-C, stopping playback");
            let _ = tx.send(true);
        })?;

        Ok(Self::with_stop_signal(injector, config, stop))
    }

    pub fn with_stop_signal(
        injector: Injector<W>,
        config: PlaybackConfig,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            injector,
            config,
            stop,
        }
    }

    fn should_continue(&self) -> bool {
        !*self.stop.borrow()
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns false on stop.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            _ = stop_requested(&mut self.stop) => false,
        }
    }

    pub async fn execute(&mut self, script: Script) -> Result<(), PlaybackError> {
        info!("playing {}", script.path().display());
        let mut state = PlaybackState::new(script);

        loop {
            let paused = match state.step(&mut self.injector) {
                Ok(Step::Emitted) => {
                    let delay = self.config.key_delay();
                    self.pause(delay).await
                }
                Ok(Step::Wait(duration)) => self.pause(duration).await,
                Ok(Step::Finished) => {
                    info!("playback finished");
                    return Ok(());
                }
                Err(e) => {
                    if let Err(release) = state.release_held(&mut self.injector) {
                        warn!("could not release held keys: {}", release);
                    }
                    return Err(e);
                }
            };

            if !paused || !self.should_continue() {
                state.release_held(&mut self.injector)?;
                info!("playback interrupted");
                return Ok(());
            }
        }
    }
}
