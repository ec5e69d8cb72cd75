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

//! Error kinds shared by the parser, the playback engines and the coordinator

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(
        "failed to open /dev/uinput (is the uinput module loaded and writable by this user?)"
    )]
    Open(#[source] io::Error),
    #[error("failed to register key codes with the virtual device")]
    RegisterKeys(#[source] io::Error),
    #[error("failed to create the virtual device")]
    Create(#[source] io::Error),
    #[error("failed to write event for key code {code}")]
    Write {
        code: u16,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: unknown token: '{text}'")]
    UnknownToken { line: usize, text: String },
    #[error("line {line}: DELAY expects an integer number of milliseconds: '{text}'")]
    MalformedDelay { line: usize, text: String },
    #[error("line {line}: {keyword} needs at least one key name")]
    MissingKey { line: usize, keyword: &'static str },
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("cannot read script {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("key not found: '{0}'")]
    KeyNotFound(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no script named '{0}'")]
    UnknownScript(String),
    #[error("'{0}' is already playing")]
    AlreadyPlaying(String),
    #[error("cannot start '{requested}' while '{active}' is playing")]
    Busy { requested: String, active: String },
    #[error("cannot load '{name}'")]
    Load {
        name: String,
        #[source]
        source: PlaybackError,
    },
}
