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

//! Scripted keyboard input through a Linux uinput virtual keyboard

pub mod coordinator;
pub mod device;
pub mod error;
pub mod keymap;
pub mod library;
pub mod parser;
pub mod playback;
pub mod reactor;
pub mod script;
pub mod terminal;
pub mod types;
