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

//! The directory of `*.seq` scripts offered in an interactive session

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::reactor::Control;

const SCRIPT_EXTENSION: &str = "seq";

pub fn default_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kinject"))
}

/// Where the interactive session logs, since its screen is taken.
pub fn default_log_file() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join("kinject").join("kinject.log"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryChange {
    Added { name: String, path: PathBuf },
    Removed { name: String },
}

impl From<LibraryChange> for Control {
    fn from(change: LibraryChange) -> Self {
        match change {
            LibraryChange::Added { name, path } => Control::Added { name, path },
            LibraryChange::Removed { name } => Control::Removed(name),
        }
    }
}

pub struct Library {
    dir: PathBuf,
    known: BTreeMap<String, PathBuf>,
}

fn scan(dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut found = BTreeMap::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != SCRIPT_EXTENSION) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            found.insert(name.to_string(), path.clone());
        }
    }
    Ok(found)
}

impl Library {
    /// Opens `dir`, creating it if needed. Nothing is known until the
    /// first [`Library::refresh`].
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create script directory {}", dir.display()))?;
        Ok(Self {
            dir,
            known: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.known.keys().map(String::as_str)
    }

    /// Rescans the directory and reports what appeared or vanished since
    /// the last scan.
    pub fn refresh(&mut self) -> Result<Vec<LibraryChange>> {
        let found = scan(&self.dir)?;
        let mut changes = Vec::new();

        for name in self.known.keys() {
            if !found.contains_key(name) {
                changes.push(LibraryChange::Removed { name: name.clone() });
            }
        }
        for (name, path) in &found {
            if !self.known.contains_key(name) {
                changes.push(LibraryChange::Added {
                    name: name.clone(),
                    path: path.clone(),
                });
            }
        }

        debug!("{} scripts in {}", found.len(), self.dir.display());
        self.known = found;
        Ok(changes)
    }
}
