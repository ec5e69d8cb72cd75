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

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use kinject::device::{DEVICE_SETTLE, Injector};
use kinject::playback::PlaybackEngine;
use kinject::script::Script;
use kinject::types::PlaybackConfig;
use kinject::{library, terminal};

/// Type scripted keyboard input through a virtual keyboard
#[derive(Parser, Debug)]
#[command(name = "kinject", version, about)]
struct Cli {
    /// Script to play once
    #[arg(required_unless_present = "interactive")]
    script: Option<PathBuf>,

    /// Choose scripts to play and stop from the script directory
    #[arg(short, long, conflicts_with = "script")]
    interactive: bool,

    /// Script directory for --interactive [default: ~/.config/kinject]
    #[arg(
        long,
        value_name = "DIR",
        requires = "interactive",
        conflicts_with = "script"
    )]
    dir: Option<PathBuf>,

    /// Pause after each key event in milliseconds [default: 50, or 10 with --interactive]
    #[arg(long, value_name = "MS")]
    interval: Option<u64>,

    /// Random variation of the pause, as a fraction of it (0.0 to 1.0)
    #[arg(long, default_value_t = 0.0)]
    jitter: f64,

    /// Log file for --interactive [default: ~/.local/state/kinject/kinject.log]
    #[arg(long, value_name = "FILE", requires = "interactive", conflicts_with = "script")]
    log_file: Option<PathBuf>,
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot open log file {}", path.display()))
}

/// Logs go to stderr, or to `log_file` while the terminal list owns the screen.
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = open_log(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.interactive {
        let log_file = match cli.log_file.clone() {
            Some(path) => path,
            None => library::default_log_file().context("Cannot determine the log directory")?,
        };
        init_tracing(Some(&log_file))?;
    } else {
        init_tracing(None)?;
    }

    let base = if cli.interactive {
        PlaybackConfig::cooperative()
    } else {
        PlaybackConfig::synchronous()
    };
    let config = base
        .with_interval(cli.interval.map(Duration::from_millis))
        .with_jitter(cli.jitter);

    let injector = Injector::open().context("Failed to create virtual keyboard")?;

    if cli.interactive {
        let dir = match cli.dir {
            Some(dir) => dir,
            None => library::default_dir().context("Cannot determine the config directory")?,
        };
        return terminal::run(injector, config, dir).await;
    }

    let path = cli.script.context("No script given")?;
    let script = Script::load(&path)?;

    tokio::time::sleep(DEVICE_SETTLE).await;
    let mut engine = PlaybackEngine::new(injector, config)?;
    engine.execute(script).await?;
    Ok(())
}
