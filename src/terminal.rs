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

//! Interactive terminal session
//!
//! Lists the scripts in the library and toggles them from the keyboard
//! while the reactor plays them in the background

use anyhow::{Context, Result};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType, disable_raw_mode, enable_raw_mode};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::coordinator::{PlaybackCoordinator, StateChange, StopReason};
use crate::device::{EventWriter, Injector};
use crate::library::Library;
use crate::reactor::{self, Control, ReactorHandle};
use crate::types::PlaybackConfig;

/// How often the script directory is checked for added or removed files.
const RESCAN_INTERVAL: Duration = Duration::from_secs(2);

// RAII guard for terminal raw mode - only enables if stdout is a TTY
struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    fn new() -> Result<Self> {
        let enabled = if std::io::stdout().is_terminal() {
            enable_raw_mode().context("Failed to enable raw mode")?;
            true
        } else {
            false
        };
        Ok(RawModeGuard { enabled })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = disable_raw_mode();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Toggle(usize),
    Rescan,
    Quit,
}

fn translate(key: KeyEvent) -> Option<Input> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Input::Quit),
        KeyCode::Char('q') | KeyCode::Esc => Some(Input::Quit),
        KeyCode::Char('r') => Some(Input::Rescan),
        KeyCode::Char(c @ '1'..='9') => Some(Input::Toggle(c as usize - '1' as usize)),
        _ => None,
    }
}

/// Reads terminal keys on its own thread until `running` is cleared.
struct InputReader {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl InputReader {
    fn spawn(tx: mpsc::UnboundedSender<(Input, KeyEvent)>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();

        let thread = thread::spawn(move || {
            while r.load(Ordering::SeqCst) {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => break,
                }
                let Ok(Event::Key(key)) = event::read() else {
                    continue;
                };
                if let Some(input) = translate(key) {
                    if tx.send((input, key)).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            running,
            thread: Some(thread),
        }
    }
}

impl Drop for InputReader {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
struct View {
    names: Vec<String>,
    playing: Option<String>,
    status: String,
}

impl View {
    /// While a script plays, the terminal usually still has focus and
    /// receives whatever the script types. Only the playing row's number
    /// and Ctrl-C get through.
    fn accept(&self, input: Input, key: &KeyEvent) -> bool {
        let Some(playing) = &self.playing else {
            return true;
        };
        match input {
            Input::Toggle(i) => self.names.get(i) == Some(playing),
            Input::Quit => {
                key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
            }
            Input::Rescan => false,
        }
    }

    fn apply(&mut self, change: &StateChange) {
        match change {
            StateChange::Started { name } => {
                self.playing = Some(name.clone());
                self.status = format!("playing {}", name);
            }
            StateChange::Stopped { name, reason } => {
                if self.playing.as_deref() == Some(name.as_str()) {
                    self.playing = None;
                }
                self.status = match reason {
                    StopReason::Failed(e) => format!("{} failed: {}", name, e),
                    _ => format!("{} stopped", name),
                };
            }
            StateChange::Added { .. } | StateChange::Removed { .. } => {}
        }
    }

    fn render(&self, dir: &std::path::Path) -> Result<()> {
        let mut stdout = std::io::stdout();
        execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;

        // Raw mode needs explicit carriage returns
        write!(stdout, "kinject: {}\r\n\r\n", dir.display())?;
        if self.names.is_empty() {
            write!(stdout, "  no *.seq scripts yet\r\n")?;
        }
        for (i, name) in self.names.iter().enumerate() {
            let state = match &self.playing {
                Some(playing) if playing == name => "playing ",
                Some(_) => "disabled",
                None => "ready   ",
            };
            if i < 9 {
                write!(stdout, "  [{}] {} {}\r\n", i + 1, state, name)?;
            } else {
                write!(stdout, "      {} {}\r\n", state, name)?;
            }
        }
        write!(
            stdout,
            "\r\n  {}\r\n  {}\r\n",
            if self.playing.is_some() {
                "playing: only its number or Ctrl-C is accepted"
            } else {
                "1-9 play/stop   r rescan   q quit"
            },
            self.status
        )?;
        stdout.flush()?;
        Ok(())
    }
}

/// Returns whether the script list changed.
async fn rescan(library: &mut Library, handle: &ReactorHandle, view: &mut View) -> Result<bool> {
    let changes = library.refresh()?;
    let changed = !changes.is_empty();
    for change in changes {
        handle.send(change.into()).await?;
    }
    view.names = library.names().map(str::to_string).collect();
    Ok(changed)
}

pub async fn run<W>(injector: Injector<W>, config: PlaybackConfig, dir: PathBuf) -> Result<()>
where
    W: EventWriter + Send + 'static,
{
    let mut library = Library::open(dir)?;
    let coordinator = PlaybackCoordinator::new(injector, config);
    let mut changes = coordinator.subscribe();
    let (reactor, handle) = reactor::channel(coordinator);
    let reactor_task = tokio::spawn(reactor.run());

    let mut view = View::default();
    rescan(&mut library, &handle, &mut view).await?;
    info!("{} scripts in {}", view.names.len(), library.dir().display());

    let _raw_mode_guard = RawModeGuard::new()?;
    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    let reader = InputReader::spawn(input_tx);

    let mut rescan_timer = tokio::time::interval(RESCAN_INTERVAL);
    rescan_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    view.render(library.dir())?;
    loop {
        tokio::select! {
            input = input_rx.recv() => {
                let Some((input, key)) = input else { break };
                if !view.accept(input, &key) {
                    continue;
                }
                match input {
                    Input::Toggle(i) => {
                        if let Some(name) = view.names.get(i) {
                            handle.send(Control::Toggle(name.clone())).await?;
                        }
                    }
                    Input::Rescan => {
                        rescan(&mut library, &handle, &mut view).await?;
                    }
                    Input::Quit => break,
                }
            }
            _ = rescan_timer.tick() => {
                if !rescan(&mut library, &handle, &mut view).await? {
                    continue;
                }
            }
            change = changes.recv() => {
                match change {
                    Ok(change) => view.apply(&change),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("missed {} state changes", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        view.render(library.dir())?;
    }

    drop(reader);
    handle.send(Control::Shutdown).await?;
    reactor_task.await.context("Reactor task failed")?;
    Ok(())
}
