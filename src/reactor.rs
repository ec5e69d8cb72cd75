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

//! Timer loop driving a [`PlaybackCoordinator`]
//!
//! One task owns the coordinator and at most one pending wake. Control
//! messages and wakes are handled one at a time, so device writes never
//! overlap.

use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::coordinator::{PlaybackCoordinator, Schedule};
use crate::device::EventWriter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Toggle(String),
    Start(String),
    Stop(String),
    Added { name: String, path: PathBuf },
    Removed(String),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct Wake {
    ticket: u64,
    deadline: Instant,
}

pub struct Reactor<W: EventWriter> {
    coordinator: PlaybackCoordinator<W>,
    control: mpsc::Receiver<Control>,
    pending: Option<Wake>,
}

#[derive(Clone)]
pub struct ReactorHandle {
    tx: mpsc::Sender<Control>,
}

impl ReactorHandle {
    pub async fn send(&self, control: Control) -> Result<(), mpsc::error::SendError<Control>> {
        self.tx.send(control).await
    }
}

pub fn channel<W: EventWriter>(coordinator: PlaybackCoordinator<W>) -> (Reactor<W>, ReactorHandle) {
    let (tx, control) = mpsc::channel(32);
    let reactor = Reactor {
        coordinator,
        control,
        pending: None,
    };
    (reactor, ReactorHandle { tx })
}

async fn wake(pending: Option<Wake>) -> u64 {
    match pending {
        Some(wake) => {
            sleep_until(wake.deadline).await;
            wake.ticket
        }
        None => std::future::pending().await,
    }
}

impl<W: EventWriter> Reactor<W> {
    fn reschedule(&mut self, schedule: Schedule) {
        self.pending = match schedule {
            Schedule::Idle => None,
            Schedule::Wake { ticket, after } => Some(Wake {
                ticket,
                deadline: Instant::now() + after,
            }),
        };
    }

    fn start(&mut self, name: &str, toggle: bool) {
        if toggle && self.coordinator.is_playing(name) {
            self.stop(name);
            return;
        }
        match self.coordinator.start(name) {
            Ok(schedule) => self.reschedule(schedule),
            Err(e) => warn!("{}", e),
        }
    }

    fn stop(&mut self, name: &str) {
        if self.coordinator.is_playing(name) {
            // Cancel the continuation before the script is dropped
            self.pending = None;
            self.coordinator.stop(name);
        }
    }

    /// Returns false once the reactor should exit.
    fn handle(&mut self, control: Control) -> bool {
        debug!("control: {:?}", control);
        match control {
            Control::Toggle(name) => self.start(&name, true),
            Control::Start(name) => self.start(&name, false),
            Control::Stop(name) => self.stop(&name),
            Control::Added { name, path } => self.coordinator.on_script_added(&name, path),
            Control::Removed(name) => {
                self.stop(&name);
                self.coordinator.on_script_removed(&name);
            }
            Control::Shutdown => return false,
        }
        true
    }

    /// Runs until shutdown or until every handle is dropped, then stops
    /// whatever is playing and hands the coordinator back.
    pub async fn run(mut self) -> PlaybackCoordinator<W> {
        loop {
            tokio::select! {
                control = self.control.recv() => {
                    let Some(control) = control else { break };
                    if !self.handle(control) {
                        break;
                    }
                }
                ticket = wake(self.pending) => {
                    let schedule = self.coordinator.resume(ticket);
                    self.reschedule(schedule);
                }
            }
        }

        if let Some(name) = self.coordinator.active().map(str::to_string) {
            self.stop(&name);
        }
        self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{StateChange, StopReason};
    use crate::device::testing::{Recorder, injector};
    use crate::types::PlaybackConfig;
    use evdev::Key;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;
    use tokio::time::sleep;

    struct Session {
        handle: ReactorHandle,
        task: JoinHandle<PlaybackCoordinator<Recorder>>,
        recorder: Recorder,
        changes: tokio::sync::broadcast::Receiver<StateChange>,
        _dir: TempDir,
    }

    async fn session(scripts: &[(&str, &str)]) -> Session {
        let dir = tempfile::tempdir().unwrap();
        let (injector, recorder) = injector();
        let coordinator = PlaybackCoordinator::new(injector, PlaybackConfig::cooperative());
        let changes = coordinator.subscribe();
        let (reactor, handle) = channel(coordinator);
        let task = tokio::spawn(reactor.run());

        for (name, source) in scripts {
            let path = dir.path().join(name);
            fs::write(&path, source).unwrap();
            handle
                .send(Control::Added {
                    name: name.to_string(),
                    path,
                })
                .await
                .unwrap();
        }

        Session {
            handle,
            task,
            recorder,
            changes,
            _dir: dir,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_scenario_to_completion() {
        let mut s = session(&[(
            "demo.seq",
            "KEY A B\nTYPE hi\nDELAY 10\nKEY_DOWN LEFTSHIFT\nKEY_UP LEFTSHIFT\n",
        )])
        .await;

        s.handle.send(Control::Toggle("demo.seq".into())).await.unwrap();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(
            s.recorder.keys(),
            vec![
                (Key::KEY_A, true),
                (Key::KEY_A, false),
                (Key::KEY_B, true),
                (Key::KEY_B, false),
                (Key::KEY_H, true),
                (Key::KEY_H, false),
                (Key::KEY_I, true),
                (Key::KEY_I, false),
                (Key::KEY_LEFTSHIFT, true),
                (Key::KEY_LEFTSHIFT, false),
            ]
        );

        s.handle.send(Control::Shutdown).await.unwrap();
        let coordinator = s.task.await.unwrap();
        assert!(coordinator.active().is_none());

        let mut seen = Vec::new();
        while let Ok(change) = s.changes.try_recv() {
            seen.push(change);
        }
        assert!(seen.contains(&StateChange::Stopped {
            name: "demo.seq".into(),
            reason: StopReason::Completed
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_step() {
        let s = session(&[("slow.seq", "KEY A\nDELAY 1000\nKEY B\n")]).await;

        s.handle.send(Control::Start("slow.seq".into())).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        s.handle.send(Control::Stop("slow.seq".into())).await.unwrap();
        sleep(Duration::from_secs(2)).await;

        assert_eq!(
            s.recorder.keys(),
            vec![(Key::KEY_A, true), (Key::KEY_A, false)]
        );

        s.handle.send(Control::Shutdown).await.unwrap();
        let coordinator = s.task.await.unwrap();
        assert!(!coordinator.is_playing("slow.seq"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_script_cannot_start_while_first_plays() {
        let s = session(&[("a.seq", "DELAY 1000\nKEY A\n"), ("b.seq", "KEY B\n")]).await;

        s.handle.send(Control::Start("a.seq".into())).await.unwrap();
        s.handle.send(Control::Start("b.seq".into())).await.unwrap();
        sleep(Duration::from_secs(2)).await;

        // b was refused; a still ran to the end on its own timer
        assert_eq!(
            s.recorder.keys(),
            vec![(Key::KEY_A, true), (Key::KEY_A, false)]
        );

        s.handle.send(Control::Start("b.seq".into())).await.unwrap();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(s.recorder.keys().len(), 4);

        s.handle.send(Control::Shutdown).await.unwrap();
        s.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_playing_script() {
        let s = session(&[("held.seq", "KEY_DOWN LEFTALT\nDELAY 5000\n")]).await;

        s.handle.send(Control::Start("held.seq".into())).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        s.handle.send(Control::Shutdown).await.unwrap();
        let coordinator = s.task.await.unwrap();

        assert!(coordinator.active().is_none());
        assert_eq!(
            s.recorder.keys(),
            vec![(Key::KEY_LEFTALT, true), (Key::KEY_LEFTALT, false)]
        );
    }
}
