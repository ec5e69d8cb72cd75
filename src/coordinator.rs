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

//! Cooperative playback of a collection of scripts
//!
//! The coordinator never sleeps. Each call emits at most one key event and
//! returns a [`Schedule`] telling the caller when to call
//! [`PlaybackCoordinator::resume`] next. At most one script plays at a time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::device::{EventWriter, Injector};
use crate::error::{CoordinatorError, PlaybackError};
use crate::playback::{PlaybackState, Step};
use crate::script::Script;
use crate::types::PlaybackConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Stopped,
    Removed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Added { name: String },
    Removed { name: String },
    Started { name: String },
    Stopped { name: String, reason: StopReason },
}

/// What the driver should do after a coordinator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Idle,
    Wake { ticket: u64, after: Duration },
}

struct Active {
    name: String,
    ticket: u64,
    state: PlaybackState,
}

pub struct PlaybackCoordinator<W: EventWriter> {
    injector: Injector<W>,
    config: PlaybackConfig,
    items: BTreeMap<String, PathBuf>,
    active: Option<Active>,
    next_ticket: u64,
    changes: broadcast::Sender<StateChange>,
}

impl<W: EventWriter> PlaybackCoordinator<W> {
    pub fn new(injector: Injector<W>, config: PlaybackConfig) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            injector,
            config,
            items: BTreeMap::new(),
            active: None,
            next_ticket: 0,
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: StateChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }

    pub fn scripts(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.name.as_str())
    }

    pub fn is_playing(&self, name: &str) -> bool {
        self.active() == Some(name)
    }

    /// Start controls are only enabled while nothing plays.
    pub fn can_start(&self, name: &str) -> bool {
        self.active.is_none() && self.items.contains_key(name)
    }

    pub fn on_script_added(&mut self, name: &str, path: PathBuf) {
        debug!("script added: {} ({})", name, path.display());
        self.items.insert(name.to_string(), path);
        self.notify(StateChange::Added {
            name: name.to_string(),
        });
    }

    pub fn on_script_removed(&mut self, name: &str) {
        if self.is_playing(name) {
            self.finish(StopReason::Removed);
        }
        if self.items.remove(name).is_some() {
            debug!("script removed: {}", name);
            self.notify(StateChange::Removed {
                name: name.to_string(),
            });
        }
    }

    /// Loads the script fresh from disk and takes its first step.
    pub fn start(&mut self, name: &str) -> Result<Schedule, CoordinatorError> {
        let path = self
            .items
            .get(name)
            .ok_or_else(|| CoordinatorError::UnknownScript(name.to_string()))?;

        if let Some(active) = &self.active {
            return Err(if active.name == name {
                CoordinatorError::AlreadyPlaying(name.to_string())
            } else {
                CoordinatorError::Busy {
                    requested: name.to_string(),
                    active: active.name.clone(),
                }
            });
        }

        let script = Script::load(path).map_err(|source| CoordinatorError::Load {
            name: name.to_string(),
            source,
        })?;

        self.next_ticket += 1;
        self.active = Some(Active {
            name: name.to_string(),
            ticket: self.next_ticket,
            state: PlaybackState::new(script),
        });
        info!("started {}", name);
        self.notify(StateChange::Started {
            name: name.to_string(),
        });

        Ok(self.advance())
    }

    /// Stops `name` if it is playing. Returns whether anything stopped.
    pub fn stop(&mut self, name: &str) -> bool {
        if !self.is_playing(name) {
            return false;
        }
        self.finish(StopReason::Stopped);
        true
    }

    pub fn toggle(&mut self, name: &str) -> Result<Schedule, CoordinatorError> {
        if self.stop(name) {
            Ok(Schedule::Idle)
        } else {
            self.start(name)
        }
    }

    /// Called when the wake requested by a previous [`Schedule`] fires.
    /// Wakes for a run that has since stopped are ignored.
    pub fn resume(&mut self, ticket: u64) -> Schedule {
        match &self.active {
            Some(active) if active.ticket == ticket => self.advance(),
            _ => {
                debug!("ignoring stale wake {}", ticket);
                Schedule::Idle
            }
        }
    }

    fn advance(&mut self) -> Schedule {
        let Some(active) = self.active.as_mut() else {
            return Schedule::Idle;
        };
        let ticket = active.ticket;

        match active.state.step(&mut self.injector) {
            Ok(Step::Emitted) => Schedule::Wake {
                ticket,
                after: self.config.key_delay(),
            },
            Ok(Step::Wait(after)) => Schedule::Wake { ticket, after },
            Ok(Step::Finished) => {
                self.finish(StopReason::Completed);
                Schedule::Idle
            }
            Err(e) => {
                match &e {
                    PlaybackError::Device(_) => error!("{}: {}", active.name, e),
                    _ => warn!("{}: {}", active.name, e),
                }
                self.finish(StopReason::Failed(e.to_string()));
                Schedule::Idle
            }
        }
    }

    fn finish(&mut self, reason: StopReason) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        if reason != StopReason::Completed {
            if let Err(e) = active.state.release_held(&mut self.injector) {
                error!("{}: failed to release held keys: {}", active.name, e);
            }
        }

        info!("stopped {} ({:?})", active.name, reason);
        self.notify(StateChange::Stopped {
            name: active.name,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{Recorder, injector};
    use evdev::Key;
    use std::fs;
    use tempfile::TempDir;

    fn coordinator(scripts: &[(&str, &str)]) -> (PlaybackCoordinator<Recorder>, Recorder, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (injector, recorder) = injector();
        let mut coordinator = PlaybackCoordinator::new(injector, PlaybackConfig::cooperative());
        for (name, source) in scripts {
            let path = dir.path().join(name);
            fs::write(&path, source).unwrap();
            coordinator.on_script_added(name, path);
        }
        (coordinator, recorder, dir)
    }

    fn run_to_idle(coordinator: &mut PlaybackCoordinator<Recorder>, mut schedule: Schedule) {
        while let Schedule::Wake { ticket, .. } = schedule {
            schedule = coordinator.resume(ticket);
        }
    }

    #[test]
    fn test_start_takes_first_step_immediately() {
        let (mut coordinator, recorder, _dir) = coordinator(&[("a.seq", "KEY A\n")]);

        let schedule = coordinator.start("a.seq").unwrap();

        assert!(matches!(
            schedule,
            Schedule::Wake { after, .. } if after == Duration::from_millis(10)
        ));
        assert_eq!(recorder.keys(), vec![(Key::KEY_A, true)]);
        assert!(coordinator.is_playing("a.seq"));
    }

    #[test]
    fn test_end_of_script_stops_item() {
        let (mut coordinator, recorder, _dir) = coordinator(&[("a.seq", "KEY A\nDELAY 30\n")]);
        let mut changes = coordinator.subscribe();

        let schedule = coordinator.start("a.seq").unwrap();
        let Schedule::Wake { ticket, .. } = schedule else {
            panic!("expected a wake");
        };
        // release A, then the DELAY
        coordinator.resume(ticket);
        assert_eq!(
            coordinator.resume(ticket),
            Schedule::Wake {
                ticket,
                after: Duration::from_millis(30)
            }
        );
        assert_eq!(coordinator.resume(ticket), Schedule::Idle);

        assert!(!coordinator.is_playing("a.seq"));
        assert_eq!(
            recorder.keys(),
            vec![(Key::KEY_A, true), (Key::KEY_A, false)]
        );
        assert_eq!(
            changes.try_recv().unwrap(),
            StateChange::Started {
                name: "a.seq".to_string()
            }
        );
        assert_eq!(
            changes.try_recv().unwrap(),
            StateChange::Stopped {
                name: "a.seq".to_string(),
                reason: StopReason::Completed
            }
        );
    }

    #[test]
    fn test_only_one_script_plays() {
        let (mut coordinator, _recorder, _dir) =
            coordinator(&[("a.seq", "DELAY 1000\n"), ("b.seq", "KEY B\n")]);

        assert!(coordinator.can_start("a.seq"));
        assert!(coordinator.can_start("b.seq"));

        coordinator.start("a.seq").unwrap();
        assert!(!coordinator.can_start("b.seq"));
        assert!(matches!(
            coordinator.start("b.seq"),
            Err(CoordinatorError::Busy { .. })
        ));
        assert!(matches!(
            coordinator.start("a.seq"),
            Err(CoordinatorError::AlreadyPlaying(_))
        ));
        assert!(!coordinator.is_playing("b.seq"));

        assert!(coordinator.stop("a.seq"));
        assert!(coordinator.can_start("b.seq"));
        coordinator.start("b.seq").unwrap();
        assert!(coordinator.is_playing("b.seq"));
    }

    #[test]
    fn test_stop_mid_line_releases_and_ignores_stale_wake() {
        let (mut coordinator, recorder, _dir) =
            coordinator(&[("a.seq", "KEY_DOWN LEFTSHIFT\nKEY A B\n")]);

        let Schedule::Wake { ticket, .. } = coordinator.start("a.seq").unwrap() else {
            panic!("expected a wake");
        };
        // press A, leaving it down
        coordinator.resume(ticket);
        assert!(coordinator.stop("a.seq"));

        assert_eq!(coordinator.resume(ticket), Schedule::Idle);
        assert_eq!(
            recorder.keys(),
            vec![
                (Key::KEY_LEFTSHIFT, true),
                (Key::KEY_A, true),
                (Key::KEY_A, false),
                (Key::KEY_LEFTSHIFT, false),
            ]
        );
    }

    #[test]
    fn test_restart_reloads_from_the_top() {
        let (mut coordinator, recorder, dir) = coordinator(&[("a.seq", "KEY A\n")]);

        coordinator.start("a.seq").unwrap();
        coordinator.stop("a.seq");
        fs::write(dir.path().join("a.seq"), "KEY B\n").unwrap();

        let schedule = coordinator.toggle("a.seq").unwrap();
        run_to_idle(&mut coordinator, schedule);

        assert_eq!(
            recorder.keys(),
            vec![
                (Key::KEY_A, true),
                (Key::KEY_A, false),
                (Key::KEY_B, true),
                (Key::KEY_B, false),
            ]
        );
    }

    #[test]
    fn test_parse_error_stops_cleanly() {
        let (mut coordinator, recorder, _dir) = coordinator(&[("a.seq", "KEY A\nFOO bar\n")]);
        let mut changes = coordinator.subscribe();

        let schedule = coordinator.start("a.seq").unwrap();
        run_to_idle(&mut coordinator, schedule);

        assert!(!coordinator.is_playing("a.seq"));
        assert!(coordinator.can_start("a.seq"));
        assert_eq!(recorder.keys().len(), 2);

        changes.try_recv().unwrap();
        assert!(matches!(
            changes.try_recv().unwrap(),
            StateChange::Stopped {
                reason: StopReason::Failed(_),
                ..
            }
        ));
    }

    #[test]
    fn test_unreadable_script_does_not_start() {
        let (mut coordinator, recorder, dir) = coordinator(&[]);
        coordinator.on_script_added("gone.seq", dir.path().join("gone.seq"));

        assert!(matches!(
            coordinator.start("gone.seq"),
            Err(CoordinatorError::Load { .. })
        ));
        assert!(coordinator.active().is_none());
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_removing_playing_script_stops_it() {
        let (mut coordinator, _recorder, _dir) = coordinator(&[("a.seq", "DELAY 1000\n")]);

        coordinator.start("a.seq").unwrap();
        coordinator.on_script_removed("a.seq");

        assert!(coordinator.active().is_none());
        assert_eq!(coordinator.scripts().count(), 0);
        assert!(matches!(
            coordinator.start("a.seq"),
            Err(CoordinatorError::UnknownScript(_))
        ));
    }

    #[test]
    fn test_device_failure_stops_item() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.seq");
        fs::write(&path, "KEY A\n").unwrap();

        let injector = Injector::new(
            crate::keymap::KeyTable::new(),
            crate::device::Keyboard::from_writer(Recorder::failing()),
        );
        let mut coordinator = PlaybackCoordinator::new(injector, PlaybackConfig::cooperative());
        coordinator.on_script_added("a.seq", path);
        let mut changes = coordinator.subscribe();

        assert_eq!(coordinator.start("a.seq").unwrap(), Schedule::Idle);
        assert!(!coordinator.is_playing("a.seq"));

        let mut seen = Vec::new();
        while let Ok(change) = changes.try_recv() {
            seen.push(change);
        }
        assert_eq!(
            seen.last(),
            Some(&StateChange::Stopped {
                name: "a.seq".into(),
                reason: StopReason::Failed(format!(
                    "failed to write event for key code {}",
                    Key::KEY_A.code()
                )),
            })
        );
    }
}
