//! Live shortcut recording.
//!
//! While a session is active the dispatcher routes every key event here
//! instead of matching bindings. Single mode reports the first released key
//! and ends; multiple mode reports the growing chord each time a new distinct
//! key goes down and stays active until stopped.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::sandbox;
use crate::key::{track_press, LiveKey};
use crate::logging::Logger;

/// Receives captured keys, in press order.
pub type RecordingCallback = Arc<dyn Fn(&[LiveKey]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    Single,
    Multiple,
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordingMode::Single => "single key",
            RecordingMode::Multiple => "multiple keys",
        })
    }
}

/// A capture ready to be handed to the caller's callback.
pub(crate) struct Capture {
    callback: RecordingCallback,
    keys: Vec<LiveKey>,
}

impl Capture {
    /// Run the callback outside any engine lock. Returns whether it completed.
    pub(crate) fn deliver(self, log: &dyn Logger) -> bool {
        let keys = self.keys;
        let callback = self.callback;
        match sandbox(|| {
            callback(&keys);
            Ok(())
        }) {
            Ok(()) => true,
            Err(failure) => {
                log.error(format_args!("[Recording] callback failed: {}", failure));
                false
            }
        }
    }
}

#[derive(Default)]
pub(crate) enum Session {
    #[default]
    Idle,
    Active {
        mode: RecordingMode,
        callback: RecordingCallback,
        pressed: Vec<LiveKey>,
    },
}

impl Session {
    pub(crate) fn mode(&self) -> Option<RecordingMode> {
        match self {
            Session::Idle => None,
            Session::Active { mode, .. } => Some(*mode),
        }
    }

    /// Begin capturing. Fails when a session is already running.
    pub(crate) fn start(&mut self, mode: RecordingMode, callback: RecordingCallback) -> bool {
        if matches!(self, Session::Active { .. }) {
            return false;
        }
        *self = Session::Active {
            mode,
            callback,
            pressed: Vec::new(),
        };
        true
    }

    pub(crate) fn stop(&mut self) {
        *self = Session::Idle;
    }

    pub(crate) fn on_press(&mut self, key: LiveKey, ttl: f64) -> Option<Capture> {
        let Session::Active {
            mode,
            callback,
            pressed,
        } = self
        else {
            return None;
        };
        match *mode {
            RecordingMode::Single => {
                track_press(pressed, key, ttl);
                None
            }
            RecordingMode::Multiple => {
                if pressed.iter().any(|held| *held == key) {
                    return None;
                }
                pressed.push(key);
                (pressed.len() > 1).then(|| Capture {
                    callback: callback.clone(),
                    keys: pressed.clone(),
                })
            }
        }
    }

    pub(crate) fn on_release(&mut self, key: LiveKey) -> Option<Capture> {
        let Session::Active {
            mode,
            callback,
            pressed,
        } = self
        else {
            return None;
        };
        match *mode {
            RecordingMode::Single => {
                let capture = Capture {
                    callback: callback.clone(),
                    keys: vec![key],
                };
                *self = Session::Idle;
                Some(capture)
            }
            RecordingMode::Multiple => {
                pressed.retain(|held| *held != key);
                None
            }
        }
    }
}
