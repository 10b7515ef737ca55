/*!
Dispatch engine.

Turns the raw press/release stream into binding, override and recording
activity, and answers for every event whether the platform should swallow it.

Events are expected one at a time from a single delivery thread. The state
lock is held only while deciding; matched actions and recording callbacks run
after it is released, in the order they were matched, so they may call back
into the dispatcher or the registry.
*/

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::action::Action;
use crate::config::EngineConfig;
use crate::key::{track_press, ColdKey, KeyNormalizer, LiveKey, PassThrough, RawKey};
use crate::listener::KeyEventSink;
use crate::logging::{LogSwitch, Logger};
use crate::recording::{Capture, RecordingCallback, RecordingMode, Session};
use crate::registry::{Binding, KeyEdge, Registry};
use crate::stats::{DispatchStats, StatsSnapshot};

#[derive(Default)]
struct DispatchState {
    config: EngineConfig,
    pressed: Vec<LiveKey>,
    /// Keys with an override whose press went through unsuppressed; their
    /// release is let through as well.
    held_for_release: Vec<ColdKey>,
    last_release: Option<LiveKey>,
    /// Suppression reported by the last fired binding, replayed for key repeat.
    last_outcome: bool,
    recording: Session,
}

impl DispatchState {
    fn clear_tracking(&mut self) {
        self.pressed.clear();
        self.held_for_release.clear();
        self.last_release = None;
        self.last_outcome = false;
    }

    fn ttl(&self) -> f64 {
        f64::from(self.config.ttl)
    }
}

/// Work collected under the state lock and executed after it is released.
enum Pending {
    Fire(Binding),
    Override {
        key: ColdKey,
        edge: KeyEdge,
        action: Action,
    },
    Capture(Capture),
}

/// Decides, per key event, which bindings, overrides or recording captures
/// run and whether the event is swallowed.
pub struct Dispatcher {
    registry: Arc<Registry>,
    log: Arc<LogSwitch>,
    stats: DispatchStats,
    normalizer: Box<dyn KeyNormalizer>,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    /// A dispatcher matching against `registry` with default settings.
    pub fn new(registry: Arc<Registry>, log: Arc<LogSwitch>) -> Self {
        Self {
            registry,
            log,
            stats: DispatchStats::new(),
            normalizer: Box::new(PassThrough),
            state: Mutex::new(DispatchState::default()),
        }
    }

    pub fn with_config(self, config: EngineConfig) -> Self {
        self.apply_config(config);
        self
    }

    /// Map platform keys before they are turned into [`ColdKey`]s.
    pub fn with_normalizer<N>(mut self, normalizer: N) -> Self
    where
        N: KeyNormalizer + 'static,
    {
        self.normalizer = Box::new(normalizer);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn canonical(&self, raw: RawKey) -> Option<ColdKey> {
        ColdKey::from_raw(self.normalizer.normalize(raw))
    }

    /// Handle a key-down. Returns whether the event should be suppressed.
    pub fn on_press(&self, raw: RawKey, timestamp: Option<f64>) -> bool {
        let Some(key) = self.canonical(raw) else {
            self.log.debug(format_args!("[Dispatch] ignoring key-down without canonical form"));
            return false;
        };
        self.stats.record_press();
        let mut work = Vec::new();
        let suppress = {
            let mut state = self.lock();
            self.press(&mut state, LiveKey::new(key, timestamp, 1), &mut work)
        };
        self.finish(suppress, work)
    }

    /// Handle a key-up. Returns whether the event should be suppressed.
    pub fn on_release(&self, raw: RawKey, timestamp: Option<f64>) -> bool {
        let Some(key) = self.canonical(raw) else {
            self.log.debug(format_args!("[Dispatch] ignoring key-up without canonical form"));
            return false;
        };
        self.stats.record_release();
        let mut work = Vec::new();
        let suppress = {
            let mut state = self.lock();
            self.release(&mut state, LiveKey::new(key, timestamp, 1), &mut work)
        };
        self.finish(suppress, work)
    }

    fn press(&self, state: &mut DispatchState, key: LiveKey, work: &mut Vec<Pending>) -> bool {
        let ttl = state.ttl();
        if state.recording.mode().is_some() {
            work.extend(state.recording.on_press(key, ttl).map(Pending::Capture));
            return true;
        }

        let cold = key.key();
        let over = self.registry.override_for(&cold);
        if track_press(&mut state.pressed, key, ttl) {
            if over.is_some() && state.config.suppress_override {
                return true;
            }
            return state.last_outcome;
        }

        if let Some(over) = over {
            if state.pressed.len() == 1 {
                if let Some(action) = over.on_press() {
                    work.push(Pending::Override {
                        key: cold,
                        edge: KeyEdge::Press,
                        action: action.clone(),
                    });
                }
                if state.config.suppress_override {
                    return true;
                }
            }
            if !state.held_for_release.contains(&cold) {
                state.held_for_release.push(cold);
            }
        }
        state.last_outcome = false;
        self.log.debug(format_args!("[Dispatch] Key down {}", cold));

        if state.pressed.len() < 2 {
            return false;
        }
        match self.registry.match_chord(&state.pressed) {
            Some(binding) => {
                state.last_outcome = state.config.suppress_hotkey;
                work.push(Pending::Fire(binding));
                state.last_outcome
            }
            None => false,
        }
    }

    fn release(&self, state: &mut DispatchState, mut key: LiveKey, work: &mut Vec<Pending>) -> bool {
        if state.recording.mode().is_some() {
            work.extend(state.recording.on_release(key).map(Pending::Capture));
            if state.recording.mode().is_none() {
                self.log.info(format_args!("[Recording] stopped after capturing {}", key));
            }
            return true;
        }

        let cold = key.key();
        if let Some(index) = state.pressed.iter().position(|held| *held == cold) {
            state.pressed.remove(index);
        }

        if let Some(previous) = &state.last_release {
            if *previous == key && key.timestamp() - previous.timestamp() <= state.config.interval {
                key.set_repeat_count(previous.repeat_count() + 1);
            }
        }
        let taps = key.repeat_count();
        state.last_release = Some(key);

        let preserved = match state.held_for_release.iter().position(|held| *held == cold) {
            Some(index) => {
                state.held_for_release.remove(index);
                true
            }
            None => false,
        };

        if state.pressed.is_empty() {
            if let Some(over) = self.registry.override_for(&cold) {
                if let Some(action) = over.on_release() {
                    work.push(Pending::Override {
                        key: cold,
                        edge: KeyEdge::Release,
                        action: action.clone(),
                    });
                }
                if state.config.suppress_override && !preserved {
                    return true;
                }
            }
        }
        self.log.debug(format_args!("[Dispatch] Key up {} (x{})", cold, taps));

        match self.registry.match_tap(&cold, taps) {
            Some(binding) => {
                state.last_outcome = state.config.suppress_hotkey;
                work.push(Pending::Fire(binding));
                state.last_outcome
            }
            None => false,
        }
    }

    fn finish(&self, suppress: bool, work: Vec<Pending>) -> bool {
        for pending in work {
            match pending {
                Pending::Fire(binding) => {
                    self.log.info(format_args!("[HotKey] triggered {}", binding));
                    let completed = binding.action().invoke(&binding, self.log.as_ref());
                    self.stats.record_action(completed);
                }
                Pending::Override { key, edge, action } => {
                    self.log.info(format_args!("[Override] triggered on {} {}", edge, key));
                    let origin = format!("override {} on {}", key, edge);
                    let completed = action.invoke(&origin, self.log.as_ref());
                    self.stats.record_action(completed);
                }
                Pending::Capture(capture) => {
                    capture.deliver(self.log.as_ref());
                }
            }
        }
        if suppress {
            self.stats.record_suppressed();
        }
        suppress
    }

    /// Start capturing keys for `callback`. Fails when already recording.
    pub fn start_recording(&self, mode: RecordingMode, callback: RecordingCallback) -> bool {
        let mut state = self.lock();
        if !state.recording.start(mode, callback) {
            self.log.info(format_args!("[Recording] already running"));
            return false;
        }
        state.clear_tracking();
        self.log.info(format_args!("[Recording] started ({})", mode));
        true
    }

    /// End the active recording without invoking its callback.
    pub fn stop_recording(&self) {
        let mut state = self.lock();
        if state.recording.mode().is_some() {
            self.log.info(format_args!("[Recording] stopped"));
        }
        state.recording.stop();
        state.clear_tracking();
    }

    pub fn recording_mode(&self) -> Option<RecordingMode> {
        self.lock().recording.mode()
    }

    pub fn is_recording(&self) -> bool {
        self.recording_mode().is_some()
    }

    /// Keys currently tracked as held, in press order.
    pub fn pressed_keys(&self) -> Vec<LiveKey> {
        self.lock().pressed.clone()
    }

    /// Drop all transient state, including an active recording.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.recording.stop();
        state.clear_tracking();
    }

    /// Current settings.
    pub fn config(&self) -> EngineConfig {
        self.lock().config
    }

    /// Replace all settings; out-of-range values fall back to defaults.
    pub fn apply_config(&self, config: EngineConfig) {
        self.lock().config = config.sanitized();
    }

    /// Values not above 3 reset the TTL to its default.
    pub fn set_ttl(&self, ttl: i64) {
        let ttl = EngineConfig::sanitize_ttl(ttl);
        self.lock().config.ttl = ttl;
        self.log.info(format_args!("[Config] ttl = {}", ttl));
    }

    pub fn ttl(&self) -> u32 {
        self.lock().config.ttl
    }

    /// Values outside (0, 1] reset the interval to its default.
    pub fn set_interval(&self, interval: f64) {
        let interval = EngineConfig::sanitize_interval(interval);
        self.lock().config.interval = interval;
        self.log.info(format_args!("[Config] interval = {}", interval));
    }

    pub fn interval(&self) -> f64 {
        self.lock().config.interval
    }

    /// Swallow the events that fire chord and tap bindings.
    pub fn set_suppress_hotkey(&self, on: bool) {
        self.lock().config.suppress_hotkey = on;
    }

    pub fn suppress_hotkey(&self) -> bool {
        self.lock().config.suppress_hotkey
    }

    /// Swallow lone keystrokes of keys that carry an override.
    pub fn set_suppress_override(&self, on: bool) {
        self.lock().config.suppress_override = on;
    }

    pub fn suppress_override(&self) -> bool {
        self.lock().config.suppress_override
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl KeyEventSink for Dispatcher {
    fn on_press(&self, key: RawKey, timestamp: Option<f64>) -> bool {
        Dispatcher::on_press(self, key, timestamp)
    }

    fn on_release(&self, key: RawKey, timestamp: Option<f64>) -> bool {
        Dispatcher::on_release(self, key, timestamp)
    }
}
