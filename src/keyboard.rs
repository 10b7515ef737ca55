//! The `HotKeyboard` facade.
//!
//! Owns one registry, one dispatcher and, while listening, one key source.
//! Lifecycle: create, `start_listening`, `stop_listening`, drop. Dropping a
//! keyboard that is still listening stops its source.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail, Result};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::config::{BindingFile, EngineConfig, NamedBinding};
use crate::engine::Dispatcher;
use crate::error::RegisterError;
use crate::input::{hold, KeyController};
use crate::key::{ColdKey, KeyInput, KeyNormalizer, LiveKey};
use crate::listener::{KeyEventSink, KeySource};
use crate::logging::{LogSwitch, Logger};
use crate::recording::{RecordingCallback, RecordingMode};
use crate::registry::{Binding, BindingId, KeyEdge, Override, Registry};
use crate::stats::StatsSnapshot;

/// Hotkey engine with its registry, dispatcher and event source.
pub struct HotKeyboard {
    log: Arc<LogSwitch>,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    controller: Option<Arc<dyn KeyController>>,
    source: Mutex<Option<Arc<dyn KeySource>>>,
}

impl HotKeyboard {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// A keyboard with sanitized `config` and no bindings.
    pub fn with_config(config: EngineConfig) -> Self {
        let log = Arc::new(LogSwitch::new());
        let registry = Arc::new(Registry::new(log.clone()));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), log.clone()).with_config(config));
        Self {
            log,
            registry,
            dispatcher,
            controller: None,
            source: Mutex::new(None),
        }
    }

    /// Build a keyboard from a loaded binding file; `make_action` supplies the
    /// action for each named binding. Bindings that fail to register are
    /// logged and skipped.
    pub fn from_binding_file<F>(file: &BindingFile, make_action: F) -> Self
    where
        F: FnMut(&NamedBinding) -> Action,
    {
        let keyboard = Self::with_config(file.engine);
        for (name, outcome) in file.register_all(&keyboard.registry, make_action) {
            match outcome {
                Ok(id) => debug!("Registered binding '{}' as {}", name, id),
                Err(e) => warn!("Skipping binding '{}': {}", name, e),
            }
        }
        keyboard
    }

    /// Inject synthetic input through `controller`.
    pub fn with_controller(mut self, controller: Arc<dyn KeyController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Replace the key normalizer. Only meaningful before listening starts.
    pub fn with_normalizer<N>(mut self, normalizer: N) -> Self
    where
        N: KeyNormalizer + 'static,
    {
        let config = self.dispatcher.config();
        self.dispatcher = Arc::new(
            Dispatcher::new(self.registry.clone(), self.log.clone())
                .with_config(config)
                .with_normalizer(normalizer),
        );
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Shared handle, e.g. for actions that edit bindings.
    pub fn registry_handle(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    // Registration

    /// Bind `action` to a chord of two or more keys held together.
    pub fn register_chord<I, K>(&self, keys: I, action: Action) -> Result<BindingId, RegisterError>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyInput>,
    {
        self.registry.register_chord(keys, action)
    }

    /// Bind `action` to `count` releases of `key` within the tap interval.
    pub fn register_tap<K>(&self, key: K, count: u32, action: Action) -> Result<BindingId, RegisterError>
    where
        K: Into<KeyInput>,
    {
        self.registry.register_tap(key, count, action)
    }

    /// Remove a binding by id. False when no such binding exists.
    pub fn unregister(&self, id: BindingId) -> bool {
        self.registry.unregister_by_id(id)
    }

    /// Remove the binding registered on exactly `keys`; see
    /// [`Registry::unregister_by_keys`].
    pub fn unregister_by_keys<I, K>(&self, keys: I, count: Option<u32>) -> bool
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyInput>,
    {
        self.registry.unregister_by_keys(keys, count)
    }

    pub fn unregister_all(&self) {
        self.registry.unregister_all();
    }

    pub fn hotkeys(&self) -> Vec<Binding> {
        self.registry.list()
    }

    /// Attach `action` to the press or release edge of `key`.
    pub fn set_override<K>(&self, key: K, edge: KeyEdge, action: Action) -> Result<(), RegisterError>
    where
        K: Into<KeyInput>,
    {
        self.registry.set_override(key, edge, action)
    }

    pub fn clear_override<K>(&self, key: K, edge: Option<KeyEdge>) -> bool
    where
        K: Into<KeyInput>,
    {
        self.registry.clear_override(key, edge)
    }

    pub fn overrides(&self) -> Vec<Override> {
        self.registry.list_overrides()
    }

    pub fn clear_all_overrides(&self) {
        self.registry.clear_all_overrides();
    }

    // Settings

    /// Seconds a held key survives without a release. Values of 3 or less
    /// fall back to the default.
    pub fn set_ttl(&self, ttl: i64) {
        self.dispatcher.set_ttl(ttl);
    }

    /// Maximum gap between taps, in seconds. Outside (0, 1] falls back to
    /// the default.
    pub fn set_interval(&self, interval: f64) {
        self.dispatcher.set_interval(interval);
    }

    pub fn set_suppress_hotkey(&self, on: bool) {
        self.dispatcher.set_suppress_hotkey(on);
    }

    pub fn set_suppress_override(&self, on: bool) {
        self.dispatcher.set_suppress_override(on);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats()
    }

    // Logging

    /// Select the logger used once logging is switched on.
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        self.log.set_logger(logger);
    }

    /// Switch between the selected logger and the no-op logger.
    pub fn toggle_logger(&self, on: bool) {
        self.log.toggle(on);
    }

    // Recording

    /// Capture the next released key. Fails when a recording is running.
    pub fn start_recording_single<F>(&self, callback: F) -> bool
    where
        F: Fn(&[LiveKey]) + Send + Sync + 'static,
    {
        self.start_recording(RecordingMode::Single, Arc::new(callback))
    }

    /// Report the held chord each time it grows, until stopped.
    pub fn start_recording_multiple<F>(&self, callback: F) -> bool
    where
        F: Fn(&[LiveKey]) + Send + Sync + 'static,
    {
        self.start_recording(RecordingMode::Multiple, Arc::new(callback))
    }

    pub fn start_recording(&self, mode: RecordingMode, callback: RecordingCallback) -> bool {
        self.dispatcher.start_recording(mode, callback)
    }

    /// End the active recording, if any. Its callback is not invoked.
    pub fn stop_recording(&self) {
        self.dispatcher.stop_recording();
    }

    pub fn recording_mode(&self) -> Option<RecordingMode> {
        self.dispatcher.recording_mode()
    }

    // Listening

    fn source(&self) -> MutexGuard<'_, Option<Arc<dyn KeySource>>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start delivering events from `source` to the dispatcher.
    pub fn start_listening(&self, mut source: Box<dyn KeySource>) -> Result<()> {
        let mut slot = self.source();
        if slot.as_ref().is_some_and(|s| s.is_running()) {
            bail!("Already listening");
        }
        let sink: Arc<dyn KeyEventSink> = self.dispatcher.clone();
        source.start(sink)?;
        info!("Listening for key events");
        *slot = Some(Arc::from(source));
        Ok(())
    }

    /// Stop the source and drop all transient key state.
    pub fn stop_listening(&self) {
        let source = self.source().take();
        if let Some(source) = source {
            source.stop();
            info!("Stopped listening for key events");
        }
        self.dispatcher.reset();
    }

    /// True while the current source's delivery thread is running.
    pub fn listening(&self) -> bool {
        self.source().as_ref().is_some_and(|s| s.is_running())
    }

    /// Block until the current source finishes, either on its own or through
    /// `stop_listening` from another thread or from an action.
    pub fn wait(&self) {
        let source = self.source().clone();
        if let Some(source) = source {
            source.wait();
        }
    }

    // Synthetic input. Ignored while recording so injected keys never end up
    // in a captured shortcut.

    fn controller(&self) -> Result<Option<&dyn KeyController>> {
        if self.dispatcher.is_recording() {
            debug!("Ignoring synthetic input while recording");
            return Ok(None);
        }
        match &self.controller {
            Some(controller) => Ok(Some(controller.as_ref())),
            None => bail!("No key controller configured"),
        }
    }

    pub fn press<K: Into<KeyInput>>(&self, key: K) -> Result<()> {
        let key = cold(key)?;
        match self.controller()? {
            Some(controller) => controller.press(&key),
            None => Ok(()),
        }
    }

    pub fn release<K: Into<KeyInput>>(&self, key: K) -> Result<()> {
        let key = cold(key)?;
        match self.controller()? {
            Some(controller) => controller.release(&key),
            None => Ok(()),
        }
    }

    pub fn tap<K: Into<KeyInput>>(&self, key: K) -> Result<()> {
        let key = cold(key)?;
        match self.controller()? {
            Some(controller) => controller.tap(&key),
            None => Ok(()),
        }
    }

    pub fn type_text(&self, text: &str) -> Result<()> {
        match self.controller()? {
            Some(controller) => controller.type_text(text),
            None => Ok(()),
        }
    }

    /// Run `f` with `keys` held, releasing them in reverse order afterwards.
    /// While recording, `f` runs without any keys held.
    pub fn hold<I, K, R, F>(&self, keys: I, f: F) -> Result<R>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyInput>,
        F: FnOnce() -> R,
    {
        let keys: Vec<ColdKey> = keys.into_iter().map(cold).collect::<Result<_>>()?;
        match self.controller()? {
            Some(controller) => hold(controller, &keys, f),
            None => Ok(f()),
        }
    }
}

impl Default for HotKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HotKeyboard {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

fn cold<K: Into<KeyInput>>(key: K) -> Result<ColdKey> {
    let input = key.into();
    input
        .to_cold()
        .ok_or_else(|| anyhow!("Invalid key: {:?}", input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::tests::MockController;
    use crate::key::{NamedKey, RawKey};
    use crate::listener::ChannelSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::thread;
    use std::time::Duration;

    fn counter() -> (Action, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = hits.clone();
        let action = Action::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (action, hits)
    }

    #[test]
    fn test_end_to_end_through_channel_source() {
        let keyboard = HotKeyboard::new();
        let (chord, chord_hits) = counter();
        let (tap, tap_hits) = counter();
        keyboard.register_chord([NamedKey::CtrlLeft.into(), KeyInput::from('z')], chord).unwrap();
        keyboard.register_tap(NamedKey::Shift, 2, tap).unwrap();
        keyboard.set_suppress_hotkey(true);

        let (source, sender, mut decisions) = ChannelSource::channel();
        keyboard.start_listening(Box::new(source)).unwrap();
        assert!(keyboard.listening());

        let ctrl = RawKey::named(NamedKey::CtrlLeft);
        let shift = RawKey::named(NamedKey::Shift);
        sender.press(ctrl, Some(1.0)).unwrap();
        sender.press(RawKey::char('Z'), Some(1.1)).unwrap();
        sender.release(RawKey::char('z'), Some(1.2)).unwrap();
        sender.release(ctrl, Some(1.3)).unwrap();
        sender.release(shift, Some(2.0)).unwrap();
        sender.release(shift, Some(2.1)).unwrap();
        drop(sender);
        keyboard.wait();
        assert!(!keyboard.listening());

        assert_eq!(chord_hits.load(Ordering::SeqCst), 1);
        assert_eq!(tap_hits.load(Ordering::SeqCst), 1);

        let mut verdicts = Vec::new();
        while let Ok((_, suppressed)) = decisions.try_recv() {
            verdicts.push(suppressed);
        }
        assert_eq!(verdicts, vec![false, true, false, false, false, true]);
        assert_eq!(keyboard.stats().suppressed, 2);
    }

    #[test]
    fn test_refuses_second_source_while_listening() {
        let keyboard = HotKeyboard::new();
        let (first, _first_tx, _) = ChannelSource::channel();
        let (second, _second_tx, _) = ChannelSource::channel();
        keyboard.start_listening(Box::new(first)).unwrap();
        assert!(keyboard.start_listening(Box::new(second)).is_err());
        keyboard.stop_listening();
        assert!(!keyboard.listening());
    }

    #[test]
    fn test_stop_listening_releases_a_waiting_thread() {
        let keyboard = Arc::new(HotKeyboard::new());
        let (source, sender, _decisions) = ChannelSource::channel();
        keyboard.start_listening(Box::new(source)).unwrap();

        let (done_tx, done_rx) = std_mpsc::channel();
        let waiter = {
            let keyboard = keyboard.clone();
            thread::spawn(move || {
                keyboard.wait();
                done_tx.send(()).unwrap();
            })
        };
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(keyboard.listening());

        // The sender stays alive; only stop_listening can end the wait.
        keyboard.stop_listening();
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        waiter.join().unwrap();
        assert!(!keyboard.listening());
        drop(sender);
    }

    #[test]
    fn test_action_can_stop_listening() {
        let keyboard = Arc::new(HotKeyboard::new());
        let handle = Arc::downgrade(&keyboard);
        keyboard
            .set_override(
                NamedKey::Esc,
                KeyEdge::Press,
                Action::new(move || {
                    if let Some(keyboard) = handle.upgrade() {
                        keyboard.stop_listening();
                    }
                }),
            )
            .unwrap();

        let (source, sender, mut decisions) = ChannelSource::channel();
        keyboard.start_listening(Box::new(source)).unwrap();
        sender.press(RawKey::named(NamedKey::Esc), Some(1.0)).unwrap();
        keyboard.wait();
        // The decision stream closes once the delivery thread has exited.
        while decisions.blocking_recv().is_some() {}
        assert!(!keyboard.listening());
        assert!(sender.press(RawKey::char('a'), None).is_err());
    }

    #[test]
    fn test_removes_bindings_by_keys_and_all_overrides() {
        let keyboard = HotKeyboard::new();
        keyboard.register_chord(['a', 'b'], Action::new(|| {})).unwrap();
        keyboard.register_tap('c', 2, Action::new(|| {})).unwrap();
        keyboard.set_override('d', KeyEdge::Press, Action::new(|| {})).unwrap();
        keyboard.set_override('e', KeyEdge::Release, Action::new(|| {})).unwrap();

        assert!(keyboard.unregister_by_keys(['b', 'a'], None));
        assert!(!keyboard.unregister_by_keys(['c'], Some(3)));
        assert!(keyboard.unregister_by_keys(['c'], Some(2)));
        assert!(keyboard.hotkeys().is_empty());

        keyboard.clear_all_overrides();
        assert!(keyboard.overrides().is_empty());
    }

    #[test]
    fn test_stop_listening_resets_state() {
        let keyboard = HotKeyboard::new();
        let (source, sender, mut decisions) = ChannelSource::channel();
        keyboard.start_listening(Box::new(source)).unwrap();
        sender.press(RawKey::char('a'), Some(1.0)).unwrap();
        // Wait for the event to be processed before stopping.
        while decisions.try_recv().is_err() {
            std::thread::yield_now();
        }
        assert_eq!(keyboard.dispatcher().pressed_keys().len(), 1);

        keyboard.stop_listening();
        assert!(keyboard.dispatcher().pressed_keys().is_empty());
    }

    #[test]
    fn test_synthetic_input_uses_controller() {
        let controller = Arc::new(MockController::default());
        let keyboard = HotKeyboard::new().with_controller(controller.clone());

        keyboard.tap('a').unwrap();
        keyboard.type_text("hi").unwrap();
        let held = keyboard
            .hold([NamedKey::CtrlLeft, NamedKey::ShiftLeft], || keyboard.tap('t'))
            .unwrap();
        assert!(held.is_ok());

        assert_eq!(
            controller.calls(),
            vec![
                "press a",
                "release a",
                "type hi",
                "press ctrl_l",
                "press shift_l",
                "press t",
                "release t",
                "release shift_l",
                "release ctrl_l",
            ]
        );
        assert!(keyboard.press("too long").is_err());
    }

    #[test]
    fn test_synthetic_input_is_ignored_while_recording() {
        let controller = Arc::new(MockController::default());
        let keyboard = HotKeyboard::new().with_controller(controller.clone());
        assert!(keyboard.start_recording_single(|_| {}));

        keyboard.tap('a').unwrap();
        keyboard.type_text("hi").unwrap();
        assert_eq!(keyboard.hold(['x'], || 5).unwrap(), 5);
        assert!(controller.calls().is_empty());

        keyboard.stop_recording();
        keyboard.tap('a').unwrap();
        assert_eq!(controller.calls().len(), 2);
    }

    #[test]
    fn test_synthetic_input_needs_a_controller() {
        let keyboard = HotKeyboard::new();
        assert!(keyboard.tap('a').is_err());
    }

    #[test]
    fn test_normalizer_and_config_survive_rebuild() {
        let keyboard = HotKeyboard::with_config(EngineConfig {
            ttl: 9,
            ..EngineConfig::default()
        })
        .with_normalizer(|raw: RawKey| match raw.ch {
            Some('q') => RawKey::char('w'),
            _ => raw,
        });
        let (action, hits) = counter();
        keyboard.register_tap('w', 2, action).unwrap();

        keyboard.dispatcher().on_release(RawKey::char('q'), Some(5.0));
        keyboard.dispatcher().on_release(RawKey::char('q'), Some(5.1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(keyboard.dispatcher().ttl(), 9);
    }

    #[test]
    fn test_loads_bindings_from_file() {
        let file = BindingFile::parse("[engine]\nttl = 7\n[chords]\nsave = ctrl+s\ndup = s+ctrl\n").unwrap();
        let keyboard = HotKeyboard::from_binding_file(&file, |_| Action::new(|| {}));
        assert_eq!(keyboard.dispatcher().ttl(), 7);
        let labels: Vec<String> = keyboard.hotkeys().iter().map(|b| b.action().label().to_string()).collect();
        assert_eq!(labels, vec!["dup"]);
    }
}
