//! Binding registry.
//!
//! Holds chord and tap hotkeys plus per-key overrides. Every operation takes
//! the same mutex, so a snapshot never observes a half-applied change. Lookups
//! used by the dispatcher hand back clones: actions are always invoked after
//! the lock is released and may call back into the registry.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::RegisterError;
use crate::key::{same_key_set, to_cold_keys, ColdKey, KeyInput, LiveKey};
use crate::logging::{LogSwitch, Logger};

/// Registry-unique hotkey identifier. Assigned in increasing order, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What has to happen on the keyboard for a binding to fire.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Two or more distinct keys held at the same time.
    Chord(Vec<ColdKey>),
    /// One key released `count` times in quick succession.
    Tap { key: ColdKey, count: u32 },
}

impl Trigger {
    fn keys(&self) -> &[ColdKey] {
        match self {
            Trigger::Chord(keys) => keys,
            Trigger::Tap { key, .. } => std::slice::from_ref(key),
        }
    }

    /// Same key set (chords) or same key (taps); tap counts do not matter.
    fn conflicts_with(&self, other: &Trigger) -> bool {
        same_key_set(self.keys(), other.keys())
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    id: BindingId,
    trigger: Trigger,
    action: Action,
}

impl Binding {
    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn keys(&self) -> &[ColdKey] {
        self.trigger.keys()
    }

    pub fn info(&self) -> BindingInfo {
        BindingInfo {
            id: self.id,
            keys: self.keys().iter().map(ToString::to_string).collect(),
            count: match self.trigger {
                Trigger::Tap { count, .. } => Some(count),
                Trigger::Chord(_) => None,
            },
            label: self.action.label().to_string(),
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trigger {
            Trigger::Chord(keys) => {
                let labels: Vec<String> = keys.iter().map(ToString::to_string).collect();
                write!(f, "<HotKey id={} keys=({})>", self.id, labels.join(", "))
            }
            Trigger::Tap { key, count } => {
                write!(f, "<HotKey id={} key={} count={}>", self.id, key, count)
            }
        }
    }
}

/// Serializable view of a binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingInfo {
    pub id: BindingId,
    pub keys: Vec<String>,
    pub count: Option<u32>,
    pub label: String,
}

/// Which edge of a keystroke an override reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEdge {
    Press,
    Release,
}

impl fmt::Display for KeyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyEdge::Press => "press",
            KeyEdge::Release => "release",
        })
    }
}

/// Single-key press/release hook. Never stored with both sides empty.
#[derive(Debug, Clone)]
pub struct Override {
    key: ColdKey,
    on_press: Option<Action>,
    on_release: Option<Action>,
}

impl Override {
    fn new(key: ColdKey) -> Self {
        Self {
            key,
            on_press: None,
            on_release: None,
        }
    }

    pub fn key(&self) -> ColdKey {
        self.key
    }

    pub fn on_press(&self) -> Option<&Action> {
        self.on_press.as_ref()
    }

    pub fn on_release(&self) -> Option<&Action> {
        self.on_release.as_ref()
    }

    pub fn action(&self, edge: KeyEdge) -> Option<&Action> {
        match edge {
            KeyEdge::Press => self.on_press(),
            KeyEdge::Release => self.on_release(),
        }
    }

    fn slot(&mut self, edge: KeyEdge) -> &mut Option<Action> {
        match edge {
            KeyEdge::Press => &mut self.on_press,
            KeyEdge::Release => &mut self.on_release,
        }
    }

    fn is_empty(&self) -> bool {
        self.on_press.is_none() && self.on_release.is_none()
    }

    pub fn info(&self) -> OverrideInfo {
        OverrideInfo {
            key: self.key.to_string(),
            on_press: self.on_press.is_some(),
            on_release: self.on_release.is_some(),
        }
    }
}

impl fmt::Display for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Override key={}{}{}>",
            self.key,
            if self.on_press.is_some() { " on_press" } else { "" },
            if self.on_release.is_some() { " on_release" } else { "" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideInfo {
    pub key: String,
    pub on_press: bool,
    pub on_release: bool,
}

struct Inner {
    next_id: u64,
    bindings: Vec<Binding>,
    overrides: Vec<Override>,
}

/// Thread-safe store of hotkeys and overrides.
pub struct Registry {
    inner: Mutex<Inner>,
    log: Arc<LogSwitch>,
}

impl Registry {
    pub fn new(log: Arc<LogSwitch>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                bindings: Vec::new(),
                overrides: Vec::new(),
            }),
            log,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a hotkey fired when exactly `keys` are held together.
    pub fn register_chord<I, K>(&self, keys: I, action: Action) -> Result<BindingId, RegisterError>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyInput>,
    {
        let keys = to_cold_keys(keys);
        match keys.len() {
            0 => return self.reject(RegisterError::EmptyKeys),
            1 => return self.reject(RegisterError::SingleKeyChord),
            _ => {}
        }
        self.insert(Trigger::Chord(keys), action)
    }

    /// Register a hotkey fired when `key` is released `count` times in a row.
    pub fn register_tap<K>(&self, key: K, count: u32, action: Action) -> Result<BindingId, RegisterError>
    where
        K: Into<KeyInput>,
    {
        if count < 2 {
            return self.reject(RegisterError::InvalidTapCount(count));
        }
        let Some(key) = key.into().to_cold() else {
            return self.reject(RegisterError::InvalidKey);
        };
        self.insert(Trigger::Tap { key, count }, action)
    }

    /// Register from a key list: a single key becomes a tap binding with
    /// `count`, several keys a chord (`count` is ignored).
    pub fn register<I, K>(&self, keys: I, count: u32, action: Action) -> Result<BindingId, RegisterError>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyInput>,
    {
        let keys = to_cold_keys(keys);
        match keys.len() {
            0 => self.reject(RegisterError::EmptyKeys),
            1 => self.register_tap(keys[0], count, action),
            _ => self.register_chord(keys, action),
        }
    }

    fn reject<T>(&self, error: RegisterError) -> Result<T, RegisterError> {
        self.log.info(format_args!("[Register] rejected: {}", error));
        Err(error)
    }

    fn insert(&self, trigger: Trigger, action: Action) -> Result<BindingId, RegisterError> {
        let mut inner = self.lock();
        let conflict = inner
            .bindings
            .iter()
            .find(|binding| binding.trigger.conflicts_with(&trigger))
            .map(Binding::id);
        if let Some(existing) = conflict {
            drop(inner);
            return self.reject(RegisterError::Conflict { existing });
        }

        let id = BindingId(inner.next_id);
        inner.next_id += 1;
        let binding = Binding {
            id,
            trigger,
            action,
        };
        self.log.info(format_args!("[Register] {}", binding));
        inner.bindings.push(binding);
        Ok(id)
    }

    /// Remove a binding by id. Ids are never handed out again.
    pub fn unregister_by_id(&self, id: BindingId) -> bool {
        let mut inner = self.lock();
        match inner.bindings.iter().position(|binding| binding.id == id) {
            Some(index) => {
                let removed = inner.bindings.remove(index);
                self.log.info(format_args!("[Unregister] {}", removed));
                true
            }
            None => {
                self.log.info(format_args!("[Unregister] hotkey {} doesn't exist", id));
                false
            }
        }
    }

    /// Remove the binding on exactly `keys`. For a single key, `Some(count)`
    /// restricts the match to a tap binding with that count.
    pub fn unregister_by_keys<I, K>(&self, keys: I, count: Option<u32>) -> bool
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyInput>,
    {
        let keys = to_cold_keys(keys);
        if keys.is_empty() {
            self.log.info(format_args!("[Unregister] invalid key list"));
            return false;
        }
        if keys.len() == 1 && matches!(count, Some(c) if c < 2) {
            self.log.info(format_args!("[Unregister] invalid tap count, must be at least 2"));
            return false;
        }

        let mut inner = self.lock();
        let position = inner.bindings.iter().position(|binding| {
            if !same_key_set(binding.keys(), &keys) {
                return false;
            }
            match (&binding.trigger, count) {
                (Trigger::Tap { count: bound, .. }, Some(wanted)) => *bound == wanted,
                _ => true,
            }
        });
        match position {
            Some(index) => {
                let removed = inner.bindings.remove(index);
                self.log.info(format_args!("[Unregister] {}", removed));
                true
            }
            None => {
                let labels: Vec<String> = keys.iter().map(ToString::to_string).collect();
                self.log.info(format_args!(
                    "[Unregister] no hotkey on ({})",
                    labels.join(", ")
                ));
                false
            }
        }
    }

    /// Remove every chord and tap binding. Overrides are kept.
    pub fn unregister_all(&self) {
        self.lock().bindings.clear();
        self.log.info(format_args!("[Unregister] all hotkeys"));
    }

    /// Copy of every binding, in registration order.
    pub fn list(&self) -> Vec<Binding> {
        self.lock().bindings.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First chord (registration order) whose key set is exactly `pressed`.
    pub fn match_chord(&self, pressed: &[LiveKey]) -> Option<Binding> {
        let inner = self.lock();
        inner
            .bindings
            .iter()
            .find(|binding| match &binding.trigger {
                Trigger::Chord(keys) => {
                    keys.len() == pressed.len()
                        && keys.iter().all(|key| pressed.iter().any(|held| held == key))
                }
                Trigger::Tap { .. } => false,
            })
            .cloned()
    }

    /// Tap binding on `key` requiring exactly `taps` releases.
    pub fn match_tap(&self, key: &ColdKey, taps: u32) -> Option<Binding> {
        let inner = self.lock();
        inner
            .bindings
            .iter()
            .find(|binding| match &binding.trigger {
                Trigger::Tap { key: bound, count } => bound == key && *count == taps,
                Trigger::Chord(_) => false,
            })
            .cloned()
    }

    /// Set the press or release action of `key`'s override, creating the
    /// override if needed and replacing any previous action on that edge.
    pub fn set_override<K>(&self, key: K, edge: KeyEdge, action: Action) -> Result<(), RegisterError>
    where
        K: Into<KeyInput>,
    {
        let Some(key) = key.into().to_cold() else {
            return self.reject(RegisterError::InvalidKey);
        };
        let mut inner = self.lock();
        let index = match inner.overrides.iter().position(|o| o.key == key) {
            Some(index) => index,
            None => {
                inner.overrides.push(Override::new(key));
                inner.overrides.len() - 1
            }
        };
        let entry = &mut inner.overrides[index];
        *entry.slot(edge) = Some(action);
        self.log.info(format_args!("[Override] set {}", entry));
        Ok(())
    }

    /// Clear one edge of `key`'s override, or the whole override for `None`.
    /// Returns false when `key` has no override.
    pub fn clear_override<K>(&self, key: K, edge: Option<KeyEdge>) -> bool
    where
        K: Into<KeyInput>,
    {
        let Some(key) = key.into().to_cold() else {
            self.log.info(format_args!("[Override] invalid key"));
            return false;
        };
        let mut inner = self.lock();
        let Some(index) = inner.overrides.iter().position(|o| o.key == key) else {
            self.log.info(format_args!("[Override] key {} is not monitored", key));
            return false;
        };
        match edge {
            None => {
                inner.overrides.remove(index);
                self.log.info(format_args!("[Override] removed {}", key));
            }
            Some(edge) => {
                *inner.overrides[index].slot(edge) = None;
                if inner.overrides[index].is_empty() {
                    inner.overrides.remove(index);
                }
                self.log.info(format_args!("[Override] cleared {} on {}", key, edge));
            }
        }
        true
    }

    /// Drop every override record.
    pub fn clear_all_overrides(&self) {
        self.lock().overrides.clear();
        self.log.info(format_args!("[Override] removed all"));
    }

    /// Snapshot of all override records.
    pub fn list_overrides(&self) -> Vec<Override> {
        self.lock().overrides.clone()
    }

    pub fn override_for(&self, key: &ColdKey) -> Option<Override> {
        self.lock()
            .overrides
            .iter()
            .find(|o| o.key == *key && !o.is_empty())
            .cloned()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Arc::new(LogSwitch::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::NamedKey;
    use std::thread;

    fn noop() -> Action {
        Action::new(|| {})
    }

    fn live(keys: &[&str]) -> Vec<LiveKey> {
        to_cold_keys(keys.iter().copied())
            .into_iter()
            .map(|key| LiveKey::new(key, Some(1.0), 1))
            .collect()
    }

    #[test]
    fn test_assigns_increasing_ids() {
        let registry = Registry::default();
        let a = registry.register_chord(["a", "b"], noop()).unwrap();
        let b = registry.register_tap("x", 2, noop()).unwrap();
        assert_eq!(a, BindingId(1));
        assert_eq!(b, BindingId(2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_validates_chords() {
        let registry = Registry::default();
        assert_eq!(
            registry.register_chord(Vec::<&str>::new(), noop()),
            Err(RegisterError::EmptyKeys)
        );
        assert_eq!(
            registry.register_chord(["", "nope"], noop()),
            Err(RegisterError::EmptyKeys)
        );
        assert_eq!(
            registry.register_chord(["a", "A"], noop()),
            Err(RegisterError::SingleKeyChord)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_validates_taps() {
        let registry = Registry::default();
        assert_eq!(
            registry.register_tap("x", 1, noop()),
            Err(RegisterError::InvalidTapCount(1))
        );
        assert_eq!(
            registry.register_tap("xy", 2, noop()),
            Err(RegisterError::InvalidKey)
        );
        assert!(registry.register_tap(NamedKey::CtrlLeft, 2, noop()).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_chords_in_any_order() {
        let registry = Registry::default();
        let first = registry.register_chord(["a", "b"], noop()).unwrap();
        let err = registry.register_chord(["B", "a"], noop()).unwrap_err();
        assert_eq!(err, RegisterError::Conflict { existing: first });
        assert!(err.is_conflict());
    }

    #[test]
    fn test_tap_count_does_not_distinguish_duplicates() {
        let registry = Registry::default();
        let first = registry.register_tap("x", 2, noop()).unwrap();
        assert_eq!(
            registry.register_tap("x", 3, noop()),
            Err(RegisterError::Conflict { existing: first })
        );
    }

    #[test]
    fn test_register_routes_by_key_count() {
        let registry = Registry::default();
        let tap = registry.register(["q"], 3, noop()).unwrap();
        let chord = registry.register(["q", "w"], 0, noop()).unwrap();
        let bindings = registry.list();
        assert!(matches!(bindings[0].trigger(), Trigger::Tap { count: 3, .. }));
        assert!(matches!(bindings[1].trigger(), Trigger::Chord(_)));
        assert_eq!((tap, chord), (BindingId(1), BindingId(2)));
        assert_eq!(registry.register(["z"], 1, noop()), Err(RegisterError::InvalidTapCount(1)));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let registry = Registry::default();
        let first = registry.register_chord(["a", "b"], noop()).unwrap();
        assert!(registry.unregister_by_id(first));
        assert!(!registry.unregister_by_id(first));
        let second = registry.register_chord(["a", "b"], noop()).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_unregisters_by_keys() {
        let registry = Registry::default();
        registry.register_chord(["a", "b", "c"], noop()).unwrap();
        registry.register_tap("x", 3, noop()).unwrap();

        assert!(!registry.unregister_by_keys(["a", "b"], None));
        assert!(registry.unregister_by_keys(["c", "b", "a"], None));

        assert!(!registry.unregister_by_keys(["x"], Some(1)));
        assert!(!registry.unregister_by_keys(["x"], Some(2)));
        assert!(registry.unregister_by_keys(["x"], Some(3)));
        assert!(registry.is_empty());

        registry.register_tap("y", 2, noop()).unwrap();
        assert!(registry.unregister_by_keys(["y"], None));
        assert!(!registry.unregister_by_keys(Vec::<&str>::new(), None));
    }

    #[test]
    fn test_unregister_all_keeps_id_sequence() {
        let registry = Registry::default();
        registry.register_chord(["a", "b"], noop()).unwrap();
        registry.unregister_all();
        assert!(registry.is_empty());
        assert_eq!(registry.register_chord(["a", "b"], noop()), Ok(BindingId(2)));
    }

    #[test]
    fn test_matches_exact_chords_only() {
        let registry = Registry::default();
        let abc = registry.register_chord(["a", "b", "c"], noop()).unwrap();
        registry.register_tap("a", 2, noop()).unwrap();

        assert!(registry.match_chord(&live(&["a", "b"])).is_none());
        assert_eq!(registry.match_chord(&live(&["c", "a", "b"])).map(|b| b.id()), Some(abc));
        assert!(registry.match_chord(&live(&["a", "b", "c", "d"])).is_none());
        assert!(registry.match_chord(&live(&["a"])).is_none());
    }

    #[test]
    fn test_first_registered_chord_wins() {
        let registry = Registry::default();
        let first = registry.register_chord(["a", "b"], noop()).unwrap();
        let _ = registry.register_chord(["a", "c"], noop()).unwrap();
        assert_eq!(registry.match_chord(&live(&["b", "a"])).map(|b| b.id()), Some(first));
    }

    #[test]
    fn test_matches_taps_by_count() {
        let registry = Registry::default();
        let id = registry.register_tap("x", 2, noop()).unwrap();
        let x = ColdKey::from_char('x');
        assert!(registry.match_tap(&x, 1).is_none());
        assert_eq!(registry.match_tap(&x, 2).map(|b| b.id()), Some(id));
        assert!(registry.match_tap(&x, 3).is_none());
        assert!(registry.match_tap(&ColdKey::from_char('y'), 2).is_none());
    }

    #[test]
    fn test_overrides_set_replace_and_clear_sides() {
        let registry = Registry::default();
        let shift = NamedKey::ShiftLeft;
        registry.set_override(shift, KeyEdge::Press, noop().named("p1")).unwrap();
        registry.set_override(shift, KeyEdge::Press, noop().named("p2")).unwrap();
        registry.set_override(shift, KeyEdge::Release, noop().named("r")).unwrap();

        let found = registry.override_for(&ColdKey::named(shift)).unwrap();
        assert_eq!(found.on_press().map(Action::label), Some("p2"));
        assert_eq!(found.action(KeyEdge::Release).map(Action::label), Some("r"));
        assert_eq!(registry.list_overrides().len(), 1);

        assert!(registry.clear_override(shift, Some(KeyEdge::Press)));
        let found = registry.override_for(&ColdKey::named(shift)).unwrap();
        assert!(found.on_press().is_none());
        assert_eq!(
            found.info(),
            OverrideInfo {
                key: "shift_l".into(),
                on_press: false,
                on_release: true
            }
        );

        assert!(registry.clear_override(shift, Some(KeyEdge::Release)));
        assert!(registry.override_for(&ColdKey::named(shift)).is_none());
        assert!(registry.list_overrides().is_empty());
        assert!(!registry.clear_override(shift, None));
    }

    #[test]
    fn test_overrides_are_independent_of_bindings() {
        let registry = Registry::default();
        registry.set_override("x", KeyEdge::Press, noop()).unwrap();
        assert!(registry.register_tap("x", 2, noop()).is_ok());
        assert!(registry.register_chord(["x", "y"], noop()).is_ok());
        registry.clear_all_overrides();
        assert!(registry.list_overrides().is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.set_override("", KeyEdge::Press, noop()),
            Err(RegisterError::InvalidKey)
        );
    }

    #[test]
    fn test_snapshots_are_detached_copies() {
        let registry = Registry::default();
        registry.register_chord(["a", "b"], noop().named("ab")).unwrap();
        let snapshot = registry.list();
        registry.unregister_all();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot[0].info(),
            BindingInfo {
                id: BindingId(1),
                keys: vec!["a".into(), "b".into()],
                count: None,
                label: "ab".into(),
            }
        );
        assert_eq!(snapshot[0].to_string(), "<HotKey id=#1 keys=(a, b)>");
    }

    #[test]
    fn test_concurrent_registration_yields_unique_ids() {
        let registry = Arc::new(Registry::default());
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let ch = char::from_digit(i, 10).unwrap();
                    registry.register_tap(ch, 2, Action::new(|| {})).unwrap()
                })
            })
            .collect();
        let mut ids: Vec<BindingId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(registry.list().len(), 8);
    }
}
