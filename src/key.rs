//! Key identity model.
//!
//! A [`ColdKey`] is the canonical, comparable identity of a key: either a
//! (case-folded) character or a numeric virtual-key code. A [`LiveKey`] wraps a
//! `ColdKey` with the transient data the dispatcher needs: when the event
//! happened and how many times the key has been tapped in a row.
//!
//! Numeric codes use Windows virtual-key numbering as the canonical code space;
//! platform listeners are expected to translate into it before handing keys to
//! the engine (see [`KeyNormalizer`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! named_keys {
    ($($variant:ident => $code:expr, $name:literal $(, [$($alias:literal),*])?;)*) => {
        /// Special (non-character) keys with a stable code and name.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum NamedKey {
            $($variant,)*
        }

        impl NamedKey {
            /// Every named key, in declaration order.
            pub const ALL: &'static [NamedKey] = &[$(NamedKey::$variant,)*];

            /// Canonical virtual-key code.
            pub fn code(self) -> u32 {
                match self {
                    $(NamedKey::$variant => $code,)*
                }
            }

            /// Canonical lowercase name (`ctrl_l`, `f5`, ...).
            pub fn name(self) -> &'static str {
                match self {
                    $(NamedKey::$variant => $name,)*
                }
            }

            /// Resolve a key name or alias, ignoring case.
            pub fn from_name(name: &str) -> Option<NamedKey> {
                match name.trim().to_lowercase().as_str() {
                    $($name $($(| $alias)*)? => Some(NamedKey::$variant),)*
                    _ => None,
                }
            }

            pub fn from_code(code: u32) -> Option<NamedKey> {
                NamedKey::ALL.iter().copied().find(|key| key.code() == code)
            }
        }
    };
}

named_keys! {
    Backspace => 0x08, "backspace";
    Tab => 0x09, "tab";
    Enter => 0x0D, "enter", ["return"];
    Shift => 0x10, "shift";
    Ctrl => 0x11, "ctrl", ["control"];
    Alt => 0x12, "alt";
    Pause => 0x13, "pause";
    CapsLock => 0x14, "caps_lock", ["capslock"];
    Esc => 0x1B, "esc", ["escape"];
    Space => 0x20, "space";
    PageUp => 0x21, "page_up", ["pageup"];
    PageDown => 0x22, "page_down", ["pagedown"];
    End => 0x23, "end";
    Home => 0x24, "home";
    Left => 0x25, "left", ["leftarrow"];
    Up => 0x26, "up", ["uparrow"];
    Right => 0x27, "right", ["rightarrow"];
    Down => 0x28, "down", ["downarrow"];
    PrintScreen => 0x2C, "print_screen", ["printscreen"];
    Insert => 0x2D, "insert";
    Delete => 0x2E, "delete", ["forwarddelete"];
    CmdLeft => 0x5B, "cmd", ["cmd_l", "command", "win", "super"];
    CmdRight => 0x5C, "cmd_r";
    Menu => 0x5D, "menu";
    F1 => 0x70, "f1";
    F2 => 0x71, "f2";
    F3 => 0x72, "f3";
    F4 => 0x73, "f4";
    F5 => 0x74, "f5";
    F6 => 0x75, "f6";
    F7 => 0x76, "f7";
    F8 => 0x77, "f8";
    F9 => 0x78, "f9";
    F10 => 0x79, "f10";
    F11 => 0x7A, "f11";
    F12 => 0x7B, "f12";
    F13 => 0x7C, "f13";
    F14 => 0x7D, "f14";
    F15 => 0x7E, "f15";
    F16 => 0x7F, "f16";
    F17 => 0x80, "f17";
    F18 => 0x81, "f18";
    F19 => 0x82, "f19";
    F20 => 0x83, "f20";
    NumLock => 0x90, "num_lock", ["numlock"];
    ScrollLock => 0x91, "scroll_lock", ["scrolllock"];
    ShiftLeft => 0xA0, "shift_l";
    ShiftRight => 0xA1, "shift_r", ["rightshift"];
    CtrlLeft => 0xA2, "ctrl_l";
    CtrlRight => 0xA3, "ctrl_r", ["rightcontrol"];
    AltLeft => 0xA4, "alt_l", ["option"];
    AltRight => 0xA5, "alt_r", ["alt_gr", "rightoption"];
    MediaVolumeMute => 0xAD, "media_volume_mute";
    MediaVolumeDown => 0xAE, "media_volume_down";
    MediaVolumeUp => 0xAF, "media_volume_up";
    MediaNext => 0xB0, "media_next";
    MediaPrevious => 0xB1, "media_previous";
    MediaPlayPause => 0xB3, "media_play_pause";
}

impl fmt::Display for NamedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NamedKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NamedKey::from_name(s).ok_or_else(|| anyhow::anyhow!("Unknown key name: {}", s))
    }
}

/// A key as reported by the platform listener after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawKey {
    pub code: Option<u32>,
    pub ch: Option<char>,
}

impl RawKey {
    pub fn named(key: NamedKey) -> Self {
        Self {
            code: Some(key.code()),
            ch: None,
        }
    }

    pub fn char(ch: char) -> Self {
        Self {
            code: None,
            ch: Some(ch),
        }
    }

    pub fn code(code: u32) -> Self {
        Self {
            code: Some(code),
            ch: None,
        }
    }
}

/// Maps a raw platform key into a form suitable for [`ColdKey`] construction.
///
/// Scan-code translation, dead keys and the like are platform glue and live
/// outside this crate; the default normalizer passes keys through unchanged.
pub trait KeyNormalizer: Send + Sync {
    fn normalize(&self, raw: RawKey) -> RawKey;
}

impl<F> KeyNormalizer for F
where
    F: Fn(RawKey) -> RawKey + Send + Sync,
{
    fn normalize(&self, raw: RawKey) -> RawKey {
        self(raw)
    }
}

/// Normalizer that returns keys unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl KeyNormalizer for PassThrough {
    fn normalize(&self, raw: RawKey) -> RawKey {
        raw
    }
}

/// Canonical, immutable key identity.
///
/// Two keys are equal when both carry a character and the characters match;
/// otherwise their numeric codes decide. The relation is intentionally not
/// `Eq`/`Hash`: a key known only by code and one known only by character are
/// never equal, but each may equal a key that carries both.
#[derive(Clone, Copy)]
pub struct ColdKey {
    code: Option<u32>,
    ch: Option<char>,
}

impl ColdKey {
    pub fn named(key: NamedKey) -> Self {
        Self {
            code: Some(key.code()),
            ch: None,
        }
    }

    pub fn from_char(ch: char) -> Self {
        Self {
            code: None,
            ch: Some(fold_case(ch)),
        }
    }

    pub fn from_code(code: u32) -> Self {
        Self {
            code: Some(code),
            ch: None,
        }
    }

    /// Build from a string holding exactly one character.
    pub fn from_str_key(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Some(Self::from_char(ch)),
            _ => None,
        }
    }

    /// Build from a platform key. Fails when the key carries neither a code nor
    /// a character.
    pub fn from_raw(raw: RawKey) -> Option<Self> {
        if raw.code.is_none() && raw.ch.is_none() {
            return None;
        }
        Some(Self {
            code: raw.code,
            ch: raw.ch.map(fold_case),
        })
    }

    pub fn code(&self) -> Option<u32> {
        self.code
    }

    pub fn ch(&self) -> Option<char> {
        self.ch
    }

    /// The named key this identity refers to, if it is a bare named key.
    pub fn named_key(&self) -> Option<NamedKey> {
        match self.ch {
            Some(_) => None,
            None => self.code.and_then(NamedKey::from_code),
        }
    }

    pub fn to_raw(&self) -> RawKey {
        RawKey {
            code: self.code,
            ch: self.ch,
        }
    }
}

impl PartialEq for ColdKey {
    fn eq(&self, other: &Self) -> bool {
        match (self.ch, other.ch) {
            (Some(a), Some(b)) => a == b,
            _ => self.code == other.code,
        }
    }
}

impl fmt::Display for ColdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ch) = self.ch {
            return write!(f, "{}", ch);
        }
        match (self.named_key(), self.code) {
            (Some(named), _) => f.write_str(named.name()),
            (None, Some(code)) => write!(f, "<{}>", code),
            (None, None) => f.write_str("<?>"),
        }
    }
}

impl fmt::Debug for ColdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColdKey({})", self)
    }
}

impl From<NamedKey> for ColdKey {
    fn from(key: NamedKey) -> Self {
        ColdKey::named(key)
    }
}

fn fold_case(ch: char) -> char {
    let mut lower = ch.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(folded), None) => folded,
        _ => ch,
    }
}

/// Current wall-clock time in fractional seconds.
pub fn now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A pressed or just-released key.
#[derive(Debug, Clone, Copy)]
pub struct LiveKey {
    key: ColdKey,
    timestamp: f64,
    repeat: u32,
}

impl LiveKey {
    /// `timestamp` falls back to [`now`] when absent or non-positive; a zero
    /// repeat count becomes 1.
    pub fn new(key: ColdKey, timestamp: Option<f64>, repeat: u32) -> Self {
        let timestamp = match timestamp {
            Some(t) if t > 0.0 => t,
            _ => now(),
        };
        Self {
            key,
            timestamp,
            repeat: repeat.max(1),
        }
    }

    pub fn key(&self) -> ColdKey {
        self.key
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat
    }

    pub fn set_repeat_count(&mut self, repeat: u32) {
        self.repeat = repeat.max(1);
    }
}

impl PartialEq for LiveKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl PartialEq<ColdKey> for LiveKey {
    fn eq(&self, other: &ColdKey) -> bool {
        self.key == *other
    }
}

impl fmt::Display for LiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.key, f)
    }
}

/// Anything a caller may use to name a key.
#[derive(Debug, Clone)]
pub enum KeyInput {
    Named(NamedKey),
    Text(String),
    Char(char),
    Raw(RawKey),
    Cold(ColdKey),
    Live(LiveKey),
}

impl KeyInput {
    fn is_blank(&self) -> bool {
        matches!(self, KeyInput::Text(text) if text.is_empty())
    }

    /// Canonical identity, or `None` when the input has no canonical form.
    pub fn to_cold(&self) -> Option<ColdKey> {
        match self {
            KeyInput::Named(named) => Some(ColdKey::named(*named)),
            KeyInput::Text(text) => ColdKey::from_str_key(text),
            KeyInput::Char(ch) => Some(ColdKey::from_char(*ch)),
            KeyInput::Raw(raw) => ColdKey::from_raw(*raw),
            KeyInput::Cold(key) => Some(*key),
            KeyInput::Live(live) => Some(live.key()),
        }
    }
}

impl From<NamedKey> for KeyInput {
    fn from(key: NamedKey) -> Self {
        KeyInput::Named(key)
    }
}

impl From<&str> for KeyInput {
    fn from(text: &str) -> Self {
        KeyInput::Text(text.to_string())
    }
}

impl From<String> for KeyInput {
    fn from(text: String) -> Self {
        KeyInput::Text(text)
    }
}

impl From<char> for KeyInput {
    fn from(ch: char) -> Self {
        KeyInput::Char(ch)
    }
}

impl From<RawKey> for KeyInput {
    fn from(raw: RawKey) -> Self {
        KeyInput::Raw(raw)
    }
}

impl From<ColdKey> for KeyInput {
    fn from(key: ColdKey) -> Self {
        KeyInput::Cold(key)
    }
}

impl From<LiveKey> for KeyInput {
    fn from(key: LiveKey) -> Self {
        KeyInput::Live(key)
    }
}

impl From<&ColdKey> for KeyInput {
    fn from(key: &ColdKey) -> Self {
        KeyInput::Cold(*key)
    }
}

/// Normalize a key list: skip blanks and unrecognized entries, drop
/// duplicates, keep first-seen order.
pub fn to_cold_keys<I, K>(keys: I) -> Vec<ColdKey>
where
    I: IntoIterator<Item = K>,
    K: Into<KeyInput>,
{
    let mut cold: Vec<ColdKey> = Vec::new();
    for input in keys.into_iter().map(Into::into) {
        if input.is_blank() {
            continue;
        }
        let Some(key) = input.to_cold() else {
            continue;
        };
        if !cold.contains(&key) {
            cold.push(key);
        }
    }
    cold
}

/// Same membership, ignoring order. Both sides are expected to be deduplicated.
pub(crate) fn same_key_set(a: &[ColdKey], b: &[ColdKey]) -> bool {
    a.len() == b.len() && a.iter().all(|key| b.contains(key))
}

/// Record a press in a held-key list. Entries older than `ttl` relative to the
/// new press are evicted as stale; a still-held entry for the same key is
/// replaced by the fresh one. Returns whether the key was already held.
pub(crate) fn track_press(pressed: &mut Vec<LiveKey>, key: LiveKey, ttl: f64) -> bool {
    let now = key.timestamp();
    let mut held = false;
    pressed.retain(|k| {
        if now - k.timestamp() > ttl {
            return false;
        }
        if *k == key {
            held = true;
            return false;
        }
        true
    });
    pressed.push(key);
    held
}
