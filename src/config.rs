//! Engine settings and binding files.
//!
//! Settings can be built in code or read from an INI file:
//!
//! ```ini
//! [engine]
//! ttl = 5
//! interval = 0.3
//! suppress_hotkey = false
//! suppress_override = false
//!
//! [chords]
//! undo = ctrl+z
//! launcher = ctrl+alt+space
//!
//! [taps]
//! palette = shift*2
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use configparser::ini::Ini;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::action::Action;
use crate::error::RegisterError;
use crate::key::{ColdKey, NamedKey};
use crate::registry::{BindingId, Registry};

pub const DEFAULT_TTL: u32 = 5;
pub const DEFAULT_INTERVAL: f64 = 0.3;

const ENGINE_SECTION: &str = "engine";
const CHORDS_SECTION: &str = "chords";
const TAPS_SECTION: &str = "taps";

/// Dispatcher tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds a press stays live without a release.
    pub ttl: u32,
    /// Longest gap, in seconds, between releases counted as one tap chain.
    pub interval: f64,
    /// Swallow the key event that fired a chord or tap binding.
    pub suppress_hotkey: bool,
    /// Swallow the key event that fired an override.
    pub suppress_override: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            interval: DEFAULT_INTERVAL,
            suppress_hotkey: false,
            suppress_override: false,
        }
    }
}

impl EngineConfig {
    /// TTL must exceed 3, otherwise the default is used.
    pub fn sanitize_ttl(ttl: i64) -> u32 {
        if ttl > 3 {
            u32::try_from(ttl).unwrap_or(u32::MAX)
        } else {
            DEFAULT_TTL
        }
    }

    /// Interval must lie in (0, 1], otherwise the default is used.
    pub fn sanitize_interval(interval: f64) -> f64 {
        if interval > 0.0 && interval <= 1.0 {
            interval
        } else {
            DEFAULT_INTERVAL
        }
    }

    /// Copy with out-of-range values reset to their defaults.
    pub fn sanitized(self) -> Self {
        Self {
            ttl: Self::sanitize_ttl(i64::from(self.ttl)),
            interval: Self::sanitize_interval(self.interval),
            ..self
        }
    }

    fn from_ini(conf: &Ini) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ttl) = conf.getint(ENGINE_SECTION, "ttl").map_err(|e| anyhow!(e))? {
            config.ttl = Self::sanitize_ttl(ttl);
        }
        if let Some(interval) = conf
            .getfloat(ENGINE_SECTION, "interval")
            .map_err(|e| anyhow!(e))?
        {
            config.interval = Self::sanitize_interval(interval);
        }
        if let Some(flag) = conf
            .getboolcoerce(ENGINE_SECTION, "suppress_hotkey")
            .map_err(|e| anyhow!(e))?
        {
            config.suppress_hotkey = flag;
        }
        if let Some(flag) = conf
            .getboolcoerce(ENGINE_SECTION, "suppress_override")
            .map_err(|e| anyhow!(e))?
        {
            config.suppress_override = flag;
        }
        Ok(config)
    }
}

/// Parse one key token: a key name (`ctrl_l`, `f5`, `space`) or a single character.
pub fn parse_key(token: &str) -> Result<ColdKey> {
    let token = token.trim();
    if token.is_empty() {
        bail!("Empty key name");
    }
    if let Some(named) = NamedKey::from_name(token) {
        return Ok(ColdKey::named(named));
    }
    ColdKey::from_str_key(token).ok_or_else(|| anyhow!("Unknown key '{}'", token))
}

/// Parse a `+` separated chord such as `ctrl+alt+z`. A trailing `++` names the
/// plus key itself.
pub fn parse_key_spec(spec: &str) -> Result<Vec<ColdKey>> {
    let spec = spec.trim();
    let (body, plus) = match spec.strip_suffix("++") {
        Some(body) => (body, true),
        None if spec == "+" => ("", true),
        None => (spec, false),
    };

    let mut keys = Vec::new();
    if !body.is_empty() {
        for token in body.split('+') {
            let key = parse_key(token).with_context(|| format!("Invalid key spec '{}'", spec))?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    if plus {
        let key = ColdKey::from_char('+');
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    if keys.is_empty() {
        bail!("Key spec is empty");
    }
    Ok(keys)
}

/// Parse a tap spec `key*count`, e.g. `shift*2`.
pub fn parse_tap_spec(spec: &str) -> Result<(ColdKey, u32)> {
    let spec = spec.trim();
    let Some((key, count)) = spec.rsplit_once('*') else {
        bail!("Tap spec '{}' must look like key*count", spec);
    };
    let key = parse_key(key).with_context(|| format!("Invalid tap spec '{}'", spec))?;
    let count: u32 = count
        .trim()
        .parse()
        .with_context(|| format!("Invalid tap count in '{}'", spec))?;
    if count < 2 {
        bail!("Tap count in '{}' must be at least 2", spec);
    }
    Ok((key, count))
}

/// Trigger read from a binding file.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySpec {
    Chord(Vec<ColdKey>),
    Tap { key: ColdKey, count: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedBinding {
    pub name: String,
    pub spec: KeySpec,
}

/// Settings plus named bindings loaded from one INI file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BindingFile {
    pub engine: EngineConfig,
    pub bindings: Vec<NamedBinding>,
}

impl BindingFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file = Self::parse(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(
            "Loaded {} bindings from {}",
            file.bindings.len(),
            path.display()
        );
        Ok(file)
    }

    /// Load from [`default_config_path`], or defaults when that file is absent.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No binding file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut conf = Ini::new();
        conf.read(text.to_string()).map_err(|e| anyhow!(e))?;

        let engine = EngineConfig::from_ini(&conf)?;
        let mut bindings = Vec::new();
        for (name, value) in section_entries(&conf, CHORDS_SECTION)? {
            let keys = parse_key_spec(&value).with_context(|| format!("[chords] {}", name))?;
            bindings.push(NamedBinding {
                name,
                spec: KeySpec::Chord(keys),
            });
        }
        for (name, value) in section_entries(&conf, TAPS_SECTION)? {
            let (key, count) = parse_tap_spec(&value).with_context(|| format!("[taps] {}", name))?;
            bindings.push(NamedBinding {
                name,
                spec: KeySpec::Tap { key, count },
            });
        }
        Ok(Self { engine, bindings })
    }

    /// Register every binding, building each action with `make_action`.
    /// Returns the per-binding outcome in file order.
    pub fn register_all<F>(
        &self,
        registry: &Registry,
        mut make_action: F,
    ) -> Vec<(String, Result<BindingId, RegisterError>)>
    where
        F: FnMut(&NamedBinding) -> Action,
    {
        self.bindings
            .iter()
            .map(|binding| {
                let action = make_action(binding).named(binding.name.clone());
                let outcome = match &binding.spec {
                    KeySpec::Chord(keys) => registry.register_chord(keys.iter().copied(), action),
                    KeySpec::Tap { key, count } => registry.register_tap(*key, *count, action),
                };
                (binding.name.clone(), outcome)
            })
            .collect()
    }
}

/// Entries of `section` sorted by name. Missing sections yield nothing.
fn section_entries(conf: &Ini, section: &str) -> Result<Vec<(String, String)>> {
    let Some(entries) = conf.get_map_ref().get(section) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        match value {
            Some(value) => out.push((name.clone(), value.clone())),
            None => bail!("[{}] {} has no key spec", section, name),
        }
    }
    out.sort();
    Ok(out)
}

/// `<config_dir>/hotkeyboard/hotkeyboard.ini`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hotkeyboard").join("hotkeyboard.ini"))
}
