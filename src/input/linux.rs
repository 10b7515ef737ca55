/*!
 * Linux Input Injection
 *
 * Uses xdotool to inject keyboard events on X11.
 * - Press/release via `xdotool keydown` / `xdotool keyup`
 * - Text via `xdotool type`, which handles punctuation and unicode
 * - Keys are translated to X keysym names before being handed to xdotool
 */

use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use super::KeyController;
use crate::key::{ColdKey, NamedKey};

/// Injects keys by shelling out to `xdotool`.
#[derive(Debug, Clone)]
pub struct XdotoolController {
    type_delay_ms: u32,
}

impl Default for XdotoolController {
    fn default() -> Self {
        Self::new()
    }
}

impl XdotoolController {
    pub fn new() -> Self {
        Self { type_delay_ms: 12 }
    }

    /// Delay between characters for [`KeyController::type_text`].
    pub fn with_type_delay(mut self, delay_ms: u32) -> Self {
        self.type_delay_ms = delay_ms;
        self
    }

    pub fn is_available() -> bool {
        Command::new("which")
            .arg("xdotool")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        debug!("xdotool command: {}", args.join(" "));

        let output = Command::new("xdotool")
            .args(args)
            .output()
            .context("Failed to execute xdotool")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("xdotool {} failed: {}", args[0], stderr);
            bail!("xdotool {} failed: {}", args[0], stderr);
        }
        Ok(())
    }
}

impl KeyController for XdotoolController {
    fn press(&self, key: &ColdKey) -> Result<()> {
        let keysym = keysym(key)?;
        info!("Injecting key down: {}", keysym);
        self.run(&["keydown", &keysym])
    }

    fn release(&self, key: &ColdKey) -> Result<()> {
        let keysym = keysym(key)?;
        info!("Injecting key up: {}", keysym);
        self.run(&["keyup", &keysym])
    }

    fn type_text(&self, text: &str) -> Result<()> {
        info!("Typing string: {} chars (delay: {}ms)", text.chars().count(), self.type_delay_ms);
        let delay = self.type_delay_ms.to_string();
        // "--" ends option parsing so text starting with '-' is typed verbatim
        self.run(&["type", "--delay", &delay, "--", text])
    }
}

/// X keysym name for `key`.
pub fn keysym(key: &ColdKey) -> Result<String> {
    if let Some(ch) = key.ch() {
        return Ok(char_keysym(ch));
    }
    match key.named_key() {
        Some(named) => Ok(named_keysym(named).to_string()),
        None => bail!("No keysym for key {}", key),
    }
}

fn char_keysym(ch: char) -> String {
    let name = match ch {
        c if c.is_ascii_alphanumeric() => return c.to_string(),
        ' ' => "space",
        '.' => "period",
        ',' => "comma",
        '/' => "slash",
        '\\' => "backslash",
        ';' => "semicolon",
        ':' => "colon",
        '\'' => "apostrophe",
        '"' => "quotedbl",
        '[' => "bracketleft",
        ']' => "bracketright",
        '{' => "braceleft",
        '}' => "braceright",
        '(' => "parenleft",
        ')' => "parenright",
        '<' => "less",
        '>' => "greater",
        '-' => "minus",
        '_' => "underscore",
        '=' => "equal",
        '+' => "plus",
        '*' => "asterisk",
        '`' => "grave",
        '~' => "asciitilde",
        '!' => "exclam",
        '?' => "question",
        '@' => "at",
        '#' => "numbersign",
        '$' => "dollar",
        '%' => "percent",
        '^' => "asciicircum",
        '&' => "ampersand",
        '|' => "bar",
        '\t' => "Tab",
        '\n' | '\r' => "Return",
        other => return format!("U{:04X}", other as u32),
    };
    name.to_string()
}

fn named_keysym(key: NamedKey) -> &'static str {
    match key {
        NamedKey::Backspace => "BackSpace",
        NamedKey::Tab => "Tab",
        NamedKey::Enter => "Return",
        NamedKey::Shift | NamedKey::ShiftLeft => "Shift_L",
        NamedKey::ShiftRight => "Shift_R",
        NamedKey::Ctrl | NamedKey::CtrlLeft => "Control_L",
        NamedKey::CtrlRight => "Control_R",
        NamedKey::Alt | NamedKey::AltLeft => "Alt_L",
        NamedKey::AltRight => "ISO_Level3_Shift",
        NamedKey::Pause => "Pause",
        NamedKey::CapsLock => "Caps_Lock",
        NamedKey::Esc => "Escape",
        NamedKey::Space => "space",
        NamedKey::PageUp => "Prior",
        NamedKey::PageDown => "Next",
        NamedKey::End => "End",
        NamedKey::Home => "Home",
        NamedKey::Left => "Left",
        NamedKey::Up => "Up",
        NamedKey::Right => "Right",
        NamedKey::Down => "Down",
        NamedKey::PrintScreen => "Print",
        NamedKey::Insert => "Insert",
        NamedKey::Delete => "Delete",
        NamedKey::CmdLeft => "Super_L",
        NamedKey::CmdRight => "Super_R",
        NamedKey::Menu => "Menu",
        NamedKey::F1 => "F1",
        NamedKey::F2 => "F2",
        NamedKey::F3 => "F3",
        NamedKey::F4 => "F4",
        NamedKey::F5 => "F5",
        NamedKey::F6 => "F6",
        NamedKey::F7 => "F7",
        NamedKey::F8 => "F8",
        NamedKey::F9 => "F9",
        NamedKey::F10 => "F10",
        NamedKey::F11 => "F11",
        NamedKey::F12 => "F12",
        NamedKey::F13 => "F13",
        NamedKey::F14 => "F14",
        NamedKey::F15 => "F15",
        NamedKey::F16 => "F16",
        NamedKey::F17 => "F17",
        NamedKey::F18 => "F18",
        NamedKey::F19 => "F19",
        NamedKey::F20 => "F20",
        NamedKey::NumLock => "Num_Lock",
        NamedKey::ScrollLock => "Scroll_Lock",
        NamedKey::MediaVolumeMute => "XF86AudioMute",
        NamedKey::MediaVolumeDown => "XF86AudioLowerVolume",
        NamedKey::MediaVolumeUp => "XF86AudioRaiseVolume",
        NamedKey::MediaNext => "XF86AudioNext",
        NamedKey::MediaPrevious => "XF86AudioPrev",
        NamedKey::MediaPlayPause => "XF86AudioPlay",
    }
}
