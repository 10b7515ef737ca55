//! Synthetic keyboard input
//!
//! `KeyController` is the seam to the platform's input injection. `HeldKeys`
//! keeps a set of keys pressed for the lifetime of a scope and releases them in
//! reverse order when dropped, including when pressing fails partway through.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::key::ColdKey;

// Linux implementation
#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::XdotoolController;

pub trait KeyController: Send + Sync {
    fn press(&self, key: &ColdKey) -> Result<()>;

    fn release(&self, key: &ColdKey) -> Result<()>;

    fn tap(&self, key: &ColdKey) -> Result<()> {
        self.press(key)?;
        self.release(key)
    }

    fn type_text(&self, text: &str) -> Result<()>;
}

/// The injection backend for this platform.
#[cfg(target_os = "linux")]
pub fn system_controller() -> Result<Arc<dyn KeyController>> {
    if !XdotoolController::is_available() {
        anyhow::bail!("xdotool not found in PATH");
    }
    Ok(Arc::new(XdotoolController::new()))
}

// Other platforms: not implemented yet
#[cfg(not(target_os = "linux"))]
pub fn system_controller() -> Result<Arc<dyn KeyController>> {
    anyhow::bail!("Input injection not implemented for this platform yet")
}

/// Keys held down until the guard is dropped.
pub struct HeldKeys<'a> {
    controller: &'a dyn KeyController,
    keys: Vec<ColdKey>,
}

impl<'a> HeldKeys<'a> {
    /// Press `keys` in order. If one fails, the ones already down are released
    /// before the error is returned.
    pub fn acquire(controller: &'a dyn KeyController, keys: &[ColdKey]) -> Result<Self> {
        let mut held = Self {
            controller,
            keys: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            controller.press(key)?;
            held.keys.push(*key);
        }
        Ok(held)
    }

    pub fn keys(&self) -> &[ColdKey] {
        &self.keys
    }
}

impl Drop for HeldKeys<'_> {
    fn drop(&mut self) {
        for key in self.keys.iter().rev() {
            if let Err(e) = self.controller.release(key) {
                warn!("Failed to release held key {}: {:#}", key, e);
            }
        }
    }
}

/// Run `f` with `keys` held down.
pub fn hold<R, F>(controller: &dyn KeyController, keys: &[ColdKey], f: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    let _held = HeldKeys::acquire(controller, keys)?;
    Ok(f())
}
