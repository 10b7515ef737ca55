//! Swappable engine logger.
//!
//! Engine and registry messages go through the [`Logger`] trait so a host can
//! plug in its own sink or silence the engine entirely. The active logger is a
//! no-op until logging is switched on; the selected logger defaults to
//! [`TracingLogger`], which forwards into `tracing`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Severity-leveled log sink.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, args: fmt::Arguments<'_>);

    fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::TRACE, args);
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::DEBUG, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::INFO, args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::WARN, args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::ERROR, args);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _args: fmt::Arguments<'_>) {}
}

/// Forwards to the `tracing` macros under the `hotkeyboard` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        match level {
            Level::TRACE => tracing::trace!(target: "hotkeyboard", "{}", args),
            Level::DEBUG => tracing::debug!(target: "hotkeyboard", "{}", args),
            Level::INFO => tracing::info!(target: "hotkeyboard", "{}", args),
            Level::WARN => tracing::warn!(target: "hotkeyboard", "{}", args),
            Level::ERROR => tracing::error!(target: "hotkeyboard", "{}", args),
        }
    }
}

/// Shared handle holding the selected logger and whether it is switched on.
pub struct LogSwitch {
    selected: RwLock<Arc<dyn Logger>>,
    enabled: AtomicBool,
}

impl LogSwitch {
    pub fn new() -> Self {
        Self {
            selected: RwLock::new(Arc::new(TracingLogger)),
            enabled: AtomicBool::new(false),
        }
    }

    /// Select a new logger. Does not change whether logging is switched on.
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        *self.selected.write().unwrap_or_else(PoisonError::into_inner) = logger;
    }

    pub fn toggle(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// The logger currently in effect: the selected one when switched on,
    /// otherwise a no-op.
    pub fn current(&self) -> Arc<dyn Logger> {
        if self.is_enabled() {
            self.selected
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        } else {
            Arc::new(NoopLogger)
        }
    }
}

impl Default for LogSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for LogSwitch {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if self.is_enabled() {
            self.current().log(level, args);
        }
    }
}

/// Install the global `tracing` subscriber: `RUST_LOG` when set, otherwise
/// `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
