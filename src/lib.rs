/*!
 * HotKeyboard Library
 *
 * Global hotkey engine: chords, multi-tap keys, per-key press/release
 * overrides and live shortcut recording, driven by a raw key event source.
 */

pub mod action;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod key;
pub mod keyboard;
pub mod listener;
pub mod logging;
pub mod recording;
pub mod registry;
pub mod stats;

// Re-export commonly used types
pub use action::{Action, ActionFailure};
pub use config::{BindingFile, EngineConfig};
pub use engine::Dispatcher;
pub use error::RegisterError;
pub use input::{HeldKeys, KeyController};
pub use key::{ColdKey, KeyInput, KeyNormalizer, LiveKey, NamedKey, RawKey};
pub use keyboard::HotKeyboard;
pub use listener::{ChannelSender, ChannelSource, KeyEventSink, KeySource, RawKeyEvent};
pub use logging::{init_tracing, LogSwitch, Logger, NoopLogger, TracingLogger};
pub use recording::{RecordingCallback, RecordingMode};
pub use registry::{Binding, BindingId, KeyEdge, Registry, Trigger};
pub use stats::StatsSnapshot;
