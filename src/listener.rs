/*!
 * Raw key event sources
 *
 * A `KeySource` owns the thread that delivers key-down/key-up notifications
 * and forwards each one, strictly in order, to a `KeyEventSink` that decides
 * whether the platform event should be swallowed.
 *
 * `ChannelSource` is the portable source: events pushed through a
 * `ChannelSender` are delivered on one dedicated thread, and every
 * `(event, suppressed)` decision is reported back on a tokio channel.
 */

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::parse_key;
use crate::key::RawKey;

/// Receives raw key events. The return value asks the source to suppress the
/// platform event.
pub trait KeyEventSink: Send + Sync {
    fn on_press(&self, key: RawKey, timestamp: Option<f64>) -> bool;
    fn on_release(&self, key: RawKey, timestamp: Option<f64>) -> bool;
}

/// Lifecycle of a raw event producer.
///
/// A started source is shared: `stop` may be called from any thread, including
/// while another thread is blocked in `wait`, and it unblocks that waiter.
pub trait KeySource: Send + Sync {
    fn start(&mut self, sink: Arc<dyn KeyEventSink>) -> Result<()>;
    /// Ask the delivery thread to finish and block until it has. From inside
    /// the delivery thread itself this only asks.
    fn stop(&self);
    /// True from `start` until the delivery thread exits.
    fn is_running(&self) -> bool;
    /// Block until the delivery thread has finished.
    fn wait(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEventKind {
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawKeyEvent {
    pub kind: KeyEventKind,
    pub key: RawKey,
    pub timestamp: Option<f64>,
}

impl RawKeyEvent {
    pub fn press(key: RawKey, timestamp: Option<f64>) -> Self {
        Self {
            kind: KeyEventKind::Press,
            key,
            timestamp,
        }
    }

    pub fn release(key: RawKey, timestamp: Option<f64>) -> Self {
        Self {
            kind: KeyEventKind::Release,
            key,
            timestamp,
        }
    }

    /// Hand the event to `sink`, returning its suppression decision.
    pub fn deliver(&self, sink: &dyn KeyEventSink) -> bool {
        match self.kind {
            KeyEventKind::Press => sink.on_press(self.key, self.timestamp),
            KeyEventKind::Release => sink.on_release(self.key, self.timestamp),
        }
    }
}

impl fmt::Display for RawKeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            KeyEventKind::Press => "down",
            KeyEventKind::Release => "up",
        };
        let key = match (self.key.ch, self.key.code) {
            (Some(ch), _) => ch.to_string(),
            (None, Some(code)) => format!("<{}>", code),
            (None, None) => "?".to_string(),
        };
        match self.timestamp {
            Some(ts) => write!(f, "{} {} {}", kind, key, ts),
            None => write!(f, "{} {}", kind, key),
        }
    }
}

/// Parses script lines of the form `down|up <key> [timestamp]`.
impl FromStr for RawKeyEvent {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let kind = match parts.next() {
            Some("down") | Some("press") => KeyEventKind::Press,
            Some("up") | Some("release") => KeyEventKind::Release,
            Some(other) => bail!("Unknown event kind '{}'", other),
            None => bail!("Empty event line"),
        };
        let key = parts.next().ok_or_else(|| anyhow!("Missing key in '{}'", line))?;
        let key = parse_key(key)?.to_raw();
        let timestamp = parts
            .next()
            .map(|ts| ts.parse::<f64>())
            .transpose()
            .with_context(|| format!("Invalid timestamp in '{}'", line))?;
        if parts.next().is_some() {
            bail!("Trailing input in '{}'", line);
        }
        Ok(Self {
            kind,
            key,
            timestamp,
        })
    }
}

enum Message {
    Event(RawKeyEvent),
    Stop,
}

/// Feeds events into a [`ChannelSource`]. Cheap to clone.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelSender {
    pub fn send(&self, event: RawKeyEvent) -> Result<()> {
        self.tx
            .send(Message::Event(event))
            .map_err(|_| anyhow!("Key event source is closed"))
    }

    pub fn press(&self, key: RawKey, timestamp: Option<f64>) -> Result<()> {
        self.send(RawKeyEvent::press(key, timestamp))
    }

    pub fn release(&self, key: RawKey, timestamp: Option<f64>) -> Result<()> {
        self.send(RawKeyEvent::release(key, timestamp))
    }
}

/// Decision stream: every delivered event with the sink's verdict.
pub type Decisions = mpsc::UnboundedReceiver<(RawKeyEvent, bool)>;

/// Delivery thread state shared with the source.
struct Shared {
    running: AtomicBool,
    finished: Mutex<bool>,
    done: Condvar,
}

impl Shared {
    fn wait_finished(&self) {
        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        while !*finished {
            finished = self.done.wait(finished).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Marks the delivery thread finished on exit, also when a sink panics.
struct Finished(Arc<Shared>);

impl Drop for Finished {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
        *self.0.finished.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.0.done.notify_all();
    }
}

pub struct ChannelSource {
    /// Weak so that dropping every `ChannelSender` still ends delivery.
    control: mpsc::WeakUnboundedSender<Message>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    decisions: Option<mpsc::UnboundedSender<(RawKeyEvent, bool)>>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread: Option<ThreadId>,
}

impl ChannelSource {
    /// Create a source with its sender and decision stream.
    pub fn channel() -> (Self, ChannelSender, Decisions) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (decisions, decisions_rx) = mpsc::unbounded_channel();
        let source = Self {
            control: tx.downgrade(),
            rx: Mutex::new(Some(rx)),
            decisions: Some(decisions),
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                finished: Mutex::new(false),
                done: Condvar::new(),
            }),
            handle: Mutex::new(None),
            thread: None,
        };
        (source, ChannelSender { tx }, decisions_rx)
    }

    fn on_delivery_thread(&self) -> bool {
        self.thread == Some(thread::current().id())
    }

    /// Join the finished delivery thread, once.
    fn reap(&self) {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("[Listener] delivery thread panicked");
            }
        }
    }
}

impl KeySource for ChannelSource {
    fn start(&mut self, sink: Arc<dyn KeyEventSink>) -> Result<()> {
        if self.is_running() {
            warn!("[Listener] already running");
            return Ok(());
        }
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let (Some(mut rx), Some(decisions)) = (rx, self.decisions.take()) else {
            bail!("Channel source cannot be restarted once stopped");
        };

        self.shared.running.store(true, Ordering::SeqCst);
        let finished = Finished(self.shared.clone());

        let handle = thread::Builder::new()
            .name("hotkey-events".into())
            .spawn(move || {
                let _finished = finished;
                info!("[Listener] delivery thread started");
                while let Some(message) = rx.blocking_recv() {
                    let Message::Event(event) = message else {
                        break;
                    };
                    let suppressed = event.deliver(sink.as_ref());
                    debug!("[Listener] {} -> suppressed={}", event, suppressed);
                    let _ = decisions.send((event, suppressed));
                }
                drop(rx);
                drop(decisions);
                info!("[Listener] delivery thread stopped");
            });
        match handle {
            Ok(handle) => {
                self.thread = Some(handle.thread().id());
                *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(e).context("Failed to spawn key delivery thread")
            }
        }
    }

    fn stop(&self) {
        if self.thread.is_none() {
            return;
        }
        if self.is_running() {
            info!("[Listener] stopping");
            if let Some(tx) = self.control.upgrade() {
                let _ = tx.send(Message::Stop);
            }
        }
        if self.on_delivery_thread() {
            // Stopped from inside a callback; the loop exits on its own.
            return;
        }
        self.shared.wait_finished();
        self.reap();
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Returns once the source is stopped or every [`ChannelSender`] is dropped.
    fn wait(&self) {
        if self.thread.is_none() {
            return;
        }
        if self.on_delivery_thread() {
            warn!("[Listener] wait() called from the delivery thread");
            return;
        }
        self.shared.wait_finished();
        self.reap();
    }
}

impl Drop for ChannelSource {
    fn drop(&mut self) {
        self.stop();
    }
}
