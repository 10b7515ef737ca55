//! Action invoker.
//!
//! An [`Action`] is a user callback with its arguments captured at
//! registration time. Invocation runs inside a sandbox: returned errors and
//! panics are caught, logged with the origin of the call, and swallowed so the
//! listener loop keeps running.
//!
//! There is no timeout. A callback that blocks stalls the delivery thread.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::logging::Logger;

type Callback = dyn Fn() -> anyhow::Result<()> + Send + Sync;

/// Why a callback did not complete.
#[derive(Debug, Error)]
pub enum ActionFailure {
    #[error("returned error: {0:#}")]
    Error(anyhow::Error),

    #[error("panicked: {0}")]
    Panicked(String),
}

/// A callable plus its bound arguments, invoked with no further arguments.
#[derive(Clone)]
pub struct Action {
    label: Arc<str>,
    callback: Arc<Callback>,
}

impl Action {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::fallible(move || {
            f();
            Ok(())
        })
    }

    /// Wrap a callback whose `Err` is reported as a failure.
    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            label: Arc::from("action"),
            callback: Arc::new(f),
        }
    }

    /// Bind `args` now; `f` receives them on every invocation.
    pub fn bind<A, F>(f: F, args: A) -> Self
    where
        A: Send + Sync + 'static,
        F: Fn(&A) + Send + Sync + 'static,
    {
        Self::new(move || f(&args))
    }

    /// Attach a human readable label used in logs.
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Arc::from(label.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the callback, returning any failure instead of logging it.
    pub fn try_invoke(&self) -> Result<(), ActionFailure> {
        sandbox(|| (self.callback)())
    }

    /// Run the callback; failures are logged against `origin` and swallowed.
    /// Returns whether the callback completed.
    pub fn invoke(&self, origin: &dyn fmt::Display, log: &dyn Logger) -> bool {
        match self.try_invoke() {
            Ok(()) => true,
            Err(failure) => {
                log.error(format_args!(
                    "[Action] {} ({}) failed: {}",
                    origin, self.label, failure
                ));
                false
            }
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("label", &self.label).finish()
    }
}

/// Run `f`, converting both `Err` results and panics into [`ActionFailure`].
pub(crate) fn sandbox<F>(f: F) -> Result<(), ActionFailure>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ActionFailure::Error(e)),
        Err(payload) => Err(ActionFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::tests::CaptureLogger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::Level;

    #[test]
    fn test_invokes_with_bound_arguments() {
        let hits = Arc::new(AtomicUsize::new(0));
        let action = Action::bind(
            |(counter, step): &(Arc<AtomicUsize>, usize)| {
                counter.fetch_add(*step, Ordering::SeqCst);
            },
            (hits.clone(), 5),
        );

        assert!(action.try_invoke().is_ok());
        assert!(action.try_invoke().is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_reports_returned_errors() {
        let action = Action::fallible(|| anyhow::bail!("disk full")).named("save");
        match action.try_invoke() {
            Err(ActionFailure::Error(e)) => assert_eq!(e.to_string(), "disk full"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_contains_panics_and_logs_origin() {
        let log = CaptureLogger::default();
        let action = Action::new(|| panic!("boom")).named("exploding");

        assert!(!action.invoke(&"hotkey #4", &log));
        assert!(log.contains(Level::ERROR, "hotkey #4 (exploding) failed: panicked: boom"));

        // Still callable afterwards.
        assert!(!action.invoke(&"hotkey #4", &log));
    }

    #[test]
    fn test_formatted_panic_payloads_are_kept() {
        let code = 42;
        let failure = sandbox(|| panic!("code {}", code)).unwrap_err();
        assert_eq!(failure.to_string(), "panicked: code 42");
    }

    #[test]
    fn test_debug_shows_label() {
        let action = Action::new(|| {}).named("noop");
        assert_eq!(format!("{:?}", action), "Action { label: \"noop\" }");
        assert_eq!(action.label(), "noop");
    }
}
