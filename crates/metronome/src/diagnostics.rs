// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;

use crate::TaskId;

/// Emits a `tracing` event at a fixed level, with the task id as a field when one is given.
macro_rules! emit {
    ($level:expr, $message:expr) => {
        tracing::event!($level, "{}", $message)
    };
    ($level:expr, $task:expr, $message:expr) => {{
        let task: TaskId = $task;
        tracing::event!($level, task_id = %task, "{}", $message)
    }};
}

/// A diagnostic hook receiving a formatted message.
pub type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional hooks notified about non-fatal conditions inside a timer.
///
/// Every condition is always emitted as a [`tracing`] event (`DEBUG` for informational
/// messages, `WARN` and `ERROR` otherwise). The hooks allow an application that does not
/// use `tracing` to route the same messages into its own logging. Messages for which no
/// hook is installed are dropped after the `tracing` event.
///
/// Conditions reported as warnings:
///
/// - deleting a task that is not registered,
/// - an identifier collision when registering a task,
/// - resetting a timer whose dispatch queue still holds callbacks,
/// - termination of a timer's background loop or of in-flight asynchronous tasks.
///
/// A dispatch queue entry that disappears while draining is reported as an error.
///
/// # Examples
///
/// ```
/// use metronome::Diagnostics;
///
/// let diagnostics = Diagnostics::new()
///     .on_warn(|message| eprintln!("timer warning: {message}"))
///     .on_error(|message| eprintln!("timer error: {message}"));
/// # drop(diagnostics);
/// ```
#[derive(Clone, Default)]
pub struct Diagnostics {
    log: Option<Hook>,
    warn: Option<Hook>,
    error: Option<Hook>,
}

impl Diagnostics {
    /// Creates diagnostics without any hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hook for informational messages, such as task completion.
    #[must_use]
    pub fn on_log(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log = Some(Arc::new(hook));
        self
    }

    /// Sets the hook for warnings.
    #[must_use]
    pub fn on_warn(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.warn = Some(Arc::new(hook));
        self
    }

    /// Sets the hook for errors.
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("log", &self.log.is_some())
            .field("warn", &self.warn.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// Routes reports to `tracing` and to the currently installed [`Diagnostics`].
///
/// The hooks can be replaced while the timer is in use. They are cloned out of the lock
/// before being invoked so that a hook may itself replace the diagnostics.
#[derive(Debug, Default)]
pub(crate) struct Reporter {
    hooks: RwLock<Diagnostics>,
}

impl Reporter {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            hooks: RwLock::new(diagnostics),
        }
    }

    pub fn set(&self, diagnostics: Diagnostics) {
        *self.hooks.write() = diagnostics;
    }

    pub fn log(&self, message: fmt::Arguments<'_>) {
        emit!(Level::DEBUG, message);
        let hook = self.hooks.read().log.clone();
        invoke(hook, message);
    }

    /// Like [`Reporter::log`], with `task` attached to the `tracing` event as `task_id`.
    pub fn log_task(&self, task: TaskId, message: fmt::Arguments<'_>) {
        emit!(Level::DEBUG, task, message);
        let hook = self.hooks.read().log.clone();
        invoke(hook, message);
    }

    pub fn warn(&self, message: fmt::Arguments<'_>) {
        emit!(Level::WARN, message);
        let hook = self.hooks.read().warn.clone();
        invoke(hook, message);
    }

    /// Like [`Reporter::warn`], with `task` attached to the `tracing` event as `task_id`.
    pub fn warn_task(&self, task: TaskId, message: fmt::Arguments<'_>) {
        emit!(Level::WARN, task, message);
        let hook = self.hooks.read().warn.clone();
        invoke(hook, message);
    }

    pub fn error(&self, message: fmt::Arguments<'_>) {
        emit!(Level::ERROR, message);
        let hook = self.hooks.read().error.clone();
        invoke(hook, message);
    }
}

fn invoke(hook: Option<Hook>, message: fmt::Arguments<'_>) {
    if let Some(hook) = hook {
        hook(&message.to_string());
    }
}
