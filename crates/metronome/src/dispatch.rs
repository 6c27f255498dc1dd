// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::diagnostics::Reporter;
use crate::{Callback, TaskId};

/// Determines on which thread a timer invokes task callbacks.
///
/// # Examples
///
/// Deliver callbacks on the thread that owns the timer, even though the timer is driven
/// by a background thread:
///
/// ```
/// use std::time::Duration;
///
/// use metronome::{DispatchMode, Scheduler, Task, TickTimer};
/// use tick::Clock;
///
/// # fn example(clock: Clock) -> metronome::Result<()> {
/// let timer = TickTimer::builder(clock)
///     .interval(Duration::from_millis(10))
///     .dispatch(DispatchMode::Deferred)
///     .build()?;
///
/// timer.add_task(Task::new(Duration::from_millis(100), |id| println!("{id} fired")))?;
///
/// // Somewhere in the loop of the owning thread:
/// timer.drain();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Callbacks run on whichever thread fires or deletes the task.
    Immediate,

    /// Callbacks are queued and run when the owner calls the timer's `drain` method, on
    /// the thread that calls it.
    #[default]
    Deferred,
}

struct Pending {
    id: TaskId,
    callback: Callback,
}

/// First-in first-out buffer of callbacks waiting to be delivered.
///
/// Any number of threads may push; draining is meant to happen from one thread at a time.
#[derive(Default)]
pub(crate) struct DispatchQueue {
    entries: Mutex<VecDeque<Pending>>,
}

impl DispatchQueue {
    pub fn push(&self, id: TaskId, callback: Callback) {
        self.entries.lock().push_back(Pending { id, callback });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Invokes the callbacks that are buffered when the call starts, in the order in
    /// which they were pushed, and returns how many ran.
    ///
    /// Callbacks pushed while draining stay queued for the next call. The lock is released
    /// before each callback runs, so callbacks may push new entries.
    pub fn drain(&self, reporter: &Reporter) -> usize {
        let buffered = self.len();
        let mut invoked = 0;

        for _ in 0..buffered {
            let next = self.entries.lock().pop_front();

            match next {
                Some(pending) => {
                    (pending.callback)(pending.id);
                    invoked += 1;
                }
                None => reporter.error(format_args!("dispatch queue entry vanished while draining")),
            }
        }

        invoked
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue").field("len", &self.len()).finish()
    }
}

/// Delivers callbacks according to a [`DispatchMode`].
#[derive(Debug)]
pub(crate) enum Dispatcher {
    Immediate,
    Deferred(DispatchQueue),
}

impl Dispatcher {
    pub fn new(mode: DispatchMode) -> Self {
        match mode {
            DispatchMode::Immediate => Self::Immediate,
            DispatchMode::Deferred => Self::Deferred(DispatchQueue::default()),
        }
    }

    pub fn dispatch(&self, id: TaskId, callback: &Callback) {
        match self {
            Self::Immediate => callback(id),
            Self::Deferred(queue) => queue.push(id, Callback::clone(callback)),
        }
    }

    pub fn pending(&self) -> usize {
        match self {
            Self::Immediate => 0,
            Self::Deferred(queue) => queue.len(),
        }
    }

    pub fn drain(&self, reporter: &Reporter) -> usize {
        match self {
            Self::Immediate => 0,
            Self::Deferred(queue) => queue.drain(reporter),
        }
    }
}
