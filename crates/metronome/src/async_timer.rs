// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_channel::oneshot;
use futures_util::future::{Either, select};
use parking_lot::Mutex;
use tick::Clock;
use tokio::runtime::Handle;

use crate::diagnostics::Reporter;
use crate::dispatch::Dispatcher;
use crate::id::IdAllocator;
use crate::schedule::Correction;
use crate::task::Repeat;
use crate::{Callback, Diagnostics, DispatchMode, Error, Result, Scheduler, Task, TaskId};

/// A timer that runs one asynchronous activity per task on a Tokio runtime.
///
/// Each registered task waits for its first delay and then for its period, over and over,
/// on the runtime's worker threads. Every wait is corrected by the drift measured after the
/// previous one: the activity compares the time that really elapsed since the task's anchor
/// with `period * firings` and shortens or lengthens the next wait by the difference. Late
/// wake-ups and slow callbacks therefore do not accumulate.
///
/// Deleting a task interrupts its pending wait immediately. The task's activity then
/// delivers the cancellation callback, after the firing it may be in the middle of, and
/// fires no more. [`Scheduler::delete_task`] itself never waits for a callback.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use metronome::{AsyncTimer, DispatchMode, Scheduler, Task};
/// use tick::Clock;
///
/// # async fn example(clock: Clock) -> metronome::Result<()> {
/// let timer = AsyncTimer::builder(clock)
///     .dispatch(DispatchMode::Immediate)
///     .build()?;
///
/// let id = timer.add_task(
///     Task::new(Duration::from_millis(100), |id| println!("{id} fired"))
///         .period(Duration::from_millis(50))
///         .forever(),
/// )?;
///
/// // ...
///
/// timer.delete_task(id);
/// # Ok(())
/// # }
/// ```
pub struct AsyncTimer {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl AsyncTimer {
    /// Creates a builder for a timer waiting on `clock`.
    #[must_use]
    pub fn builder(clock: Clock) -> AsyncTimerBuilder {
        AsyncTimerBuilder::new(clock)
    }

    /// Invokes the queued callbacks on the calling thread and returns how many ran.
    ///
    /// Only the callbacks queued when the call starts are invoked, in the order in which
    /// they were queued. Does nothing in [`DispatchMode::Immediate`] mode.
    pub fn drain(&self) -> usize {
        self.shared.dispatcher.drain(&self.shared.reporter)
    }

    /// Returns the number of callbacks waiting for [`AsyncTimer::drain`].
    #[must_use]
    pub fn pending_dispatches(&self) -> usize {
        self.shared.dispatcher.pending()
    }

    /// Replaces the diagnostic hooks.
    pub fn set_diagnostics(&self, diagnostics: Diagnostics) {
        self.shared.reporter.set(diagnostics);
    }

    /// Returns the clock the timer waits on.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }
}

impl Scheduler for AsyncTimer {
    type Unit = Duration;

    fn add_task(&self, task: Task<Duration>) -> Result<TaskId> {
        let schedule = Schedule {
            registered: self.shared.clock.instant(),
            first_delay: task.first_delay,
            period: task.period,
            repeat: task.repeat(),
        };
        let (cancel, cancelled) = oneshot::channel();

        let record = {
            let mut ids = self.shared.ids.lock();
            let id = ids
                .next(|id| self.shared.tasks.contains_key(&id))
                .ok_or(Error::IdsExhausted)?;

            let record = Arc::new(Record {
                id,
                on_fire: task.on_fire,
                on_cancel: task.on_cancel,
                status: Mutex::new(Status::Live),
            });

            let inserted = match self.shared.tasks.entry(id) {
                Entry::Occupied(_) => false,
                Entry::Vacant(entry) => {
                    entry.insert(Registration {
                        record: Arc::clone(&record),
                        cancel,
                    });
                    true
                }
            };

            if !inserted {
                self.shared
                    .reporter
                    .warn_task(id, format_args!("task {id} is already registered"));
                return Err(Error::IdCollision(id));
            }

            record
        };

        let id = record.id;
        self.runtime.spawn(run(Arc::clone(&self.shared), record, schedule, cancelled));
        Ok(id)
    }

    /// Deletes a task and interrupts its pending wait.
    ///
    /// The cancellation callback is delivered by the task's activity as soon as it observes
    /// the deletion, through the same dispatch path as its firings.
    fn delete_task(&self, id: TaskId) -> bool {
        if !self.shared.take(id, Status::Deleted) {
            self.shared
                .reporter
                .warn_task(id, format_args!("task {id} cannot be deleted because it is not registered"));
            return false;
        }

        self.shared.reporter.log_task(id, format_args!("task {id} deleted"));
        true
    }

    /// Cancels every task without invoking cancellation callbacks.
    ///
    /// Callbacks that are already queued stay queued and are still delivered by
    /// [`AsyncTimer::drain`].
    fn reset(&self) {
        let pending = self.shared.dispatcher.pending();
        if pending > 0 {
            self.shared
                .reporter
                .warn(format_args!("resetting async timer with {pending} undelivered callbacks"));
        }

        self.shared.cancel_all();
    }

    fn len(&self) -> usize {
        self.shared.tasks.len()
    }

    fn contains(&self, id: TaskId) -> bool {
        self.shared.tasks.contains_key(&id)
    }
}

impl Drop for AsyncTimer {
    fn drop(&mut self) {
        let live = self.shared.tasks.len();
        if live > 0 {
            self.shared
                .reporter
                .warn(format_args!("async timer dropped with {live} tasks in flight"));
        }

        self.shared.cancel_all();
    }
}

impl fmt::Debug for AsyncTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTimer")
            .field("tasks", &self.shared.tasks.len())
            .field("dispatcher", &self.shared.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AsyncTimer`].
#[derive(Debug)]
pub struct AsyncTimerBuilder {
    clock: Clock,
    dispatch: DispatchMode,
    runtime: Option<Handle>,
    diagnostics: Diagnostics,
}

impl AsyncTimerBuilder {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            dispatch: DispatchMode::default(),
            runtime: None,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Sets how callbacks are delivered. Defaults to [`DispatchMode::Deferred`].
    #[must_use]
    pub const fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.dispatch = mode;
        self
    }

    /// Sets the runtime on which task activities run.
    ///
    /// Defaults to the runtime the timer is built in.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Sets the diagnostic hooks.
    #[must_use]
    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Builds the timer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] if no runtime was provided and the builder is not
    /// called from within a Tokio runtime.
    pub fn build(self) -> Result<AsyncTimer> {
        let runtime = self
            .runtime
            .or_else(|| Handle::try_current().ok())
            .ok_or(Error::NoRuntime)?;

        Ok(AsyncTimer {
            shared: Arc::new(Shared {
                clock: self.clock,
                tasks: DashMap::new(),
                ids: Mutex::new(IdAllocator::default()),
                dispatcher: Dispatcher::new(self.dispatch),
                reporter: Reporter::new(self.diagnostics),
            }),
            runtime,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Live,
    Deleted,
    Silenced,
}

/// State shared between a task's activity and the timer.
struct Record {
    id: TaskId,
    on_fire: Callback,
    on_cancel: Option<Callback>,
    // Written only while the task's map entry is locked, together with its removal.
    status: Mutex<Status>,
}

impl Record {
    fn status(&self) -> Status {
        *self.status.lock()
    }
}

struct Registration {
    record: Arc<Record>,
    // Dropping the sender interrupts the activity's pending wait.
    cancel: oneshot::Sender<()>,
}

struct Schedule {
    registered: Instant,
    first_delay: Duration,
    period: Duration,
    repeat: Repeat,
}

struct Shared {
    clock: Clock,
    tasks: DashMap<TaskId, Registration>,
    ids: Mutex<IdAllocator>,
    dispatcher: Dispatcher,
    reporter: Reporter,
}

impl Shared {
    /// Removes a task and interrupts its activity. The record is marked with `status` before
    /// the entry is released. Returns `false` if the task is not registered.
    fn take(&self, id: TaskId, status: Status) -> bool {
        let Entry::Occupied(entry) = self.tasks.entry(id) else {
            return false;
        };

        *entry.get().record.status.lock() = status;
        drop(entry.remove().cancel);
        true
    }

    /// Delivers one firing, or the cancellation of a task that has been deleted. Returns
    /// `false` once the activity has nothing left to do.
    fn fire(&self, record: &Arc<Record>, last: bool) -> bool {
        if record.status() != Status::Live {
            self.unwind(record);
            return false;
        }

        if last {
            let removed = self
                .tasks
                .remove_if(&record.id, |_, registration| Arc::ptr_eq(&registration.record, record));
            if removed.is_none() {
                self.unwind(record);
                return false;
            }
            self.reporter
                .log_task(record.id, format_args!("task {} completed", record.id));
        }

        self.dispatcher.dispatch(record.id, &record.on_fire);
        !last
    }

    /// Ends an activity whose task left the map. Only a deletion is announced.
    fn unwind(&self, record: &Record) {
        let deleted = record.status() == Status::Deleted;
        if let Some(on_cancel) = record.on_cancel.as_ref().filter(|_| deleted) {
            self.dispatcher.dispatch(record.id, on_cancel);
        }
    }

    fn cancel_all(&self) {
        let ids: Vec<TaskId> = self.tasks.iter().map(|entry| *entry.key()).collect();

        for id in ids {
            self.take(id, Status::Silenced);
        }
    }
}

/// Waits for `duration` unless the task is cancelled first. Returns `true` if the wait
/// ran to completion.
async fn wait(clock: &Clock, duration: Duration, cancelled: &mut oneshot::Receiver<()>) -> bool {
    match select(clock.delay(duration), cancelled).await {
        Either::Left(((), _)) => true,
        Either::Right(_) => false,
    }
}

async fn run(shared: Arc<Shared>, record: Arc<Record>, schedule: Schedule, mut cancelled: oneshot::Receiver<()>) {
    let Schedule {
        registered,
        first_delay,
        period,
        mut repeat,
    } = schedule;
    let clock = shared.clock.clone();

    if !first_delay.is_zero() && !wait(&clock, first_delay, &mut cancelled).await {
        shared.unwind(&record);
        return;
    }

    let anchor = registered.checked_add(first_delay).unwrap_or_else(|| clock.instant());
    let mut firings: u64 = 0;
    let mut correction = Correction::default();

    loop {
        if !shared.fire(&record, repeat.consume()) {
            return;
        }

        if !wait(&clock, correction.apply(period), &mut cancelled).await {
            shared.unwind(&record);
            return;
        }

        firings += 1;
        let elapsed = clock.instant().saturating_duration_since(anchor);
        correction = Correction::measure(period, firings, elapsed);
    }
}
