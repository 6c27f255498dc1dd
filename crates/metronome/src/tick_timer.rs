// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};
use tick::Clock;

use crate::diagnostics::Reporter;
use crate::dispatch::Dispatcher;
use crate::id::IdAllocator;
use crate::schedule;
use crate::task::Repeat;
use crate::{Callback, Diagnostics, DispatchMode, Error, Result, Scheduler, Task, TaskId};

const THREAD_NAME: &str = "metronome-tick";

/// A timer that fires tasks when it is polled and finds them due.
///
/// Every call to [`TickTimer::update`] compares the current time of the [`Clock`] with the
/// target of each registered task and fires those that are due. The timer can be polled by
/// the owner, for instance once per iteration of a server loop, or by a background thread
/// configured through [`TickTimerBuilder::interval`].
///
/// Targets are always computed from the instant a task became due for the first time, as
/// `anchor + period * firings`. A late poll delays a single firing but does not shift the
/// ones that follow. A task fires at most once per poll.
///
/// Callbacks are delivered according to the configured [`DispatchMode`]. In the default
/// [`DispatchMode::Deferred`] mode, they are queued until the owner calls
/// [`TickTimer::drain`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use metronome::{DispatchMode, Scheduler, Task, TickTimer};
/// use tick::ClockControl;
///
/// let control = ClockControl::new();
/// let timer = TickTimer::builder(control.to_clock())
///     .dispatch(DispatchMode::Immediate)
///     .build()?;
///
/// timer.add_task(
///     Task::new(Duration::from_millis(100), |id| println!("{id} fired"))
///         .period(Duration::from_millis(50))
///         .count(3),
/// )?;
///
/// control.advance(Duration::from_millis(110));
/// assert_eq!(timer.update(), 1);
/// # Ok::<(), metronome::Error>(())
/// ```
pub struct TickTimer {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl TickTimer {
    /// Creates a builder for a timer reading time from `clock`.
    #[must_use]
    pub fn builder(clock: Clock) -> TickTimerBuilder {
        TickTimerBuilder::new(clock)
    }

    /// Fires every task that is due and returns how many callbacks were delivered or queued.
    ///
    /// Completed tasks are removed within the same call. Calls must not overlap; when the
    /// timer runs its own background thread, only that thread should call this method.
    pub fn update(&self) -> usize {
        self.shared.update()
    }

    /// Invokes the queued callbacks on the calling thread and returns how many ran.
    ///
    /// Only the callbacks queued when the call starts are invoked, in the order in which
    /// they were queued. Does nothing in [`DispatchMode::Immediate`] mode.
    pub fn drain(&self) -> usize {
        self.shared.dispatcher.drain(&self.shared.reporter)
    }

    /// Returns the number of callbacks waiting for [`TickTimer::drain`].
    #[must_use]
    pub fn pending_dispatches(&self) -> usize {
        self.shared.dispatcher.pending()
    }

    /// Replaces the diagnostic hooks.
    pub fn set_diagnostics(&self, diagnostics: Diagnostics) {
        self.shared.reporter.set(diagnostics);
    }

    /// Returns the clock the timer reads time from.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    fn stop_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop(&self.shared.reporter);
        }
    }
}

impl Scheduler for TickTimer {
    type Unit = Duration;

    fn add_task(&self, task: Task<Duration>) -> Result<TaskId> {
        self.shared.add(task)
    }

    fn delete_task(&self, id: TaskId) -> bool {
        self.shared.delete(id)
    }

    /// Drops every task and stops the background thread, if any.
    ///
    /// Callbacks that are already queued stay queued and are still delivered by
    /// [`TickTimer::drain`].
    fn reset(&self) {
        let pending = self.shared.dispatcher.pending();
        if pending > 0 {
            self.shared
                .reporter
                .warn(format_args!("resetting tick timer with {pending} undelivered callbacks"));
        }

        self.shared.clear();
        self.stop_worker();
    }

    fn len(&self) -> usize {
        self.shared.tasks.len()
    }

    fn contains(&self, id: TaskId) -> bool {
        self.shared.tasks.contains_key(&id)
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl fmt::Debug for TickTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickTimer")
            .field("tasks", &self.shared.tasks.len())
            .field("dispatcher", &self.shared.dispatcher)
            .field("background", &self.worker.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`TickTimer`].
#[derive(Debug)]
pub struct TickTimerBuilder {
    clock: Clock,
    interval: Duration,
    dispatch: DispatchMode,
    diagnostics: Diagnostics,
}

impl TickTimerBuilder {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            interval: Duration::ZERO,
            dispatch: DispatchMode::default(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Sets the interval at which a background thread polls the timer.
    ///
    /// The default of [`Duration::ZERO`] starts no thread; the owner then calls
    /// [`TickTimer::update`] itself.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets how callbacks are delivered. Defaults to [`DispatchMode::Deferred`].
    #[must_use]
    pub const fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.dispatch = mode;
        self
    }

    /// Sets the diagnostic hooks.
    #[must_use]
    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Builds the timer and, for a non-zero interval, starts its background thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the background thread cannot be started.
    pub fn build(self) -> Result<TickTimer> {
        let shared = Arc::new(Shared {
            clock: self.clock,
            tasks: DashMap::new(),
            ids: Mutex::new(IdAllocator::default()),
            dispatcher: Dispatcher::new(self.dispatch),
            reporter: Reporter::new(self.diagnostics),
        });

        let worker = if self.interval.is_zero() {
            None
        } else {
            Some(Worker::spawn(Arc::clone(&shared), self.interval)?)
        };

        Ok(TickTimer {
            shared,
            worker: Mutex::new(worker),
        })
    }
}

struct Record {
    period: Duration,
    anchor: Option<Instant>,
    target: Option<Instant>,
    firings: u64,
    repeat: Repeat,
    on_fire: Callback,
    on_cancel: Option<Callback>,
    handoff: Arc<Handoff>,
}

impl Record {
    fn is_due(&self, now: Instant) -> bool {
        self.target.is_some_and(|target| target <= now)
    }

    /// Accounts for one firing. Returns `true` if it was the last one.
    fn fire(&mut self) -> bool {
        self.firings += 1;
        if self.repeat.consume() {
            return true;
        }

        self.target = self
            .anchor
            .and_then(|anchor| schedule::target(anchor, self.period, self.firings));
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Deleted,
    Reset,
}

#[derive(Debug, Default)]
struct Progress {
    in_flight: bool,
    removed: Option<Removal>,
}

/// Coordinates the delivery of a firing with a concurrent removal of its task.
///
/// A task deleted while one of its firings is in flight leaves its cancellation to the
/// update pass, which delivers it once the firing is settled. The lock is never held while
/// a callback runs.
#[derive(Debug, Default)]
struct Handoff(Mutex<Progress>);

impl Handoff {
    /// Marks a firing as in flight. Called while the task is still registered.
    fn begin(&self) {
        self.0.lock().in_flight = true;
    }

    /// Returns `true` if the firing in flight may still be delivered.
    fn proceeds(&self) -> bool {
        self.0.lock().removed.is_none()
    }

    /// Settles the firing in flight. Returns `true` if the task was deleted meanwhile; the
    /// caller then delivers the cancellation.
    fn finish(&self) -> bool {
        let mut progress = self.0.lock();
        progress.in_flight = false;
        progress.removed == Some(Removal::Deleted)
    }

    /// Records that the task left the map. Returns `true` if the caller delivers the
    /// cancellation itself, which is the case for a deletion with no firing in flight.
    fn remove(&self, removal: Removal) -> bool {
        let mut progress = self.0.lock();
        progress.removed = Some(removal);
        removal == Removal::Deleted && !progress.in_flight
    }
}

struct Firing {
    id: TaskId,
    on_fire: Callback,
    on_cancel: Option<Callback>,
    handoff: Arc<Handoff>,
    last: bool,
}

struct Shared {
    clock: Clock,
    tasks: DashMap<TaskId, Record>,
    ids: Mutex<IdAllocator>,
    dispatcher: Dispatcher,
    reporter: Reporter,
}

impl Shared {
    fn add(&self, task: Task<Duration>) -> Result<TaskId> {
        let anchor = self.clock.instant().checked_add(task.first_delay);
        let repeat = task.repeat();
        let record = Record {
            period: task.period,
            anchor,
            target: anchor,
            firings: 0,
            repeat,
            on_fire: task.on_fire,
            on_cancel: task.on_cancel,
            handoff: Arc::default(),
        };

        let mut ids = self.ids.lock();
        let id = ids.next(|id| self.tasks.contains_key(&id)).ok_or(Error::IdsExhausted)?;

        let inserted = match self.tasks.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(record);
                true
            }
        };

        if inserted {
            Ok(id)
        } else {
            self.reporter.warn_task(id, format_args!("task {id} is already registered"));
            Err(Error::IdCollision(id))
        }
    }

    fn delete(&self, id: TaskId) -> bool {
        let Some((_, record)) = self.tasks.remove(&id) else {
            self.reporter
                .warn_task(id, format_args!("task {id} cannot be deleted because it is not registered"));
            return false;
        };

        let cancels = record.handoff.remove(Removal::Deleted);
        if let Some(on_cancel) = record.on_cancel.as_ref().filter(|_| cancels) {
            self.dispatcher.dispatch(id, on_cancel);
        }

        self.reporter.log_task(id, format_args!("task {id} deleted"));
        true
    }

    fn clear(&self) {
        self.tasks.retain(|_, record| {
            record.handoff.remove(Removal::Reset);
            false
        });
    }

    fn update(&self) -> usize {
        let now = self.clock.instant();

        // Shard locks are released before anything is removed or any callback runs.
        let firings: Vec<Firing> = self
            .tasks
            .iter_mut()
            .filter_map(|mut entry| {
                let id = *entry.key();
                let record = entry.value_mut();
                if !record.is_due(now) {
                    return None;
                }

                let last = record.fire();
                record.handoff.begin();
                Some(Firing {
                    id,
                    on_fire: Arc::clone(&record.on_fire),
                    on_cancel: record.on_cancel.clone(),
                    handoff: Arc::clone(&record.handoff),
                    last,
                })
            })
            .collect();

        let mut delivered = 0;
        for firing in firings {
            if firing.last
                && self
                    .tasks
                    .remove_if(&firing.id, |_, record| Arc::ptr_eq(&record.handoff, &firing.handoff))
                    .is_some()
            {
                self.reporter
                    .log_task(firing.id, format_args!("task {} completed", firing.id));
            }

            if firing.handoff.proceeds() {
                self.dispatcher.dispatch(firing.id, &firing.on_fire);
                delivered += 1;
            }

            // Cancellation of a task deleted while this firing was in flight.
            let cancels = firing.handoff.finish();
            if let Some(on_cancel) = firing.on_cancel.as_ref().filter(|_| cancels) {
                self.dispatcher.dispatch(firing.id, on_cancel);
            }
        }

        delivered
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *self.stopped.lock() = true;
        self.changed.notify_all();
    }

    /// Waits up to `timeout`. Returns `true` once the signal has been raised.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            let _ = self.changed.wait_for(&mut stopped, timeout);
        }
        *stopped
    }
}

struct Worker {
    signal: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(shared: Arc<Shared>, interval: Duration) -> Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || run(&shared, &thread_signal, interval))
            .map_err(Error::Spawn)?;

        Ok(Self { signal, handle })
    }

    fn stop(self, reporter: &Reporter) {
        self.signal.raise();

        // A callback running on the worker may drop or reset the timer.
        if self.handle.thread().id() != thread::current().id() && self.handle.join().is_err() {
            reporter.warn(format_args!("tick timer background thread panicked"));
        }
    }
}

#[cfg_attr(test, mutants::skip)] // some mutations never finish and cause timeouts
fn run(shared: &Shared, signal: &StopSignal, interval: Duration) {
    loop {
        shared.update();
        if signal.wait(interval) {
            break;
        }
    }

    shared.reporter.warn(format_args!("tick timer background loop terminated"));
}
