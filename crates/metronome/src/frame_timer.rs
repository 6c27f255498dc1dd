// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use crate::diagnostics::Reporter;
use crate::id::IdAllocator;
use crate::task::Repeat;
use crate::{Callback, Diagnostics, Error, Result, Scheduler, Task, TaskId};

/// A timer that counts frames instead of measuring time.
///
/// The owner calls [`FrameTimer::update`] once per frame of its loop. Each call advances the
/// frame counter by one and then fires every task whose target frame has been reached.
/// Delays and periods are expressed in frames.
///
/// The timer is meant to live on the thread that runs the frame loop. Callbacks run inline,
/// on that thread, and may add or delete tasks on the same timer.
///
/// # Examples
///
/// ```
/// use metronome::{FrameTimer, Scheduler, Task};
///
/// let timer = FrameTimer::new();
/// let id = timer.add_task(Task::new(10, |id| println!("{id} fired")).period(2).count(2))?;
///
/// for _ in 0..9 {
///     assert_eq!(timer.update(), 0);
/// }
/// assert_eq!(timer.update(), 1); // frame 10
/// assert_eq!(timer.update(), 0);
/// assert_eq!(timer.update(), 1); // frame 12
/// assert!(!timer.contains(id));
/// # Ok::<(), metronome::Error>(())
/// ```
pub struct FrameTimer {
    start: u64,
    state: RefCell<State>,
    reporter: Reporter,
}

#[derive(Default)]
struct State {
    frame: u64,
    tasks: HashMap<TaskId, Record>,
    ids: IdAllocator,
}

struct Record {
    period: u64,
    target: Option<u64>,
    repeat: Repeat,
    on_fire: Callback,
    on_cancel: Option<Callback>,
}

struct Firing {
    id: TaskId,
    on_fire: Callback,
    last: bool,
}

impl FrameTimer {
    /// Creates a timer whose frame counter starts at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a timer whose frame counter starts at `frame`.
    #[must_use]
    pub fn starting_at(frame: u64) -> Self {
        Self {
            start: frame,
            state: RefCell::new(State {
                frame,
                ..State::default()
            }),
            reporter: Reporter::default(),
        }
    }

    /// Returns the current value of the frame counter.
    #[must_use]
    pub fn current_frame(&self) -> u64 {
        self.state.borrow().frame
    }

    /// Advances the frame counter, fires the tasks that are due and returns how many
    /// callbacks ran.
    pub fn update(&self) -> usize {
        let firings = self.advance();

        let mut invoked = 0;
        for firing in firings {
            // A repeating task may have been deleted by a callback that ran before it.
            if !firing.last {
                let live = self
                    .state
                    .borrow()
                    .tasks
                    .get(&firing.id)
                    .is_some_and(|record| Arc::ptr_eq(&record.on_fire, &firing.on_fire));
                if !live {
                    continue;
                }
            }

            (firing.on_fire)(firing.id);
            invoked += 1;
        }

        invoked
    }

    /// Replaces the diagnostic hooks.
    pub fn set_diagnostics(&self, diagnostics: Diagnostics) {
        self.reporter.set(diagnostics);
    }

    fn advance(&self) -> Vec<Firing> {
        let mut state = self.state.borrow_mut();
        state.frame = state.frame.saturating_add(1);
        let frame = state.frame;

        let mut firings = Vec::new();
        for (&id, record) in &mut state.tasks {
            if record.target.is_none_or(|target| target > frame) {
                continue;
            }

            let last = record.repeat.consume();
            if !last {
                record.target = record.target.and_then(|target| target.checked_add(record.period));
            }

            firings.push(Firing {
                id,
                on_fire: Arc::clone(&record.on_fire),
                last,
            });
        }

        for firing in firings.iter().filter(|firing| firing.last) {
            state.tasks.remove(&firing.id);
        }
        drop(state);

        for firing in firings.iter().filter(|firing| firing.last) {
            self.reporter.log_task(firing.id, format_args!("task {} completed", firing.id));
        }

        firings
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for FrameTimer {
    type Unit = u64;

    fn add_task(&self, task: Task<u64>) -> Result<TaskId> {
        let repeat = task.repeat();
        let mut state = self.state.borrow_mut();
        let State { frame, tasks, ids } = &mut *state;

        let id = ids.next(|id| tasks.contains_key(&id)).ok_or(Error::IdsExhausted)?;
        match tasks.entry(id) {
            Entry::Occupied(_) => {
                self.reporter.warn_task(id, format_args!("task {id} is already registered"));
                Err(Error::IdCollision(id))
            }
            Entry::Vacant(entry) => {
                entry.insert(Record {
                    period: task.period,
                    target: frame.checked_add(task.first_delay),
                    repeat,
                    on_fire: task.on_fire,
                    on_cancel: task.on_cancel,
                });
                Ok(id)
            }
        }
    }

    /// Deletes a task and invokes its cancellation callback inline.
    fn delete_task(&self, id: TaskId) -> bool {
        let removed = self.state.borrow_mut().tasks.remove(&id);
        let Some(record) = removed else {
            self.reporter
                .warn_task(id, format_args!("task {id} cannot be deleted because it is not registered"));
            return false;
        };

        self.reporter.log_task(id, format_args!("task {id} deleted"));
        if let Some(on_cancel) = record.on_cancel {
            on_cancel(id);
        }
        true
    }

    /// Drops every task and rewinds the frame counter to its starting value.
    fn reset(&self) {
        let mut state = self.state.borrow_mut();
        state.tasks.clear();
        state.frame = self.start;
    }

    fn len(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    fn contains(&self, id: TaskId) -> bool {
        self.state.borrow().tasks.contains_key(&id)
    }
}

impl fmt::Debug for FrameTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("FrameTimer")
            .field("frame", &state.frame)
            .field("tasks", &state.tasks.len())
            .finish_non_exhaustive()
    }
}
