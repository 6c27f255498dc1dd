// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{Result, Task, TaskId};

/// Operations shared by every timer.
///
/// Each timer owns its tasks and its timing strategy; the trait only captures the
/// registration contract so that code can be written once for any of them.
///
/// # Examples
///
/// ```
/// use metronome::{FrameTimer, Scheduler, Task, TaskId};
///
/// fn every_other<S: Scheduler<Unit = u64>>(scheduler: &S) -> metronome::Result<TaskId> {
///     scheduler.add_task(Task::new(0, |_| {}).period(2).forever())
/// }
///
/// let timer = FrameTimer::new();
/// let id = every_other(&timer)?;
/// assert!(timer.contains(id));
/// # Ok::<(), metronome::Error>(())
/// ```
pub trait Scheduler {
    /// The unit in which delays and periods are expressed.
    type Unit;

    /// Registers a task and returns its identifier.
    ///
    /// The task never fires from within this call, even with a zero first delay; the
    /// earliest firing happens on the next update pass or wait of the timer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdCollision`][crate::Error::IdCollision] if the allocated
    /// identifier is already registered, and [`Error::IdsExhausted`][crate::Error::IdsExhausted]
    /// if no identifier is free.
    fn add_task(&self, task: Task<Self::Unit>) -> Result<TaskId>;

    /// Deletes a task before it completes.
    ///
    /// The task's cancellation callback is delivered through the same path as its firings.
    /// Returns `false`, and reports a warning, if the task is not registered.
    fn delete_task(&self, id: TaskId) -> bool;

    /// Drops every registered task without invoking cancellation callbacks.
    fn reset(&self);

    /// Returns the number of registered tasks.
    fn len(&self) -> usize;

    /// Returns `true` if no task is registered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the task is registered.
    fn contains(&self, id: TaskId) -> bool;
}
