// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

/// Handle of a task registered with a timer.
///
/// Identifiers are issued by each timer independently. An identifier is unique among the
/// tasks currently registered with its timer and may be handed out again once the task
/// completes or is deleted.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use metronome::{Scheduler, Task, TickTimer};
/// use tick::Clock;
///
/// # fn example(clock: Clock) -> metronome::Result<()> {
/// let timer = TickTimer::builder(clock).build()?;
/// let id = timer.add_task(Task::new(Duration::from_millis(100), |_| {}))?;
///
/// assert!(id.get() >= 0);
/// assert!(timer.delete_task(id));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(i32);

impl TaskId {
    /// The largest identifier value. The allocator wraps back to zero once it reaches it.
    pub const MAX: i32 = i32::MAX;

    #[cfg(test)]
    pub(crate) const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw, non-negative identifier value.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<TaskId> for i32 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Issues task identifiers for a single timer.
///
/// Candidates are tried in increasing order starting after the last issued value. Reaching
/// [`TaskId::MAX`] wraps the candidate back to zero, and candidates that are still in use
/// are skipped.
///
/// The allocator itself is not synchronized. Timers that register tasks from several
/// threads keep it behind a mutex.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator {
    last: i32,
}

impl IdAllocator {
    /// Returns the next identifier for which `in_use` returns `false`, or `None` when
    /// every identifier is taken.
    pub fn next(&mut self, mut in_use: impl FnMut(TaskId) -> bool) -> Option<TaskId> {
        // The range holds `TaskId::MAX` distinct values (`MAX` itself is never issued),
        // so one full cycle visits every candidate once.
        for _ in 0..TaskId::MAX {
            self.last = self.last.saturating_add(1);
            if self.last == TaskId::MAX {
                self.last = 0;
            }

            let candidate = TaskId(self.last);
            if !in_use(candidate) {
                return Some(candidate);
            }
        }

        None
    }

    #[cfg(test)]
    const fn starting_after(last: i32) -> Self {
        Self { last }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(TaskId: Send, Sync, Copy);
    }

    #[test]
    fn first_id_is_one() {
        let mut ids = IdAllocator::default();

        assert_eq!(ids.next(|_| false), Some(TaskId(1)));
        assert_eq!(ids.next(|_| false), Some(TaskId(2)));
    }

    #[test]
    fn skips_ids_in_use() {
        let mut ids = IdAllocator::default();
        let taken: HashSet<_> = [TaskId(1), TaskId(2), TaskId(4)].into_iter().collect();

        assert_eq!(ids.next(|id| taken.contains(&id)), Some(TaskId(3)));
        assert_eq!(ids.next(|id| taken.contains(&id)), Some(TaskId(5)));
    }

    #[test]
    fn wraps_to_zero_at_max() {
        let mut ids = IdAllocator::starting_after(TaskId::MAX - 2);

        assert_eq!(ids.next(|_| false), Some(TaskId(TaskId::MAX - 1)));
        assert_eq!(ids.next(|_| false), Some(TaskId(0)));
        assert_eq!(ids.next(|_| false), Some(TaskId(1)));
    }

    #[test]
    fn wrap_skips_ids_in_use() {
        let mut ids = IdAllocator::starting_after(TaskId::MAX - 1);

        assert_eq!(ids.next(|id| id.get() < 3), Some(TaskId(3)));
    }

    #[test]
    fn display_and_conversion() {
        let id = TaskId::new(42);

        assert_eq!(id.to_string(), "42");
        assert_eq!(i32::from(id), 42);
        assert_eq!(id.get(), 42);
    }
}
