// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::TaskId;

/// A callback invoked by a timer with the identifier of the task it belongs to.
pub type Callback = Arc<dyn Fn(TaskId) + Send + Sync>;

/// How many more times a task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Repeat {
    Forever,
    Times(NonZeroU32),
}

impl Repeat {
    pub const ONCE: Self = Self::Times(NonZeroU32::MIN);

    pub fn from_count(count: u32) -> Self {
        NonZeroU32::new(count).map_or(Self::Forever, Self::Times)
    }

    /// Consumes one firing. Returns `true` when that firing was the last one.
    pub fn consume(&mut self) -> bool {
        match *self {
            Self::Forever => false,
            Self::Times(left) => match NonZeroU32::new(left.get() - 1) {
                Some(left) => {
                    *self = Self::Times(left);
                    false
                }
                None => true,
            },
        }
    }
}

/// Describes a task to register with a timer.
///
/// The unit `U` is the timer's unit of time: [`Duration`][std::time::Duration] for
/// [`TickTimer`][crate::TickTimer] and [`AsyncTimer`][crate::AsyncTimer], a number of
/// frames (`u64`) for [`FrameTimer`][crate::FrameTimer].
///
/// A task fires for the first time `first_delay` after it has been registered and then
/// every `period`. By default a task fires once; use [`Task::count`] or [`Task::forever`]
/// to repeat it. A zero `period` never repeats: such a task completes after its first
/// firing whatever its count.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use metronome::Task;
///
/// // Fire after one second, then every 250ms, four times in total.
/// let task = Task::new(Duration::from_secs(1), |id| println!("task {id} fired"))
///     .period(Duration::from_millis(250))
///     .count(4)
///     .on_cancel(|id| println!("task {id} was deleted"));
/// # drop(task);
/// ```
pub struct Task<U> {
    pub(crate) first_delay: U,
    pub(crate) period: U,
    count: u32,
    pub(crate) on_fire: Callback,
    pub(crate) on_cancel: Option<Callback>,
}

impl<U: Default + PartialEq> Task<U> {
    /// Creates a one-shot task that fires `first_delay` after registration.
    #[must_use]
    pub fn new(first_delay: U, on_fire: impl Fn(TaskId) + Send + Sync + 'static) -> Self {
        Self {
            first_delay,
            period: U::default(),
            count: 1,
            on_fire: Arc::new(on_fire),
            on_cancel: None,
        }
    }

    /// Sets the interval between consecutive firings after the first one.
    #[must_use]
    pub fn period(mut self, period: U) -> Self {
        self.period = period;
        self
    }

    /// Sets how many times the task fires. Zero repeats the task until it is deleted.
    #[must_use]
    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Repeats the task until it is deleted. Equivalent to `count(0)`.
    #[must_use]
    pub fn forever(self) -> Self {
        self.count(0)
    }

    /// Sets the callback invoked when the task is deleted before it completes.
    ///
    /// The callback is never invoked for a task that runs to completion, nor for tasks
    /// dropped by a timer reset.
    #[must_use]
    pub fn on_cancel(mut self, on_cancel: impl Fn(TaskId) + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Arc::new(on_cancel));
        self
    }

    pub(crate) fn repeat(&self) -> Repeat {
        if self.period == U::default() {
            Repeat::ONCE
        } else {
            Repeat::from_count(self.count)
        }
    }
}

impl<U: fmt::Debug> fmt::Debug for Task<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("first_delay", &self.first_delay)
            .field("period", &self.period)
            .field("count", &self.count)
            .field("on_cancel", &self.on_cancel.is_some())
            .finish_non_exhaustive()
    }
}
