// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(
    test,
    allow(
        clippy::arithmetic_side_effects,
        clippy::unchecked_time_subtraction,
        reason = "allow these lints in tests to improve the readability of the tests"
    )
)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Callback scheduling with drift-corrected timing.
//!
//! A task is a callback that runs after a first delay and then, optionally, every period
//! for a given number of times or until it is deleted. This crate offers three timers that
//! run such tasks, each driven differently but all implementing the [`Scheduler`] trait:
//!
//! - [`TickTimer`] fires tasks whenever it is polled and finds them due. It is polled by
//!   its owner or by a background thread at a fixed interval.
//! - [`AsyncTimer`] runs one cancellable activity per task on a Tokio runtime and corrects
//!   each wait by the drift measured after the previous one.
//! - [`FrameTimer`] counts frames of a loop instead of measuring time.
//!
//! The wall-clock timers read time from a [`tick::Clock`], which makes them fully
//! controllable in tests through `tick::ClockControl`.
//!
//! # Repeating without drift
//!
//! The wall-clock timers never compute the next target from the previous one. Each target
//! is derived from a fixed anchor, the instant at which the task first became due, as
//! `anchor + period * firings`. A firing that happens late does not shift the firings that
//! follow it.
//!
//! # Where callbacks run
//!
//! [`TickTimer`] and [`AsyncTimer`] fire on threads that the owner usually does not control.
//! With [`DispatchMode::Deferred`], the default, firings and cancellations are queued and
//! the owner delivers them on its own thread by calling the timer's `drain` method. With
//! [`DispatchMode::Immediate`], callbacks run right away on the firing thread.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use metronome::{Scheduler, Task, TickTimer};
//! use tick::ClockControl;
//!
//! let control = ClockControl::new();
//! let timer = TickTimer::builder(control.to_clock()).build()?;
//!
//! let id = timer.add_task(
//!     Task::new(Duration::from_millis(100), |id| println!("task {id} fired"))
//!         .period(Duration::from_millis(50))
//!         .forever()
//!         .on_cancel(|id| println!("task {id} deleted")),
//! )?;
//!
//! control.advance(Duration::from_millis(100));
//! timer.update(); // queues the first firing
//! timer.drain(); // prints "task 1 fired"
//!
//! timer.delete_task(id);
//! timer.drain(); // prints "task 1 deleted"
//! # Ok::<(), metronome::Error>(())
//! ```
//!
//! # Diagnostics
//!
//! Conditions the timers recover from on their own, such as deleting an unknown task, are
//! emitted as [`tracing`](https://docs.rs/tracing) events and can additionally be routed to
//! custom hooks through [`Diagnostics`].

mod async_timer;
mod diagnostics;
mod dispatch;
mod error;
mod frame_timer;
mod id;
mod schedule;
mod scheduler;
mod task;
mod tick_timer;

pub use async_timer::{AsyncTimer, AsyncTimerBuilder};
pub use diagnostics::{Diagnostics, Hook};
pub use dispatch::DispatchMode;
pub use error::{Error, Result};
pub use frame_timer::FrameTimer;
pub use id::TaskId;
pub use scheduler::Scheduler;
pub use task::{Callback, Task};
pub use tick_timer::{TickTimer, TickTimerBuilder};
