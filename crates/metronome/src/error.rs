// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

use crate::TaskId;

/// An error that can occur when constructing a timer or registering a task.
///
/// Conditions that the timers can recover from on their own (deleting an unknown
/// task, resetting with undelivered callbacks, ...) are not errors. They are reported
/// through [`Diagnostics`][crate::Diagnostics] instead and surface to the caller as a
/// `false` return value at most.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The allocated identifier is already registered with the timer.
    ///
    /// The allocator skips identifiers that are in use, so this indicates a bug in the
    /// allocator rather than a caller error.
    #[error("task {0} is already registered")]
    IdCollision(TaskId),

    /// Every identifier in the supported range is taken by a registered task.
    #[error("no free task identifier is available")]
    IdsExhausted,

    /// The timer requires a Tokio runtime but was built outside of one and no
    /// runtime handle was provided.
    #[error("no Tokio runtime is available to run timer tasks")]
    NoRuntime,

    /// The background thread that drives the timer could not be started.
    #[error("failed to start the timer thread")]
    Spawn(#[source] std::io::Error),
}

/// A specialized `Result` for timer operations.
pub type Result<T> = std::result::Result<T, Error>;
