// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Measures how far the firings of each timer deviate from their ideal schedule on a
//! real clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metronome::{AsyncTimer, DispatchMode, FrameTimer, Scheduler, Task, TickTimer};
use parking_lot::Mutex;
use tick::Clock;

const PERIOD: Duration = Duration::from_millis(100);
const FIRINGS: u32 = 10;
const FRAME: Duration = Duration::from_millis(16);

#[tokio::main]
async fn main() -> metronome::Result<()> {
    tracing_subscriber::fmt().init();

    // Create a clock for the Tokio runtime.
    let clock = Clock::new_tokio();

    // A background thread polls the tick timer every millisecond.
    let tick = TickTimer::builder(clock.clone())
        .interval(Duration::from_millis(1))
        .dispatch(DispatchMode::Immediate)
        .build()?;
    let fired = measure(&tick, &clock).await?;
    report("tick timer", &fired);

    let asynchronous = AsyncTimer::builder(clock.clone())
        .dispatch(DispatchMode::Immediate)
        .build()?;
    let fired = measure(&asynchronous, &clock).await?;
    report("async timer", &fired);

    // The frame timer knows nothing about time; here a frame lasts roughly 16ms.
    let frames = FrameTimer::new();
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fired);
    let frame_clock = clock.clone();
    frames.add_task(
        Task::new(6, move |_| sink.lock().push(frame_clock.instant()))
            .period(6)
            .count(FIRINGS),
    )?;
    for _ in 0..(6 * (FIRINGS + 1)) {
        frames.update();
        clock.delay(FRAME).await;
    }
    let fired = fired.lock();
    for pair in fired.windows(2) {
        println!("frame timer interval: {:?}", pair[1].saturating_duration_since(pair[0]));
    }

    Ok(())
}

/// Fires a task `FIRINGS` times every `PERIOD` and returns, for each firing, the ideal
/// instant and the observed one.
async fn measure<S>(timer: &S, clock: &Clock) -> metronome::Result<Vec<(Instant, Instant)>>
where
    S: Scheduler<Unit = Duration>,
{
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fired);
    let task_clock = clock.clone();

    let anchor = clock.instant() + PERIOD;
    timer.add_task(
        Task::new(PERIOD, move |_| sink.lock().push(task_clock.instant()))
            .period(PERIOD)
            .count(FIRINGS),
    )?;

    clock.delay(PERIOD * (FIRINGS + 2)).await;

    let ideal = (0..).map(|k| anchor + PERIOD * k);
    Ok(ideal.zip(fired.lock().iter().copied()).collect())
}

fn report(name: &str, fired: &[(Instant, Instant)]) {
    let deviations: Vec<Duration> = fired
        .iter()
        .map(|(ideal, observed)| observed.saturating_duration_since(*ideal).max(ideal.saturating_duration_since(*observed)))
        .collect();

    let max = deviations.iter().max().copied().unwrap_or_default();
    let total: Duration = deviations.iter().sum();
    let mean = total / u32::try_from(deviations.len().max(1)).unwrap_or(u32::MAX);

    println!("{name}: {} firings, max deviation {max:?}, mean deviation {mean:?}", fired.len());
}
