// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Behavior every timer shares, checked against each of them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metronome::{AsyncTimer, Error, FrameTimer, Scheduler, Task, TaskId, TickTimer};
use parking_lot::Mutex;
use tick::ClockControl;
use tokio::runtime::Runtime;

type TestResult = Result<(), Error>;

/// Drives a timer one unit of its time at a time and delivers the resulting callbacks.
trait Harness {
    type Unit: Default + PartialEq;
    type Timer: Scheduler<Unit = Self::Unit>;

    fn timer(&self) -> &Self::Timer;

    fn units(n: u64) -> Self::Unit;

    fn step(&self);

    fn steps(&self, n: u64) {
        for _ in 0..n {
            self.step();
        }
    }
}

struct Tick {
    control: ClockControl,
    timer: TickTimer,
}

impl Tick {
    fn new() -> Self {
        let control = ClockControl::new();
        let timer = TickTimer::builder(control.to_clock()).build().unwrap();
        Self { control, timer }
    }
}

impl Harness for Tick {
    type Unit = Duration;
    type Timer = TickTimer;

    fn timer(&self) -> &TickTimer {
        &self.timer
    }

    fn units(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn step(&self) {
        self.control.advance(Duration::from_millis(1));
        self.timer.update();
        self.timer.drain();
    }
}

struct Async {
    control: ClockControl,
    timer: AsyncTimer,
    runtime: Runtime,
}

impl Async {
    fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let control = ClockControl::new();
        let timer = AsyncTimer::builder(control.to_clock())
            .runtime(runtime.handle().clone())
            .build()
            .unwrap();
        Self { control, timer, runtime }
    }

    fn settle(&self) {
        self.runtime.block_on(async {
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
        });
    }
}

impl Harness for Async {
    type Unit = Duration;
    type Timer = AsyncTimer;

    fn timer(&self) -> &AsyncTimer {
        &self.timer
    }

    fn units(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn step(&self) {
        self.settle();
        self.control.advance(Duration::from_millis(1));
        self.settle();
        self.timer.drain();
    }
}

struct Frame {
    timer: FrameTimer,
}

impl Frame {
    fn new() -> Self {
        Self { timer: FrameTimer::new() }
    }
}

impl Harness for Frame {
    type Unit = u64;
    type Timer = FrameTimer;

    fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    fn units(n: u64) -> u64 {
        n
    }

    fn step(&self) {
        self.timer.update();
    }
}

#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<(&'static str, TaskId)>>>);

impl Events {
    fn fire(&self) -> impl Fn(TaskId) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |id| events.lock().push(("fire", id))
    }

    fn cancel(&self) -> impl Fn(TaskId) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |id| events.lock().push(("cancel", id))
    }

    fn count(&self, kind: &str, id: TaskId) -> usize {
        self.0.lock().iter().filter(|event| event.0 == kind && event.1 == id).count()
    }
}

fn unique_ids<H: Harness>(harness: &H) -> TestResult {
    let timer = harness.timer();
    let mut ids = Vec::new();
    for _ in 0..100 {
        ids.push(timer.add_task(Task::new(H::units(1_000), |_| {}))?);
    }

    for id in ids.drain(..50) {
        assert!(timer.delete_task(id));
    }
    for _ in 0..50 {
        ids.push(timer.add_task(Task::new(H::units(1_000), |_| {}))?);
    }

    let distinct: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), 100);
    assert_eq!(timer.len(), 100);
    assert!(ids.iter().all(|id| id.get() >= 0 && timer.contains(*id)));
    Ok(())
}

fn fires_exactly_count_times<H: Harness>(harness: &H) -> TestResult {
    let events = Events::default();
    let id = harness.timer().add_task(
        Task::new(H::units(1), events.fire())
            .period(H::units(2))
            .count(3)
            .on_cancel(events.cancel()),
    )?;

    harness.steps(20);

    assert_eq!(events.count("fire", id), 3);
    assert_eq!(events.count("cancel", id), 0);
    assert!(!harness.timer().contains(id));
    assert!(!harness.timer().delete_task(id));
    Ok(())
}

fn first_delay_is_independent_of_period<H: Harness>(harness: &H) -> TestResult {
    let events = Events::default();
    let id = harness
        .timer()
        .add_task(Task::new(H::units(5), events.fire()).period(H::units(1)).count(2))?;

    harness.steps(4);
    assert_eq!(events.count("fire", id), 0);
    harness.step();
    assert_eq!(events.count("fire", id), 1);
    harness.step();
    assert_eq!(events.count("fire", id), 2);
    Ok(())
}

fn forever_until_deleted<H: Harness>(harness: &H) -> TestResult {
    let events = Events::default();
    let id = harness.timer().add_task(
        Task::new(H::units(1), events.fire())
            .period(H::units(1))
            .forever()
            .on_cancel(events.cancel()),
    )?;

    harness.steps(10);
    assert_eq!(events.count("fire", id), 10);
    assert!(harness.timer().contains(id));

    assert!(harness.timer().delete_task(id));
    assert!(!harness.timer().delete_task(id));
    harness.steps(10);

    assert_eq!(events.count("fire", id), 10);
    assert_eq!(events.count("cancel", id), 1);
    Ok(())
}

fn zero_delay_is_not_synchronous<H: Harness>(harness: &H) -> TestResult {
    let events = Events::default();
    let id = harness.timer().add_task(Task::new(H::Unit::default(), events.fire()))?;

    assert_eq!(events.count("fire", id), 0);
    harness.step();
    assert_eq!(events.count("fire", id), 1);
    assert!(harness.timer().is_empty());
    Ok(())
}

fn zero_period_fires_once<H: Harness>(harness: &H) -> TestResult {
    let events = Events::default();
    let id = harness
        .timer()
        .add_task(Task::new(H::units(1), events.fire()).forever())?;

    harness.steps(10);

    assert_eq!(events.count("fire", id), 1);
    assert!(!harness.timer().contains(id));
    Ok(())
}

fn reset_never_cancels<H: Harness>(harness: &H) -> TestResult {
    let events = Events::default();
    let id = harness.timer().add_task(
        Task::new(H::units(1), events.fire())
            .period(H::units(1))
            .forever()
            .on_cancel(events.cancel()),
    )?;
    harness.steps(3);

    harness.timer().reset();
    harness.steps(5);

    assert_eq!(events.count("fire", id), 3);
    assert_eq!(events.count("cancel", id), 0);
    assert!(harness.timer().is_empty());
    Ok(())
}

macro_rules! contract {
    ($name:ident, $harness:expr) => {
        mod $name {
            use super::*;

            #[test]
            fn unique_ids() -> TestResult {
                super::unique_ids(&$harness)
            }

            #[test]
            fn fires_exactly_count_times() -> TestResult {
                super::fires_exactly_count_times(&$harness)
            }

            #[test]
            fn first_delay_is_independent_of_period() -> TestResult {
                super::first_delay_is_independent_of_period(&$harness)
            }

            #[test]
            fn forever_until_deleted() -> TestResult {
                super::forever_until_deleted(&$harness)
            }

            #[test]
            fn zero_delay_is_not_synchronous() -> TestResult {
                super::zero_delay_is_not_synchronous(&$harness)
            }

            #[test]
            fn zero_period_fires_once() -> TestResult {
                super::zero_period_fires_once(&$harness)
            }

            #[test]
            fn reset_never_cancels() -> TestResult {
                super::reset_never_cancels(&$harness)
            }
        }
    };
}

contract!(tick_timer, Tick::new());
contract!(async_timer, Async::new());
contract!(frame_timer, Frame::new());
