// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deferred delivery of callbacks through the dispatch queue.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use metronome::{AsyncTimer, DispatchMode, Error, Scheduler, Task, TaskId, TickTimer};
use parking_lot::Mutex;
use tick::ClockControl;

type TestResult = Result<(), Error>;

const MS: Duration = Duration::from_millis(1);

type Log = Arc<Mutex<Vec<(char, TaskId)>>>;

fn tagged(log: &Log, tag: char) -> impl Fn(TaskId) + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |id| log.lock().push((tag, id))
}

#[test]
fn tick_timer_delivers_in_queue_order() -> TestResult {
    let control = ClockControl::new();
    let timer = TickTimer::builder(control.to_clock()).build()?;
    let log = Log::default();

    let a = timer.add_task(Task::new(MS, tagged(&log, 'f')))?;
    let b = timer.add_task(Task::new(MS * 2, tagged(&log, 'f')).on_cancel(tagged(&log, 'c')))?;
    let c = timer.add_task(Task::new(MS * 3, tagged(&log, 'f')))?;

    control.advance(MS);
    timer.update();
    assert!(timer.delete_task(b));
    control.advance(MS * 2);
    timer.update();

    assert!(log.lock().is_empty());
    assert_eq!(timer.drain(), 3);
    assert_eq!(*log.lock(), vec![('f', a), ('c', b), ('f', c)]);
    Ok(())
}

#[test]
fn background_firings_run_on_draining_thread() -> TestResult {
    let control = ClockControl::new();
    let timer = TickTimer::builder(control.to_clock()).interval(MS).build()?;
    let threads: Arc<Mutex<Vec<ThreadId>>> = Arc::default();

    let sink = Arc::clone(&threads);
    timer.add_task(
        Task::new(MS, move |_| sink.lock().push(thread::current().id()))
            .period(MS)
            .count(3),
    )?;

    for _ in 0..5_000 {
        if timer.pending_dispatches() == 3 {
            break;
        }
        control.advance(MS);
        thread::sleep(MS);
    }

    assert_eq!(timer.drain(), 3);
    let threads = threads.lock();
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|id| *id == thread::current().id()));
    Ok(())
}

#[test]
fn immediate_firings_run_on_timer_thread() -> TestResult {
    let control = ClockControl::new();
    let timer = TickTimer::builder(control.to_clock())
        .interval(MS)
        .dispatch(DispatchMode::Immediate)
        .build()?;
    let names: Arc<Mutex<Vec<String>>> = Arc::default();

    let sink = Arc::clone(&names);
    timer.add_task(Task::new(MS, move |_| {
        sink.lock().push(thread::current().name().unwrap_or_default().to_owned());
    }))?;

    for _ in 0..5_000 {
        if !names.lock().is_empty() {
            break;
        }
        control.advance(MS);
        thread::sleep(MS);
    }

    assert_eq!(*names.lock(), vec!["metronome-tick"]);
    assert_eq!(timer.pending_dispatches(), 0);
    Ok(())
}

#[tokio::test]
async fn async_timer_queues_fire_and_cancel_in_order() -> TestResult {
    let control = ClockControl::new();
    let timer = AsyncTimer::builder(control.to_clock()).build()?;
    let log = Log::default();

    let id = timer.add_task(
        Task::new(MS, tagged(&log, 'f'))
            .period(MS)
            .forever()
            .on_cancel(tagged(&log, 'c')),
    )?;

    for _ in 0..3 {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        control.advance(MS);
    }
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert!(timer.delete_task(id));

    // The cancellation is queued by the task's activity once it observes the deletion.
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert_eq!(timer.drain(), 4);
    assert_eq!(*log.lock(), vec![('f', id), ('f', id), ('f', id), ('c', id)]);
    Ok(())
}
