use super::*;
use doodle_core::{Scheduler, SchedulerError, TaskState};
use std::cell::RefCell;
use std::sync::mpsc;
use std::thread;

#[test]
fn monotonic_timer_never_decreases() {
    let timer = MonotonicTimer::new();
    let mut previous = timer.now();
    for _ in 0..1_000 {
        let now = timer.now();
        assert!(now >= previous, "{now:?} < {previous:?}");
        previous = now;
    }
}

#[test]
fn system_clock_reports_epoch_milliseconds() {
    let epoch = SystemClock.epoch();
    // 2020-01-01T00:00:00Z
    assert!(epoch > Time::milliseconds(1_577_836_800_000.0));
}

#[test]
fn scheduling_requests_a_turn_and_frames_request_a_frame() {
    let runtime = StdRuntime::new();
    let driver = runtime.driver();
    runtime.scheduler().now(Box::new(|_| {}));
    assert!(driver.take_turn_request());

    runtime.frame_clock().with_frame_time(|_| {});
    assert!(runtime.take_frame_request());
    assert!(!runtime.take_frame_request());
}

#[test]
fn block_on_delay_waits_for_real_time() {
    let runtime = StdRuntime::new();
    let scheduler = runtime.scheduler();
    let started = Instant::now();
    let result = runtime.block_on(scheduler.delay(Time::milliseconds(20.0)));
    assert_eq!(result, Ok(()));
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[test]
fn block_on_resolves_next_frame() {
    let runtime = StdRuntime::new();
    let before = runtime.timer().now();
    let frame_time = runtime.block_on(runtime.frame_clock().next_frame());
    let frame_time = frame_time.expect("frame delivered");
    assert!(frame_time >= before);
}

#[test]
fn run_until_idle_fires_timers_in_order() {
    let runtime = StdRuntime::new();
    let scheduler = runtime.scheduler();
    let order = Rc::new(RefCell::new(Vec::new()));
    for (delay, label) in [(15.0, "late"), (5.0, "early"), (5.0, "early-second")] {
        let order = order.clone();
        scheduler.after(
            Time::milliseconds(delay),
            Box::new(move |_| order.borrow_mut().push(label)),
        );
    }
    runtime.run_until_idle();
    assert_eq!(*order.borrow(), vec!["early", "early-second", "late"]);
}

#[test]
fn every_stops_after_cancel() {
    let runtime = StdRuntime::new();
    let scheduler = runtime.scheduler();
    let ticks = Rc::new(Cell::new(0));
    let seen = ticks.clone();
    let task = scheduler.every(
        Time::milliseconds(5.0),
        Box::new(move |_| seen.set(seen.get() + 1)),
    );
    runtime
        .block_on(scheduler.delay(Time::milliseconds(30.0)))
        .expect("delay elapsed");
    task.cancel();
    let after_cancel = ticks.get();
    assert!(after_cancel >= 2);

    runtime
        .block_on(scheduler.delay(Time::milliseconds(20.0)))
        .expect("delay elapsed");
    assert_eq!(ticks.get(), after_cancel);
}

#[test]
fn posts_from_other_threads_wake_the_loop() {
    let runtime = StdRuntime::new();
    let dispatcher = runtime.runtime_handle().dispatcher();
    let (tx, rx) = mpsc::channel::<u32>();
    let received = Rc::new(Cell::new(None));

    let poster = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        dispatcher.post(move || {
            let _ = tx.send(42);
        });
    });

    let slot = received.clone();
    let outcome = runtime.block_on(runtime.scheduler().delay_until(Box::new(move |_| {
        if let Ok(value) = rx.try_recv() {
            slot.set(Some(value));
        }
        slot.get().is_some()
    })));
    poster.join().expect("poster thread panicked");

    assert_eq!(outcome, Ok(()));
    assert_eq!(received.get(), Some(42));
}

#[test]
fn strand_spreads_work_over_frames() {
    let runtime = StdRuntime::new();
    let ran = Rc::new(Cell::new(0));
    let jobs: Vec<doodle_core::StrandJob> = (0..3)
        .map(|_| {
            let ran = ran.clone();
            Box::new(move || {
                thread::sleep(Duration::from_millis(20));
                ran.set(ran.get() + 1);
            }) as doodle_core::StrandJob
        })
        .collect();
    let task = runtime.strand().invoke(jobs);
    assert_eq!(ran.get(), 1);
    assert!(task.is_active());

    runtime.block_on(task.completion()).expect("strand finished");
    assert_eq!(ran.get(), 3);
}

#[test]
fn shutdown_rejects_new_work_and_cancels_delays() {
    let runtime = StdRuntime::new();
    let scheduler = runtime.scheduler();
    let pending = scheduler.delay(Time::milliseconds(1_000.0));
    let completion = pending.task().completion();
    runtime.shutdown();

    assert_eq!(
        runtime.block_on(completion),
        Err(SchedulerError::Canceled)
    );
    let late = scheduler.after(Time::ZERO, Box::new(|_| {}));
    assert_eq!(late.state(), TaskState::Rejected);
    runtime.run_until_idle();
}
