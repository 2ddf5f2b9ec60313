use doodle_testing::prelude::*;
use doodle_core::{Clock, SchedulerError, Timer};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn ms(millis: f64) -> Time {
    Time::milliseconds(millis)
}

#[test]
fn after_fires_exactly_once_no_earlier_than_requested() {
    let rule = TestRuntime::new();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let seen = calls.clone();
    let timer = rule.timer();
    let task = rule.scheduler().after(
        ms(75.0),
        Box::new(move |elapsed| seen.borrow_mut().push((timer.now(), elapsed))),
    );

    rule.advance_by(ms(74.9));
    assert!(calls.borrow().is_empty());
    rule.advance_by(ms(1_000.0));

    let calls = calls.borrow();
    assert_eq!(calls.len(), 1);
    let (fired_at, elapsed) = calls[0];
    assert!(fired_at >= ms(75.0));
    assert!(elapsed >= ms(75.0));
    assert!(task.completed());
}

#[test]
fn canceled_task_never_runs_and_never_completes() {
    let rule = TestRuntime::new();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    let task = rule
        .scheduler()
        .after(ms(10.0), Box::new(move |_| flag.set(true)));
    task.cancel();
    task.cancel();
    rule.advance_by(ms(100.0));

    assert!(!ran.get());
    assert!(!task.completed());
    assert_eq!(task.state(), TaskState::Canceled);
}

#[test]
fn every_canceled_during_nth_call_has_no_further_calls() {
    for n in 1..=4 {
        let rule = TestRuntime::new();
        let calls = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Task>>> = Rc::new(RefCell::new(None));
        let seen = calls.clone();
        let job_slot = slot.clone();
        let task = rule.scheduler().every(
            ms(20.0),
            Box::new(move |_| {
                seen.set(seen.get() + 1);
                if seen.get() == n {
                    if let Some(task) = job_slot.borrow().as_ref() {
                        task.cancel();
                    }
                }
            }),
        );
        *slot.borrow_mut() = Some(task);

        rule.advance_by(ms(500.0));
        assert_eq!(calls.get(), n);
    }
}

#[test]
fn delay_follows_the_timer_not_the_clock() {
    let rule = TestRuntime::new();
    let clock = rule.clock();
    let scheduler = rule.scheduler();
    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    let jumping_clock = clock.clone();
    rule.handle().spawn(async move {
        jumping_clock.set_epoch(ms(10_000_000.0));
        let _ = scheduler.delay(ms(100.0)).await;
        flag.set(true);
    });

    rule.advance_by(ms(50.0));
    clock.set_epoch(Time::ZERO);
    assert!(!done.get());
    rule.advance_by(ms(49.0));
    assert!(!done.get());
    rule.advance_by(ms(1.0));
    assert!(done.get());
    assert_eq!(clock.epoch(), ms(50.0));
}

#[test]
fn delay_until_resolves_on_first_true_turn() {
    let rule = TestRuntime::new();
    let handle = rule.handle();
    let ready = Rc::new(Cell::new(false));
    let evaluations = Rc::new(Cell::new(0));
    let resumed = Rc::new(Cell::new(false));

    let scheduler = rule.scheduler();
    let predicate_ready = ready.clone();
    let predicate_count = evaluations.clone();
    let resumed_flag = resumed.clone();
    handle.spawn(async move {
        let _ = scheduler
            .delay_until(Box::new(move |_| {
                predicate_count.set(predicate_count.get() + 1);
                predicate_ready.get()
            }))
            .await;
        resumed_flag.set(true);
    });

    for turn in 1..=5 {
        handle.run_turn();
        assert!(!resumed.get());
        assert!(evaluations.get() <= turn);
    }
    let before = evaluations.get();
    ready.set(true);
    rule.run_until_idle();
    assert!(resumed.get());
    assert_eq!(evaluations.get(), before + 1);
}

#[test]
fn equal_delays_fire_together_in_fifo_order() {
    let rule = TestRuntime::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let timer = rule.timer();
    for label in ["a", "b"] {
        let order = order.clone();
        let timer = timer.clone();
        rule.scheduler().after(
            ms(100.0),
            Box::new(move |_| order.borrow_mut().push((label, timer.now()))),
        );
    }
    rule.advance_by(ms(150.0));
    assert_eq!(
        *order.borrow(),
        vec![("a", ms(100.0)), ("b", ms(100.0))]
    );
}

#[test]
fn every_fires_twice_within_window_and_stops_after_cancel() {
    let rule = TestRuntime::new();
    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    let task = rule
        .scheduler()
        .every(ms(50.0), Box::new(move |_| seen.set(seen.get() + 1)));

    rule.advance_by(ms(120.0));
    assert!(calls.get() >= 2);

    task.cancel();
    let frozen = calls.get();
    rule.advance_by(ms(200.0));
    assert_eq!(calls.get(), frozen);
}

#[test]
fn shutdown_rejects_work_and_fails_pending_delays() {
    let rule = TestRuntime::new();
    let scheduler = rule.scheduler();
    let pending = scheduler.delay(ms(100.0));
    let pending_task = pending.task().clone();
    let outcome = Rc::new(RefCell::new(None));
    let slot = outcome.clone();
    rule.handle().spawn({
        let completion = pending_task.completion();
        async move {
            *slot.borrow_mut() = Some(completion.await);
        }
    });
    rule.run_until_idle();

    scheduler.shutdown();
    assert_eq!(pending_task.state(), TaskState::Canceled);

    let rejected = scheduler.every(ms(1.0), Box::new(|_| {}));
    assert_eq!(rejected.state(), TaskState::Rejected);
    assert_eq!(
        rule.block_on(scheduler.delay(ms(5.0))),
        Err(SchedulerError::ShutDown)
    );
    // Spawned futures are torn down with the runtime's other work.
    assert!(outcome.borrow().is_none());
    drop(pending);
}

#[test]
fn dropping_a_delay_unregisters_its_timer() {
    let rule = TestRuntime::new();
    let handle = rule.handle();
    let delay = rule.scheduler().delay(ms(60_000.0));
    assert_eq!(handle.scheduled_timers(), 1);
    assert_eq!(handle.next_deadline(), Some(ms(60_000.0)));
    drop(delay);
    assert_eq!(handle.scheduled_timers(), 0);
    assert_eq!(handle.next_deadline(), None);
}

#[test]
fn dispatcher_posts_land_on_the_next_turn() {
    let rule = TestRuntime::new();
    let dispatcher = rule.handle().dispatcher();
    let (tx, rx) = std::sync::mpsc::channel();
    let worker = std::thread::spawn(move || {
        for value in 0..3 {
            let tx = tx.clone();
            dispatcher.post(move || {
                let _ = tx.send(value);
            });
        }
    });
    worker.join().expect("worker thread panicked");

    assert!(rx.try_recv().is_err());
    rule.run_until_idle();
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
}
