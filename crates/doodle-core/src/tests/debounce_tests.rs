use super::*;
use crate::test_support::{ms, TestRig};

#[test]
fn events_run_in_post_order_on_a_later_turn() {
    let rig = TestRig::new();
    let queue = rig.handle.debounce_queue();
    let log = Rc::new(RefCell::new(Vec::new()));
    for index in 0..3 {
        let log = log.clone();
        queue.post(move || log.borrow_mut().push(index));
    }
    assert!(log.borrow().is_empty());
    assert_eq!(queue.len(), 3);

    rig.handle.run_turn();
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
    assert!(queue.is_empty());
}

#[test]
fn drain_yields_once_budget_is_exceeded() {
    let rig = TestRig::new();
    let queue = rig.handle.debounce_queue();
    let ran = Rc::new(Cell::new(0));
    for _ in 0..5 {
        let timer = rig.timer.clone();
        let ran = ran.clone();
        queue.post(move || {
            timer.advance(ms(3.0));
            ran.set(ran.get() + 1);
        });
    }

    rig.handle.run_turn();
    assert_eq!(ran.get(), 2);
    assert!(rig.handle.has_ready_work());
    rig.handle.run_turn();
    assert_eq!(ran.get(), 4);
    rig.handle.run_turn();
    assert_eq!(ran.get(), 5);
    assert!(!rig.handle.has_ready_work());
}

#[test]
fn events_posted_while_draining_keep_fifo_order() {
    let rig = TestRig::new();
    let queue = rig.handle.debounce_queue();
    let log = Rc::new(RefCell::new(Vec::new()));

    let nested_queue = queue.clone();
    let first_log = log.clone();
    queue.post(move || {
        first_log.borrow_mut().push("first");
        let late_log = first_log.clone();
        nested_queue.post(move || late_log.borrow_mut().push("late"));
    });
    let second_log = log.clone();
    queue.post(move || second_log.borrow_mut().push("second"));

    rig.run_until_idle();
    assert_eq!(*log.borrow(), vec!["first", "second", "late"]);
}

#[test]
fn cancel_drops_queued_and_future_events() {
    let rig = TestRig::new();
    let queue = rig.handle.debounce_queue();
    let ran = Rc::new(Cell::new(0));
    let first = ran.clone();
    queue.post(move || first.set(first.get() + 1));

    queue.cancel();
    assert!(queue.is_canceled());
    assert!(queue.is_empty());

    let second = ran.clone();
    queue.post(move || second.set(second.get() + 1));
    rig.run_until_idle();
    assert_eq!(ran.get(), 0);
    assert_eq!(rig.handle.scheduled_timers(), 0);
}

#[test]
fn shutdown_discards_pending_events() {
    let rig = TestRig::new();
    let queue = rig.handle.debounce_queue();
    rig.runtime.shutdown();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    queue.post(move || flag.set(true));
    assert!(queue.is_empty());
    rig.run_until_idle();
    assert!(!ran.get());
}

#[test]
fn zero_budget_still_runs_one_event_per_turn() {
    let rig = TestRig::new();
    let queue = DebounceQueue::new(rig.handle.clone(), Time::ZERO);
    let ran = Rc::new(Cell::new(0));
    for _ in 0..3 {
        let ran = ran.clone();
        queue.post(move || ran.set(ran.get() + 1));
    }

    rig.handle.run_turn();
    assert_eq!(ran.get(), 1);
    assert_eq!(queue.len(), 2);

    let turns = rig.run_until_idle();
    assert_eq!(ran.get(), 3);
    assert!(queue.is_empty());
    assert_eq!(turns, 2);
}
