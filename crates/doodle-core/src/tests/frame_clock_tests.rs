use super::*;
use crate::test_support::{ms, TestRig};
use crate::TaskState;

fn resubmit(clock: FrameClock, stamps: Rc<RefCell<Vec<Time>>>, remaining: usize) {
    if remaining == 0 {
        return;
    }
    let next = clock.clone();
    clock.on_next_frame(Box::new(move |time| {
        stamps.borrow_mut().push(time);
        resubmit(next, stamps, remaining - 1);
    }));
}

#[test]
fn resubmitting_callback_fires_once_per_tick() {
    let rig = TestRig::new();
    let stamps = Rc::new(RefCell::new(Vec::new()));
    resubmit(rig.handle.frame_clock(), stamps.clone(), 3);

    for _ in 0..5 {
        rig.timer.advance(ms(16.0));
        rig.tick_frame();
    }

    let stamps = stamps.borrow();
    assert_eq!(*stamps, vec![ms(16.0), ms(32.0), ms(48.0)]);
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(!rig.handle.needs_frame());
}

#[test]
fn callbacks_registered_during_tick_wait_for_next_tick() {
    let rig = TestRig::new();
    let clock = rig.handle.frame_clock();
    let log = Rc::new(RefCell::new(Vec::new()));
    let outer_log = log.clone();
    let inner_clock = clock.clone();
    clock.with_frame_time(move |_| {
        outer_log.borrow_mut().push("outer");
        let inner_log = outer_log.clone();
        inner_clock.with_frame_time(move |_| inner_log.borrow_mut().push("inner"));
    });

    rig.tick_frame();
    assert_eq!(*log.borrow(), vec!["outer"]);
    assert!(rig.handle.needs_frame());
    rig.tick_frame();
    assert_eq!(*log.borrow(), vec!["outer", "inner"]);
}

#[test]
fn canceled_frame_callback_never_runs() {
    let rig = TestRig::new();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    let task = rig
        .handle
        .frame_clock()
        .with_frame_time(move |_| flag.set(true));
    assert!(rig.handle.needs_frame());

    task.cancel();
    assert!(!rig.handle.needs_frame());
    rig.tick_frame();
    assert!(!ran.get());
    assert_eq!(task.state(), TaskState::Canceled);
}

#[test]
fn frame_nanos_follow_frame_time() {
    let rig = TestRig::new();
    let nanos = Rc::new(Cell::new(0));
    let slot = nanos.clone();
    rig.handle
        .frame_clock()
        .with_frame_nanos(move |value| slot.set(value));
    rig.timer.advance(ms(2.5));
    rig.tick_frame();
    assert_eq!(nanos.get(), 2_500_000);
}

#[test]
fn next_frame_resolves_with_frame_time() {
    let rig = TestRig::new();
    let clock = rig.handle.frame_clock();
    let result = Rc::new(Cell::new(None));
    let slot = result.clone();
    rig.handle.spawn(async move {
        slot.set(Some(clock.next_frame().await));
    });
    rig.run_until_idle();
    assert!(result.get().is_none());
    assert!(rig.handle.needs_frame());

    rig.timer.advance(ms(20.0));
    rig.tick_frame();
    assert_eq!(result.get(), Some(Ok(ms(20.0))));
}

#[test]
fn dropping_next_frame_withdraws_callback() {
    let rig = TestRig::new();
    let clock = rig.handle.frame_clock();
    let mut next = clock.next_frame();
    let mut cx = Context::from_waker(futures_task::noop_waker_ref());
    assert!(Pin::new(&mut next).poll(&mut cx).is_pending());
    assert!(rig.handle.has_frame_callbacks());
    drop(next);
    assert!(!rig.handle.has_frame_callbacks());
}

#[test]
fn frame_loop_runs_until_job_declines() {
    let rig = TestRig::new();
    let frames = Rc::new(Cell::new(0));
    let seen = frames.clone();
    let task = rig.handle.frame_clock().frame_loop(move |_| {
        seen.set(seen.get() + 1);
        seen.get() < 3
    });

    for _ in 0..6 {
        rig.tick_frame();
    }
    assert_eq!(frames.get(), 3);
    assert!(task.completed());
    assert!(!rig.handle.needs_frame());
}

#[test]
fn frame_loop_can_cancel_itself() {
    let rig = TestRig::new();
    let frames = Rc::new(Cell::new(0));
    let slot: Rc<RefCell<Option<Task>>> = Rc::new(RefCell::new(None));
    let seen = frames.clone();
    let job_slot = slot.clone();
    let task = rig.handle.frame_clock().frame_loop(move |_| {
        seen.set(seen.get() + 1);
        if seen.get() == 2 {
            if let Some(task) = job_slot.borrow().as_ref() {
                task.cancel();
            }
        }
        true
    });
    *slot.borrow_mut() = Some(task.clone());

    for _ in 0..5 {
        rig.tick_frame();
    }
    assert_eq!(frames.get(), 2);
    assert!(task.is_canceled());
    assert!(!rig.handle.has_frame_callbacks());
}

#[test]
fn frame_loop_is_canceled_by_shutdown() {
    let rig = TestRig::new();
    let task = rig.handle.frame_clock().frame_loop(|_| true);
    rig.tick_frame();
    rig.runtime.shutdown();
    assert!(task.is_canceled());
}
