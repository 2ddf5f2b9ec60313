use std::cell::Cell;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use doodle_core::{
    Clock, FrameClock, HostDriver, Runtime, RuntimeConfig, RuntimeHandle, Strand, Time, Timer,
};

/// Timer whose reading only moves when a test says so.
///
/// Clones share the same reading.
#[derive(Clone, Debug, Default)]
pub struct ManualTimer {
    now: Rc<Cell<Time>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Time) {
        debug_assert!(!(by < Time::ZERO), "timer cannot move backwards");
        self.now.set(self.now.get() + by.max(Time::ZERO));
    }

    /// Moves the reading to `time`. Earlier values are ignored.
    pub fn set(&self, time: Time) {
        self.now.set(self.now.get().max(time));
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> Time {
        self.now.get()
    }
}

/// Wall clock that follows a [`ManualTimer`] from a settable origin.
///
/// Jumping the clock never affects the timer, which lets tests check that
/// scheduling ignores wall-clock changes.
#[derive(Clone, Debug)]
pub struct ManualClock {
    timer: ManualTimer,
    offset: Rc<Cell<Time>>,
}

impl ManualClock {
    pub fn new(timer: ManualTimer, epoch: Time) -> Self {
        let offset = epoch - timer.now();
        Self {
            timer,
            offset: Rc::new(Cell::new(offset)),
        }
    }

    pub fn set_epoch(&self, epoch: Time) {
        self.offset.set(epoch - self.timer.now());
    }
}

impl Clock for ManualClock {
    fn epoch(&self) -> Time {
        self.offset.get() + self.timer.now()
    }
}

/// Host driver that counts requests instead of acting on them.
#[derive(Debug, Default)]
pub struct TestDriver {
    frame_requests: AtomicUsize,
    turn_requests: AtomicUsize,
    last_wake_at: Mutex<Option<Time>>,
}

impl TestDriver {
    pub fn frame_requests(&self) -> usize {
        self.frame_requests.load(Ordering::SeqCst)
    }

    pub fn turn_requests(&self) -> usize {
        self.turn_requests.load(Ordering::SeqCst)
    }

    pub fn last_wake_at(&self) -> Option<Time> {
        self.last_wake_at.lock().ok().and_then(|slot| *slot)
    }
}

impl HostDriver for TestDriver {
    fn request_frame(&self) {
        self.frame_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn request_turn(&self) {
        self.turn_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_at(&self, deadline: Time) {
        if let Ok(mut slot) = self.last_wake_at.lock() {
            *slot = Some(deadline);
        }
        self.request_turn();
    }
}

struct WakeFlag {
    woken: AtomicBool,
}

impl futures_task::ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::SeqCst);
    }
}

/// Deterministic runtime over virtual time.
///
/// Nothing happens until the test pumps it: turns run in
/// [`TestRuntime::run_until_idle`], time moves in
/// [`TestRuntime::advance_by`], and frames are delivered by
/// [`TestRuntime::tick_frame`].
pub struct TestRuntime {
    runtime: Runtime,
    timer: ManualTimer,
    clock: ManualClock,
    driver: Arc<TestDriver>,
    last_frame: Cell<Option<Time>>,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let timer = ManualTimer::new();
        let clock = ManualClock::new(timer.clone(), Time::ZERO);
        let driver = Arc::new(TestDriver::default());
        let runtime = Runtime::with_config(driver.clone(), Rc::new(timer.clone()), config);
        Self {
            runtime,
            timer,
            clock,
            driver,
            last_frame: Cell::new(None),
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    /// The runtime's [`Scheduler`](doodle_core::Scheduler) implementation.
    pub fn scheduler(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn frame_clock(&self) -> FrameClock {
        self.runtime.frame_clock()
    }

    pub fn strand(&self) -> Strand {
        self.runtime.handle().strand()
    }

    pub fn timer(&self) -> ManualTimer {
        self.timer.clone()
    }

    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn driver(&self) -> Arc<TestDriver> {
        Arc::clone(&self.driver)
    }

    pub fn now(&self) -> Time {
        self.timer.now()
    }

    /// Runs turns until nothing is ready at the current time.
    ///
    /// Returns the number of turns executed.
    pub fn run_until_idle(&self) -> usize {
        let handle = self.runtime.handle();
        let max_turns = self.runtime.config().max_turns_per_pump;
        let mut turns = 0;
        while handle.has_ready_work() {
            if turns >= max_turns {
                log::debug!("run_until_idle stopped after {} turns", turns);
                break;
            }
            handle.run_turn();
            turns += 1;
        }
        turns
    }

    /// Moves virtual time forward, firing every timer due on the way at its
    /// own deadline.
    pub fn advance_by(&self, by: Time) {
        self.advance_to(self.timer.now() + by);
    }

    pub fn advance_to(&self, target: Time) {
        let handle = self.runtime.handle();
        loop {
            self.run_until_idle();
            match handle.next_deadline() {
                Some(deadline) if deadline <= target && deadline > self.timer.now() => {
                    self.timer.set(deadline);
                }
                _ => break,
            }
        }
        self.timer.set(target);
        self.run_until_idle();
    }

    /// Delivers a frame stamped with the current time, then settles turns.
    pub fn tick_frame(&self) -> Time {
        let frame_time = self.timer.now();
        self.last_frame.set(Some(frame_time));
        self.runtime.handle().drain_frame_callbacks(frame_time);
        self.run_until_idle();
        frame_time
    }

    /// Advances one frame interval and ticks, `count` times.
    pub fn advance_frames(&self, count: usize) -> Vec<Time> {
        let interval = self.runtime.config().frame_interval;
        (0..count)
            .map(|_| {
                self.advance_by(interval);
                self.tick_frame()
            })
            .collect()
    }

    /// Drives virtual time, turns and frames until `future` completes.
    ///
    /// # Panics
    ///
    /// Panics if the future is still pending while the runtime has nothing
    /// left that could wake it.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = pin!(future);
        let flag = Arc::new(WakeFlag {
            woken: AtomicBool::new(true),
        });
        let waker = futures_task::waker(flag.clone());
        let mut cx = Context::from_waker(&waker);
        let handle = self.runtime.handle();
        loop {
            if flag.woken.swap(false, Ordering::SeqCst) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            }
            self.run_until_idle();
            if flag.woken.load(Ordering::SeqCst) {
                continue;
            }

            let next_frame = handle.needs_frame().then(|| match self.last_frame.get() {
                Some(last) => (last + self.runtime.config().frame_interval).max(self.now()),
                None => self.now(),
            });
            match (handle.next_deadline(), next_frame) {
                (Some(deadline), Some(frame)) if deadline < frame => self.advance_to(deadline),
                (_, Some(frame)) => {
                    self.advance_to(frame);
                    self.tick_frame();
                }
                (Some(deadline), None) => self.advance_to(deadline),
                (None, None) => {
                    panic!("block_on stalled: future is pending but no work is scheduled")
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.runtime.shutdown();
    }
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/testing_tests.rs"]
mod tests;
