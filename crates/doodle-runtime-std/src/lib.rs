//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform traits
//! defined in `doodle-core` and a blocking event loop around them.
//! Applications construct a [`StdRuntime`], hand its scheduler, clock and
//! timer to their collaborators, and drive it with [`StdRuntime::block_on`]
//! or [`StdRuntime::run_until_idle`].

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use web_time::{Instant, SystemTime, UNIX_EPOCH};

use doodle_core::{
    Clock, FrameClock, HostDriver, Runtime, RuntimeConfig, RuntimeHandle, Strand, Time, Timer,
};

/// Host driver that records requests and unparks the event loop thread.
pub struct StdDriver {
    frame_requested: AtomicBool,
    turn_requested: AtomicBool,
    signal: Mutex<bool>,
    unparked: Condvar,
    frame_waker: RwLock<Option<Arc<dyn Fn() + Send + Sync + 'static>>>,
}

impl StdDriver {
    pub fn new() -> Self {
        Self {
            frame_requested: AtomicBool::new(false),
            turn_requested: AtomicBool::new(false),
            signal: Mutex::new(false),
            unparked: Condvar::new(),
            frame_waker: RwLock::new(None),
        }
    }

    /// Returns whether a frame has been requested since the last call.
    pub fn take_frame_request(&self) -> bool {
        self.frame_requested.swap(false, Ordering::SeqCst)
    }

    /// Returns whether a turn has been requested since the last call.
    pub fn take_turn_request(&self) -> bool {
        self.turn_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a callback invoked whenever the runtime asks for attention.
    ///
    /// Hosts with their own event loop use it to wake that loop instead of
    /// parking in [`StdRuntime`].
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut slot) = self.frame_waker.write() {
            *slot = Some(Arc::new(waker));
        }
    }

    pub fn clear_frame_waker(&self) {
        if let Ok(mut slot) = self.frame_waker.write() {
            *slot = None;
        }
    }

    /// Wakes a thread blocked in [`StdDriver::park`].
    pub fn unpark(&self) {
        if let Ok(mut signaled) = self.signal.lock() {
            *signaled = true;
            self.unparked.notify_all();
        }
    }

    /// Blocks until unparked or until `timeout` elapses.
    ///
    /// Returns immediately if an unpark arrived since the previous park.
    pub fn park(&self, timeout: Option<Duration>) {
        let Ok(mut signaled) = self.signal.lock() else {
            return;
        };
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        while !*signaled {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    match self.unparked.wait_timeout(signaled, deadline - now) {
                        Ok((guard, _)) => signaled = guard,
                        Err(_) => return,
                    }
                }
                None => match self.unparked.wait(signaled) {
                    Ok(guard) => signaled = guard,
                    Err(_) => return,
                },
            }
        }
        *signaled = false;
    }

    fn wake(&self) {
        self.unpark();
        let waker = match self.frame_waker.read() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdDriver")
            .field(
                "frame_requested",
                &self.frame_requested.load(Ordering::SeqCst),
            )
            .field("turn_requested", &self.turn_requested.load(Ordering::SeqCst))
            .finish()
    }
}

impl HostDriver for StdDriver {
    fn request_frame(&self) {
        self.frame_requested.store(true, Ordering::SeqCst);
        self.wake();
    }

    fn request_turn(&self) {
        self.turn_requested.store(true, Ordering::SeqCst);
        self.wake();
    }
}

/// Wall clock backed by the system time.
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch(&self) -> Time {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since_epoch) => Time::from(since_epoch),
            Err(err) => -Time::from(err.duration()),
        }
    }
}

/// Monotonic timer measuring from its own creation.
#[derive(Debug)]
pub struct MonotonicTimer {
    origin: Instant,
    last: Cell<Time>,
}

impl MonotonicTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: Cell::new(Time::ZERO),
        }
    }

    /// Converts a reading of this timer back into an [`Instant`].
    pub fn instant_at(&self, time: Time) -> Instant {
        self.origin + time.as_duration()
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for MonotonicTimer {
    fn now(&self) -> Time {
        let now = Time::from(self.origin.elapsed()).max(self.last.get());
        self.last.set(now);
        now
    }
}

struct BlockOnWaker {
    driver: Arc<StdDriver>,
    woken: AtomicBool,
}

impl futures_task::ArcWake for BlockOnWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::SeqCst);
        arc_self.driver.unpark();
    }
}

/// Bundles the std driver, clock, timer and a runtime, and runs its loop.
#[derive(Clone)]
pub struct StdRuntime {
    driver: Arc<StdDriver>,
    clock: Rc<SystemClock>,
    timer: Rc<MonotonicTimer>,
    runtime: Runtime,
    last_frame: Rc<Cell<Option<Time>>>,
}

impl StdRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let driver = Arc::new(StdDriver::default());
        let timer = Rc::new(MonotonicTimer::new());
        let runtime = Runtime::with_config(driver.clone(), timer.clone(), config);
        Self {
            driver,
            clock: Rc::new(SystemClock),
            timer,
            runtime,
            last_frame: Rc::new(Cell::new(None)),
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
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

    pub fn driver(&self) -> Arc<StdDriver> {
        Arc::clone(&self.driver)
    }

    pub fn clock(&self) -> Rc<SystemClock> {
        Rc::clone(&self.clock)
    }

    pub fn timer(&self) -> Rc<MonotonicTimer> {
        Rc::clone(&self.timer)
    }

    /// Returns whether a frame was requested since the last poll.
    pub fn take_frame_request(&self) -> bool {
        self.driver.take_frame_request()
    }

    /// Registers a waker to be called when the runtime requests a turn or frame.
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.driver.set_frame_waker(waker);
    }

    pub fn clear_frame_waker(&self) {
        self.driver.clear_frame_waker();
    }

    /// Delivers a frame tick stamped with `frame_time`.
    pub fn drain_frame_callbacks(&self, frame_time: Time) {
        self.last_frame.set(Some(frame_time));
        self.runtime.handle().drain_frame_callbacks(frame_time);
    }

    /// Runs every turn that is ready right now, up to the configured bound.
    pub fn run_ready_turns(&self) -> usize {
        let handle = self.runtime.handle();
        let max_turns = self.runtime.config().max_turns_per_pump;
        let mut turns = 0;
        while turns < max_turns && handle.has_ready_work() {
            handle.run_turn();
            turns += 1;
        }
        if turns == max_turns {
            log::debug!("turn bound of {} reached; yielding", max_turns);
        }
        self.driver.take_turn_request();
        turns
    }

    /// Delivers a synthetic frame if one is pending and the frame interval
    /// has elapsed since the previous one.
    pub fn pump_frame(&self) -> bool {
        if !self.runtime.needs_frame() {
            return false;
        }
        let now = self.timer.now();
        let due = match self.last_frame.get() {
            Some(last) => now - last >= self.runtime.config().frame_interval,
            None => true,
        };
        if !due {
            return false;
        }
        self.driver.take_frame_request();
        self.drain_frame_callbacks(now);
        true
    }

    /// Runs ready turns and a due frame. Returns `true` if anything ran.
    pub fn poll_once(&self) -> bool {
        let turns = self.run_ready_turns();
        let framed = self.pump_frame();
        turns > 0 || framed
    }

    /// Time until the runtime next needs attention, or `None` if it is only
    /// waiting for outside events.
    pub fn time_until_next_event(&self) -> Option<Duration> {
        let handle = self.runtime.handle();
        if handle.has_ready_work() {
            return Some(Duration::ZERO);
        }
        let now = self.timer.now();
        let timer_wait = handle.next_deadline().map(|deadline| deadline - now);
        let frame_wait = if handle.needs_frame() {
            let interval = self.runtime.config().frame_interval;
            Some(match self.last_frame.get() {
                Some(last) => last + interval - now,
                None => Time::ZERO,
            })
        } else {
            None
        };
        let wait = match (timer_wait, frame_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        wait.map(Time::as_duration)
    }

    fn wait_for_work(&self) {
        match self.time_until_next_event() {
            Some(wait) if wait.is_zero() => {}
            wait => self.driver.park(wait),
        }
    }

    /// Runs the loop until no timers or frames remain.
    ///
    /// Spawned futures that wait on outside events do not keep the loop alive.
    pub fn run_until_idle(&self) {
        let handle = self.runtime.handle();
        loop {
            self.poll_once();
            if handle.has_ready_work() {
                continue;
            }
            if handle.next_deadline().is_none() && !handle.needs_frame() {
                log::debug!("std runtime idle");
                return;
            }
            self.wait_for_work();
        }
    }

    /// Runs the loop until `future` completes and returns its output.
    ///
    /// The future is polled on the calling thread, interleaved with runtime
    /// turns and frames.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = pin!(future);
        let notify = Arc::new(BlockOnWaker {
            driver: self.driver.clone(),
            woken: AtomicBool::new(true),
        });
        let waker = futures_task::waker(notify.clone());
        let mut cx = Context::from_waker(&waker);
        loop {
            if notify.woken.swap(false, Ordering::SeqCst) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            }
            self.poll_once();
            if notify.woken.load(Ordering::SeqCst) {
                continue;
            }
            self.wait_for_work();
        }
    }

    /// Cancels all pending work and rejects later scheduling.
    pub fn shutdown(&self) {
        self.runtime.shutdown();
        self.driver.unpark();
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("driver", &self.driver)
            .field("clock", &self.clock)
            .field("timer", &self.timer)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/std_runtime_tests.rs"]
mod tests;
