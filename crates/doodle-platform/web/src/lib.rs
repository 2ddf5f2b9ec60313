//! Browser host for the doodle runtime.
//!
//! [`WebHost`] owns a [`Runtime`] and drives it from the browser event loop:
//! scheduler turns run from `setTimeout` callbacks and frames are delivered
//! from `requestAnimationFrame`.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use doodle_core::{
    Clock, FrameClock, HostDriver, Runtime, RuntimeConfig, RuntimeHandle, Strand, Time, Timer,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

struct Kick {
    owner: u64,
    kick: Box<dyn Fn()>,
}

thread_local! {
    static KICK: RefCell<Option<Kick>> = RefCell::new(None);
}

fn kick() {
    let _ = KICK.try_with(|slot| {
        if let Ok(slot) = slot.try_borrow() {
            if let Some(entry) = slot.as_ref() {
                (entry.kick)();
            }
        }
    });
}

fn install_kick(owner: u64, kick: Box<dyn Fn()>) {
    let _ = KICK.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            *slot = Some(Kick { owner, kick });
        }
    });
}

/// Clears the kick only if `owner` installed the current one.
fn clear_kick(owner: u64) {
    let _ = KICK.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            if slot.as_ref().is_some_and(|entry| entry.owner == owner) {
                *slot = None;
            }
        }
    });
}

/// Host driver for the browser's single thread.
///
/// Requests are recorded and the host is nudged to arm a zero-delay timeout.
/// Requests made off the main thread only set the flags and are picked up by
/// the next pump.
#[derive(Debug, Default)]
pub struct WebDriver {
    frame_requested: AtomicBool,
    turn_requested: AtomicBool,
}

impl WebDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_frame_request(&self) -> bool {
        self.frame_requested.swap(false, Ordering::SeqCst)
    }

    pub fn take_turn_request(&self) -> bool {
        self.turn_requested.swap(false, Ordering::SeqCst)
    }
}

impl HostDriver for WebDriver {
    fn request_frame(&self) {
        self.frame_requested.store(true, Ordering::SeqCst);
        kick();
    }

    fn request_turn(&self) {
        self.turn_requested.store(true, Ordering::SeqCst);
        kick();
    }
}

/// Wall clock backed by `Date.now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DateClock;

impl Clock for DateClock {
    fn epoch(&self) -> Time {
        Time::milliseconds(js_sys::Date::now())
    }
}

/// Monotonic timer backed by `performance.now()`.
///
/// Falls back to `Date.now()` when the page exposes no performance object;
/// readings are clamped so they never decrease.
#[derive(Debug)]
pub struct PerformanceTimer {
    performance: Option<web_sys::Performance>,
    last: Cell<Time>,
}

impl PerformanceTimer {
    pub fn new(window: &web_sys::Window) -> Self {
        let performance = window.performance();
        if performance.is_none() {
            log::warn!("performance.now() unavailable; timing with Date.now()");
        }
        Self {
            performance,
            last: Cell::new(Time::ZERO),
        }
    }

    fn read(&self) -> Time {
        match &self.performance {
            Some(performance) => Time::milliseconds(performance.now()),
            None => Time::milliseconds(js_sys::Date::now()),
        }
    }
}

impl Timer for PerformanceTimer {
    fn now(&self) -> Time {
        let now = self.read().max(self.last.get());
        self.last.set(now);
        now
    }
}

/// Milliseconds to hand `setTimeout` so it fires no earlier than `deadline`.
fn timeout_millis(deadline: Time, now: Time) -> i32 {
    let wait = (deadline - now).as_millis();
    if wait.is_nan() || wait <= 0.0 {
        return 0;
    }
    wait.ceil().min(i32::MAX as f64) as i32
}

struct ArmedTimeout {
    handle: i32,
    deadline: Time,
}

struct HostInner {
    id: u64,
    window: web_sys::Window,
    runtime: Runtime,
    driver: Arc<WebDriver>,
    timer: Rc<PerformanceTimer>,
    clock: Rc<DateClock>,
    turn_callback: RefCell<Option<Closure<dyn FnMut()>>>,
    frame_callback: RefCell<Option<Closure<dyn FnMut(f64)>>>,
    armed_turn: Cell<Option<ArmedTimeout>>,
    armed_frame: Cell<Option<i32>>,
    last_frame: Cell<Option<Time>>,
}

impl HostInner {
    fn arm_turn_at(&self, deadline: Time) {
        if let Some(armed) = self.armed_turn.take() {
            if armed.deadline <= deadline {
                self.armed_turn.set(Some(armed));
                return;
            }
            self.window.clear_timeout_with_handle(armed.handle);
        }
        let Ok(callback) = self.turn_callback.try_borrow() else {
            return;
        };
        let Some(callback) = callback.as_ref() else {
            return;
        };
        let delay = timeout_millis(deadline, self.timer.now());
        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                callback.as_ref().unchecked_ref(),
                delay,
            ) {
            Ok(handle) => self.armed_turn.set(Some(ArmedTimeout { handle, deadline })),
            Err(err) => log::error!("setTimeout failed: {:?}", err),
        }
    }

    fn arm_frame(&self) {
        if self.armed_frame.get().is_some() {
            return;
        }
        let Ok(callback) = self.frame_callback.try_borrow() else {
            return;
        };
        let Some(callback) = callback.as_ref() else {
            return;
        };
        match self
            .window
            .request_animation_frame(callback.as_ref().unchecked_ref())
        {
            Ok(handle) => self.armed_frame.set(Some(handle)),
            Err(err) => log::error!("requestAnimationFrame failed: {:?}", err),
        }
    }

    fn kick(&self) {
        self.arm_turn_at(self.timer.now());
    }

    fn turn_fired(&self) {
        self.armed_turn.set(None);
        self.pump();
    }

    /// Runs ready turns, then arms whatever the runtime waits on next.
    fn pump(&self) {
        self.driver.take_turn_request();
        let handle = self.runtime.handle();
        let max_turns = self.runtime.config().max_turns_per_pump;
        let mut turns = 0;
        while turns < max_turns && handle.has_ready_work() {
            handle.run_turn();
            turns += 1;
        }
        self.rearm(&handle);
    }

    fn rearm(&self, handle: &RuntimeHandle) {
        if handle.is_shut_down() {
            return;
        }
        if self.driver.take_frame_request() || handle.needs_frame() {
            self.arm_frame();
        }
        if handle.has_ready_work() {
            self.arm_turn_at(self.timer.now());
        } else if let Some(deadline) = handle.next_deadline() {
            self.arm_turn_at(deadline);
        }
    }

    fn frame(&self) {
        self.armed_frame.set(None);
        let frame_time = self.timer.now();
        self.last_frame.set(Some(frame_time));
        self.runtime.handle().drain_frame_callbacks(frame_time);
        self.pump();
    }

    fn disarm(&self) {
        if let Some(armed) = self.armed_turn.take() {
            self.window.clear_timeout_with_handle(armed.handle);
        }
        if let Some(handle) = self.armed_frame.take() {
            if let Err(err) = self.window.cancel_animation_frame(handle) {
                log::warn!("cancelAnimationFrame failed: {:?}", err);
            }
        }
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        self.disarm();
        clear_kick(self.id);
    }
}

/// A [`Runtime`] driven by the browser event loop.
///
/// Only one host should be live per thread; creating a second one takes
/// over the driver kick of the first, and dropping the first afterwards
/// leaves the second one's kick in place.
#[derive(Clone)]
pub struct WebHost {
    inner: Rc<HostInner>,
}

impl WebHost {
    pub fn new() -> Result<Self, JsValue> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self, JsValue> {
        let window = web_sys::window().ok_or("no global window exists")?;
        let driver = Arc::new(WebDriver::new());
        let timer = Rc::new(PerformanceTimer::new(&window));
        let runtime = Runtime::with_config(driver.clone(), timer.clone(), config);
        let inner = Rc::new(HostInner {
            id: NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed),
            window,
            runtime,
            driver,
            timer,
            clock: Rc::new(DateClock),
            turn_callback: RefCell::new(None),
            frame_callback: RefCell::new(None),
            armed_turn: Cell::new(None),
            armed_frame: Cell::new(None),
            last_frame: Cell::new(None),
        });

        let weak: Weak<HostInner> = Rc::downgrade(&inner);
        *inner.turn_callback.borrow_mut() = Some(Closure::wrap(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.turn_fired();
            }
        }) as Box<dyn FnMut()>));

        let weak = Rc::downgrade(&inner);
        *inner.frame_callback.borrow_mut() = Some(Closure::wrap(Box::new(move |_timestamp: f64| {
            if let Some(inner) = weak.upgrade() {
                inner.frame();
            }
        }) as Box<dyn FnMut(f64)>));

        let weak = Rc::downgrade(&inner);
        install_kick(
            inner.id,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.kick();
                }
            }),
        );

        if inner.driver.take_turn_request() || inner.driver.take_frame_request() {
            inner.kick();
        }
        log::debug!("web host started");
        Ok(Self { inner })
    }

    pub fn runtime(&self) -> Runtime {
        self.inner.runtime.clone()
    }

    /// The runtime's [`Scheduler`](doodle_core::Scheduler) implementation.
    pub fn scheduler(&self) -> RuntimeHandle {
        self.inner.runtime.handle()
    }

    pub fn frame_clock(&self) -> FrameClock {
        self.inner.runtime.frame_clock()
    }

    pub fn strand(&self) -> Strand {
        self.inner.runtime.handle().strand()
    }

    pub fn clock(&self) -> Rc<DateClock> {
        Rc::clone(&self.inner.clock)
    }

    pub fn timer(&self) -> Rc<PerformanceTimer> {
        Rc::clone(&self.inner.timer)
    }

    /// Timestamp of the most recent delivered frame.
    pub fn last_frame(&self) -> Option<Time> {
        self.inner.last_frame.get()
    }

    /// Shuts the runtime down and cancels the pending browser callbacks.
    pub fn shutdown(&self) {
        self.inner.runtime.shutdown();
        self.inner.disarm();
        log::debug!("web host shut down");
    }
}

#[cfg(test)]
#[path = "tests/web_tests.rs"]
mod tests;
