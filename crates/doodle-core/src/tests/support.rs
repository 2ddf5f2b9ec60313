use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use crate::{DefaultDriver, Runtime, RuntimeConfig, RuntimeHandle, Time, Timer};

#[derive(Default)]
pub(crate) struct ManualTimer {
    now: Cell<Time>,
}

impl ManualTimer {
    pub(crate) fn advance(&self, by: Time) {
        self.now.set(self.now.get() + by);
    }

    pub(crate) fn set(&self, time: Time) {
        self.now.set(time);
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> Time {
        self.now.get()
    }
}

pub(crate) fn ms(millis: f64) -> Time {
    Time::milliseconds(millis)
}

/// Runtime over a manual timer, pumped by hand.
pub(crate) struct TestRig {
    pub(crate) runtime: Runtime,
    pub(crate) handle: RuntimeHandle,
    pub(crate) timer: Rc<ManualTimer>,
}

impl TestRig {
    pub(crate) fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub(crate) fn with_config(config: RuntimeConfig) -> Self {
        let timer = Rc::new(ManualTimer::default());
        let runtime = Runtime::with_config(Arc::new(DefaultDriver), timer.clone(), config);
        let handle = runtime.handle();
        Self {
            runtime,
            handle,
            timer,
        }
    }

    pub(crate) fn run_until_idle(&self) -> usize {
        let mut turns = 0;
        while self.handle.has_ready_work() && turns < 1024 {
            self.handle.run_turn();
            turns += 1;
        }
        turns
    }

    /// Moves time forward by `by`, stopping at every deadline on the way.
    pub(crate) fn advance_by(&self, by: Time) {
        let target = self.timer.now() + by;
        for _ in 0..10_000 {
            self.run_until_idle();
            match self.handle.next_deadline() {
                Some(deadline) if deadline <= target => {
                    if deadline > self.timer.now() {
                        self.timer.set(deadline);
                    }
                }
                _ => break,
            }
        }
        self.timer.set(target);
        self.run_until_idle();
    }

    pub(crate) fn tick_frame(&self) -> Time {
        let frame_time = self.timer.now();
        self.handle.drain_frame_callbacks(frame_time);
        self.run_until_idle();
        frame_time
    }
}
