//! Contracts through which collaborators request timed work.

use crate::{Delay, Task, Time};

/// One-shot callback. Receives the time elapsed since it was submitted.
pub type Job = Box<dyn FnOnce(Time) + 'static>;

/// Repeating callback. Receives the time elapsed since the previous firing.
pub type RepeatingJob = Box<dyn FnMut(Time) + 'static>;

/// Condition polled by [`Scheduler::delay_until`]. Receives the time elapsed
/// since the wait started.
pub type Predicate = Box<dyn FnMut(Time) -> bool + 'static>;

/// Callback run on an animation frame. Receives the frame timestamp.
pub type FrameJob = Box<dyn FnOnce(Time) + 'static>;

/// Time-based execution of deferred work.
///
/// Work never runs inline: even [`Scheduler::now`] waits for the next
/// scheduler turn. All callbacks run on the thread that owns the scheduler.
pub trait Scheduler {
    /// Runs `job` on the next turn.
    fn now(&self, job: Job) -> Task {
        self.after(Time::ZERO, job)
    }

    /// Runs `job` once, no earlier than `time` from now.
    ///
    /// The returned task reports `completed` from the moment `job` is
    /// invoked. Non-positive times behave like [`Scheduler::now`].
    fn after(&self, time: Time, job: Job) -> Task;

    /// Runs `job` every `time` until the returned task is canceled.
    ///
    /// The interval is measured from each firing. The task never completes.
    fn every(&self, time: Time, job: RepeatingJob) -> Task;

    /// Suspends an async caller for at least `time`.
    fn delay(&self, time: Time) -> Delay {
        self.after(time, Box::new(|_| {})).into()
    }

    /// Suspends an async caller until `predicate` returns `true`.
    ///
    /// The predicate is evaluated once per turn, starting with the next one.
    fn delay_until(&self, predicate: Predicate) -> Delay;

    /// Cancels everything pending and rejects all later requests.
    fn shutdown(&self);
}

/// Frame-aligned execution.
pub trait AnimationScheduler {
    /// Runs `job` with the timestamp of the next frame.
    ///
    /// Jobs registered while a frame is being delivered run on the frame
    /// after it.
    fn on_next_frame(&self, job: FrameJob) -> Task;
}

impl<S: Scheduler + ?Sized> Scheduler for std::rc::Rc<S> {
    fn now(&self, job: Job) -> Task {
        (**self).now(job)
    }

    fn after(&self, time: Time, job: Job) -> Task {
        (**self).after(time, job)
    }

    fn every(&self, time: Time, job: RepeatingJob) -> Task {
        (**self).every(time, job)
    }

    fn delay(&self, time: Time) -> Delay {
        (**self).delay(time)
    }

    fn delay_until(&self, predicate: Predicate) -> Delay {
        (**self).delay_until(predicate)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}

impl<A: AnimationScheduler + ?Sized> AnimationScheduler for std::rc::Rc<A> {
    fn on_next_frame(&self, job: FrameJob) -> Task {
        (**self).on_next_frame(job)
    }
}
