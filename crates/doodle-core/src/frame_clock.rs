use crate::runtime::RuntimeHandle;
use crate::{AnimationScheduler, Completion, SchedulerError, Task, Time};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Frame-aligned scheduling on top of a runtime's frame callbacks.
#[derive(Clone)]
pub struct FrameClock {
    runtime: RuntimeHandle,
}

impl FrameClock {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self { runtime }
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.clone()
    }

    pub fn with_frame_time(&self, callback: impl FnOnce(Time) + 'static) -> Task {
        self.runtime.register_frame_callback(Box::new(callback))
    }

    pub fn with_frame_nanos(&self, callback: impl FnOnce(u64) + 'static) -> Task {
        self.with_frame_time(move |time| callback(time.as_nanos()))
    }

    pub fn next_frame(&self) -> NextFrame {
        NextFrame::new(self.clone())
    }

    /// Calls `job` once per frame for as long as it returns `true`.
    ///
    /// The returned task completes when `job` returns `false`. Canceling it,
    /// including from inside `job`, stops the loop before the next frame.
    pub fn frame_loop(&self, job: impl FnMut(Time) -> bool + 'static) -> Task {
        let task = Task::pending();
        let state = Rc::new(FrameLoop {
            clock: self.clone(),
            job: RefCell::new(Box::new(job)),
            task: task.clone(),
            next: RefCell::new(None),
        });
        let weak = Rc::downgrade(&state);
        task.on_cancel(move || {
            if let Some(state) = weak.upgrade() {
                let next = state.next.borrow_mut().take();
                if let Some(next) = next {
                    next.cancel();
                }
            }
        });
        FrameLoop::schedule(&state);
        task
    }
}

impl AnimationScheduler for FrameClock {
    fn on_next_frame(&self, job: crate::FrameJob) -> Task {
        self.runtime.register_frame_callback(job)
    }
}

struct FrameLoop {
    clock: FrameClock,
    job: RefCell<Box<dyn FnMut(Time) -> bool>>,
    task: Task,
    next: RefCell<Option<Task>>,
}

impl FrameLoop {
    fn schedule(this: &Rc<Self>) {
        let state = Rc::clone(this);
        let next = this
            .clock
            .with_frame_time(move |time| FrameLoop::tick(&state, time));
        next.forward_cancellation(&this.task);
        *this.next.borrow_mut() = Some(next);
    }

    fn tick(this: &Rc<Self>, frame_time: Time) {
        if !this.task.is_active() {
            return;
        }
        let keep_going = (this.job.borrow_mut())(frame_time);
        if !this.task.is_active() {
            return;
        }
        if keep_going {
            FrameLoop::schedule(this);
        } else {
            this.next.borrow_mut().take();
            this.task.mark_completed();
        }
    }
}

/// Resolves with the timestamp of the next frame.
///
/// Dropping the future before the frame arrives withdraws its callback.
#[must_use = "futures do nothing unless polled"]
pub struct NextFrame {
    clock: FrameClock,
    registration: Option<Completion>,
    time: Rc<Cell<Option<Time>>>,
}

impl NextFrame {
    fn new(clock: FrameClock) -> Self {
        Self {
            clock,
            registration: None,
            time: Rc::new(Cell::new(None)),
        }
    }
}

impl Future for NextFrame {
    type Output = Result<Time, SchedulerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(time) = this.time.get() {
            return Poll::Ready(Ok(time));
        }

        let registration = this.registration.get_or_insert_with(|| {
            let slot = Rc::clone(&this.time);
            this.clock
                .with_frame_time(move |time| slot.set(Some(time)))
                .completion()
        });

        match Pin::new(registration).poll(cx) {
            Poll::Ready(Ok(())) => match this.time.get() {
                Some(time) => Poll::Ready(Ok(time)),
                None => Poll::Ready(Err(SchedulerError::Canceled)),
            },
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for NextFrame {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.task().cancel();
        }
    }
}

#[cfg(test)]
#[path = "tests/frame_clock_tests.rs"]
mod tests;
