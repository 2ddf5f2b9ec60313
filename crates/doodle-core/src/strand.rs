//! Frame-budgeted execution of job batches.

use std::cell::RefCell;
use std::iter::Peekable;
use std::rc::Rc;

use crate::platform::Timer;
use crate::{AnimationScheduler, Task, Time};

pub type StrandJob = Box<dyn FnOnce() + 'static>;

type JobIter = Peekable<Box<dyn Iterator<Item = StrandJob>>>;

/// Runs batches of jobs in order, spreading them over animation frames.
///
/// A batch starts running inside [`Strand::invoke`]. Whenever a slice has
/// used up the frame budget, the remaining jobs continue on the next frame.
#[derive(Clone)]
pub struct Strand {
    frames: Rc<dyn AnimationScheduler>,
    timer: Rc<dyn Timer>,
    budget: Time,
}

impl Strand {
    pub fn new(
        frames: impl AnimationScheduler + 'static,
        timer: Rc<dyn Timer>,
        budget: Time,
    ) -> Self {
        Self {
            frames: Rc::new(frames),
            timer,
            budget,
        }
    }

    pub fn budget(&self) -> Time {
        self.budget
    }

    /// Runs `jobs` in order under a single task.
    ///
    /// The task completes once every job has run; an empty batch completes
    /// immediately. Canceling it stops the batch before the next job.
    pub fn invoke<I>(&self, jobs: I) -> Task
    where
        I: IntoIterator<Item = StrandJob>,
        I::IntoIter: 'static,
    {
        let iter: Box<dyn Iterator<Item = StrandJob>> = Box::new(jobs.into_iter());
        let task = Task::pending();
        let run = Rc::new(StrandRun {
            frames: self.frames.clone(),
            timer: self.timer.clone(),
            budget: self.budget,
            jobs: RefCell::new(iter.peekable()),
            task: task.clone(),
            frame: RefCell::new(None),
        });
        let weak = Rc::downgrade(&run);
        task.on_cancel(move || {
            if let Some(run) = weak.upgrade() {
                let frame = run.frame.borrow_mut().take();
                if let Some(frame) = frame {
                    frame.cancel();
                }
            }
        });
        StrandRun::process(&run);
        task
    }
}

struct StrandRun {
    frames: Rc<dyn AnimationScheduler>,
    timer: Rc<dyn Timer>,
    budget: Time,
    jobs: RefCell<JobIter>,
    task: Task,
    frame: RefCell<Option<Task>>,
}

impl StrandRun {
    fn process(this: &Rc<Self>) {
        let start = this.timer.now();
        loop {
            if !this.task.is_active() {
                return;
            }
            let job = this.jobs.borrow_mut().next();
            let Some(job) = job else {
                this.task.mark_completed();
                return;
            };
            job();
            if !this.task.is_active() {
                return;
            }
            if this.jobs.borrow_mut().peek().is_none() {
                this.task.mark_completed();
                return;
            }
            let used = this.timer.now() - start;
            if used >= this.budget {
                log::debug!("strand {} yielding after {}", this.task.id(), used);
                StrandRun::schedule(this);
                return;
            }
        }
    }

    fn schedule(this: &Rc<Self>) {
        let run = Rc::clone(this);
        let frame = this
            .frames
            .on_next_frame(Box::new(move |_| StrandRun::process(&run)));
        frame.forward_cancellation(&this.task);
        *this.frame.borrow_mut() = Some(frame);
    }
}

#[cfg(test)]
#[path = "tests/strand_tests.rs"]
mod tests;
