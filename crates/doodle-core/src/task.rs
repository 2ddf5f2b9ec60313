//! Cancelable handles for scheduled work.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use smallvec::SmallVec;

use crate::SchedulerError;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a [`Task`].
///
/// `Pending` is the only non-terminal state. A task leaves it exactly once:
/// to `Completed` when its work runs to the end, or to `Canceled` through
/// [`Task::cancel`]. `Rejected` is assigned at creation to work submitted
/// after the scheduler shut down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    Completed,
    Canceled,
    Rejected,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Pending)
    }
}

type CancelHook = Box<dyn FnOnce() + 'static>;

struct TaskCell {
    id: TaskId,
    state: Cell<TaskState>,
    on_cancel: RefCell<Option<CancelHook>>,
    waiters: RefCell<SmallVec<[Waker; 1]>>,
    dependents: RefCell<SmallVec<[Weak<TaskCell>; 1]>>,
}

impl TaskCell {
    fn new(state: TaskState) -> Self {
        Self {
            id: TaskId::next(),
            state: Cell::new(state),
            on_cancel: RefCell::new(None),
            waiters: RefCell::new(SmallVec::new()),
            dependents: RefCell::new(SmallVec::new()),
        }
    }

    fn wake_waiters(&self) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waker in waiters {
            waker.wake();
        }
    }
}

/// Handle to a unit of scheduled work.
///
/// Handles are cheap to clone and all clones observe the same state. The
/// scheduler only keeps a weak reference, so the caller decides the task's
/// fate; dropping every handle does not cancel the work, it only gives up the
/// ability to observe or cancel it.
#[derive(Clone)]
pub struct Task {
    cell: Rc<TaskCell>,
}

impl Task {
    /// Creates a task in the `Pending` state.
    ///
    /// Scheduler implementations pair it with their bookkeeping through
    /// [`Task::on_cancel`] and flip it with [`Task::mark_completed`] when the
    /// work has run.
    pub fn pending() -> Self {
        Self {
            cell: Rc::new(TaskCell::new(TaskState::Pending)),
        }
    }

    /// Creates a task that was refused because its scheduler shut down.
    pub fn rejected() -> Self {
        Self {
            cell: Rc::new(TaskCell::new(TaskState::Rejected)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    pub fn state(&self) -> TaskState {
        self.cell.state.get()
    }

    /// Returns `true` once the work ran to completion. Cancellation never sets
    /// this flag.
    pub fn completed(&self) -> bool {
        self.state() == TaskState::Completed
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == TaskState::Canceled
    }

    /// Returns `true` while the task is still pending.
    pub fn is_active(&self) -> bool {
        self.state() == TaskState::Pending
    }

    /// Cancels the task if it is still pending.
    ///
    /// Idempotent; canceling a completed, canceled or rejected task does
    /// nothing. Safe to call from inside the task's own callback.
    pub fn cancel(&self) {
        if self.state() != TaskState::Pending {
            return;
        }
        self.cell.state.set(TaskState::Canceled);
        log::trace!("task {} canceled", self.cell.id);

        let hook = self.cell.on_cancel.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }
        self.cell.wake_waiters();

        let dependents = std::mem::take(&mut *self.cell.dependents.borrow_mut());
        for dependent in dependents {
            if let Some(cell) = dependent.upgrade() {
                Task { cell }.cancel();
            }
        }
    }

    /// Moves a pending task to `Completed`, returning `false` if it had
    /// already reached a terminal state.
    pub fn mark_completed(&self) -> bool {
        if self.state() != TaskState::Pending {
            return false;
        }
        self.cell.state.set(TaskState::Completed);
        let hook = self.cell.on_cancel.borrow_mut().take();
        drop(hook);
        self.cell.dependents.borrow_mut().clear();
        self.cell.wake_waiters();
        true
    }

    /// Registers cleanup to run when the task is canceled.
    ///
    /// Hooks accumulate and run in registration order. A hook registered on a
    /// task that is already canceled or rejected runs immediately; one
    /// registered on a completed task is dropped.
    pub fn on_cancel(&self, hook: impl FnOnce() + 'static) {
        match self.state() {
            TaskState::Pending => {
                let mut slot = self.cell.on_cancel.borrow_mut();
                let combined: CancelHook = match slot.take() {
                    Some(previous) => Box::new(move || {
                        previous();
                        hook();
                    }),
                    None => Box::new(hook),
                };
                *slot = Some(combined);
            }
            TaskState::Canceled | TaskState::Rejected => hook(),
            TaskState::Completed => {}
        }
    }

    /// Cancels `dependent` whenever this task gets canceled.
    ///
    /// Composite tasks use this to hear about cancellation of the work they
    /// delegate to, for instance when the scheduler shuts down underneath
    /// them. Completion is not forwarded.
    pub fn forward_cancellation(&self, dependent: &Task) {
        match self.state() {
            TaskState::Pending => self
                .cell
                .dependents
                .borrow_mut()
                .push(Rc::downgrade(&dependent.cell)),
            TaskState::Canceled | TaskState::Rejected => dependent.cancel(),
            TaskState::Completed => {}
        }
    }

    /// Future resolving once the task reaches a terminal state.
    pub fn completion(&self) -> Completion {
        Completion { task: self.clone() }
    }

    pub fn downgrade(&self) -> WeakTask {
        WeakTask {
            cell: Rc::downgrade(&self.cell),
        }
    }

    fn register_waker(&self, waker: &Waker) {
        let mut waiters = self.cell.waiters.borrow_mut();
        if !waiters.iter().any(|existing| existing.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.cell.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning reference to a [`Task`], held by scheduler bookkeeping.
#[derive(Clone)]
pub struct WeakTask {
    cell: Weak<TaskCell>,
}

impl WeakTask {
    pub fn upgrade(&self) -> Option<Task> {
        self.cell.upgrade().map(|cell| Task { cell })
    }

    /// Returns `false` only when a live handle reports a terminal state.
    ///
    /// Work whose handles were all dropped keeps running.
    pub fn is_live(&self) -> bool {
        self.upgrade().map_or(true, |task| task.is_active())
    }
}

/// Resolves when a task reaches a terminal state.
///
/// Dropping this future leaves the task untouched.
#[must_use = "futures do nothing unless polled"]
pub struct Completion {
    task: Task,
}

impl Completion {
    pub fn task(&self) -> &Task {
        &self.task
    }
}

impl Future for Completion {
    type Output = Result<(), SchedulerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.task.state() {
            TaskState::Completed => Poll::Ready(Ok(())),
            TaskState::Canceled => Poll::Ready(Err(SchedulerError::Canceled)),
            TaskState::Rejected => Poll::Ready(Err(SchedulerError::ShutDown)),
            TaskState::Pending => {
                self.task.register_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}

/// A suspension point backed by a scheduled task.
///
/// Returned by [`Scheduler::delay`](crate::Scheduler::delay) and
/// [`Scheduler::delay_until`](crate::Scheduler::delay_until). Unlike
/// [`Completion`], dropping a `Delay` cancels the task behind it, so
/// abandoning an enclosing future tears down its pending timers.
#[must_use = "futures do nothing unless polled"]
pub struct Delay {
    completion: Completion,
}

impl Delay {
    pub fn new(task: Task) -> Self {
        Self {
            completion: task.completion(),
        }
    }

    pub fn task(&self) -> &Task {
        self.completion.task()
    }
}

impl From<Task> for Delay {
    fn from(task: Task) -> Self {
        Self::new(task)
    }
}

impl Future for Delay {
    type Output = Result<(), SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion).poll(cx)
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        self.completion.task.cancel();
    }
}

#[cfg(test)]
#[path = "tests/task_tests.rs"]
mod tests;
