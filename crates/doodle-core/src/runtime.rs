use crate::collections::map::HashMap;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::debounce::DebounceQueue;
use crate::frame_clock::FrameClock;
use crate::platform::{HostDriver, Timer};
use crate::scheduler::{FrameJob, Job, Predicate, RepeatingJob};
use crate::strand::Strand;
use crate::{AnimationScheduler, Delay, RuntimeConfig, Scheduler, Task, TaskId, Time, WeakTask};

type UiMessage = Box<dyn FnOnce() + Send + 'static>;

struct UiDispatcherInner {
    driver: Arc<dyn HostDriver>,
    tx: mpsc::Sender<UiMessage>,
    pending: AtomicUsize,
}

impl UiDispatcherInner {
    fn new(driver: Arc<dyn HostDriver>, tx: mpsc::Sender<UiMessage>) -> Self {
        Self {
            driver,
            tx,
            pending: AtomicUsize::new(0),
        }
    }

    fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Box::new(task)).is_err() {
            // Receiver is gone with the runtime; nothing will drain the message.
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        self.driver.request_turn();
    }

    fn has_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }
}

struct PendingGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> PendingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        Self { counter }
    }
}

impl<'a> Drop for PendingGuard<'a> {
    fn drop(&mut self) {
        let previous = self.counter.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "UI dispatcher pending count underflowed");
    }
}

/// Thread-safe entry point for handing work to the runtime thread.
#[derive(Clone)]
pub struct UiDispatcher {
    inner: Arc<UiDispatcherInner>,
}

impl UiDispatcher {
    fn new(inner: Arc<UiDispatcherInner>) -> Self {
        Self { inner }
    }

    /// Queues `task` for the next turn on the runtime thread.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.post(task);
    }

    pub fn has_pending(&self) -> bool {
        self.inner.has_pending()
    }
}

/// Ids of spawned futures whose wakers fired since the last turn.
struct WakeQueue {
    driver: Arc<dyn HostDriver>,
    woken: Mutex<Vec<TaskId>>,
}

impl WakeQueue {
    fn push(&self, id: TaskId) {
        if let Ok(mut woken) = self.woken.lock() {
            if !woken.contains(&id) {
                woken.push(id);
            }
        }
        self.driver.request_turn();
    }

    fn take(&self) -> Vec<TaskId> {
        match self.woken.lock() {
            Ok(mut woken) => std::mem::take(&mut *woken),
            Err(_) => Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.woken.lock().map(|woken| woken.is_empty()).unwrap_or(true)
    }
}

struct SpawnedTaskWaker {
    id: TaskId,
    queue: Arc<WakeQueue>,
}

impl futures_task::ArcWake for SpawnedTaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.queue.push(arc_self.id);
    }
}

/// Position of a timer in the queue. Equal deadlines fire in submission order.
#[derive(Clone, Copy, Debug)]
struct TimerKey {
    deadline: Time,
    seq: u64,
}

impl PartialEq for TimerKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for TimerKey {}

impl PartialOrd for TimerKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .total_cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

enum TimerKind {
    Once(Job),
    Repeating { interval: Time, job: RepeatingJob },
}

struct TimerEntry {
    id: TaskId,
    task: WeakTask,
    started: Time,
    kind: TimerKind,
}

struct FrameCallbackEntry {
    id: TaskId,
    task: WeakTask,
    callback: FrameJob,
}

struct SpawnedEntry {
    task: WeakTask,
    future: Pin<Box<dyn Future<Output = ()> + 'static>>,
    waker: Waker,
}

struct RuntimeInner {
    driver: Arc<dyn HostDriver>,
    timer: Rc<dyn Timer>,
    config: RuntimeConfig,
    shut_down: Cell<bool>,
    needs_frame: Cell<bool>,
    timers: RefCell<BTreeMap<TimerKey, TimerEntry>>,
    timer_index: RefCell<HashMap<TaskId, TimerKey>>,
    next_seq: Cell<u64>,
    frame_callbacks: RefCell<VecDeque<FrameCallbackEntry>>,
    spawned: RefCell<HashMap<TaskId, SpawnedEntry>>,
    wake_queue: Arc<WakeQueue>,
    ui_dispatcher: Arc<UiDispatcherInner>,
    ui_rx: RefCell<mpsc::Receiver<UiMessage>>,
}

impl RuntimeInner {
    fn new(driver: Arc<dyn HostDriver>, timer: Rc<dyn Timer>, config: RuntimeConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let dispatcher = Arc::new(UiDispatcherInner::new(driver.clone(), tx));
        let wake_queue = Arc::new(WakeQueue {
            driver: driver.clone(),
            woken: Mutex::new(Vec::new()),
        });
        Self {
            driver,
            timer,
            config,
            shut_down: Cell::new(false),
            needs_frame: Cell::new(false),
            timers: RefCell::new(BTreeMap::new()),
            timer_index: RefCell::new(HashMap::default()),
            next_seq: Cell::new(0),
            frame_callbacks: RefCell::new(VecDeque::new()),
            spawned: RefCell::new(HashMap::default()),
            wake_queue,
            ui_dispatcher: dispatcher,
            ui_rx: RefCell::new(rx),
        }
    }

    fn next_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    fn insert_timer(&self, deadline: Time, entry: TimerEntry) {
        let key = TimerKey {
            deadline,
            seq: self.next_seq(),
        };
        self.timer_index.borrow_mut().insert(entry.id, key);
        self.timers.borrow_mut().insert(key, entry);
        self.driver.wake_at(deadline);
    }

    fn remove_timer(&self, id: TaskId) {
        let key = self.timer_index.borrow_mut().remove(&id);
        if let Some(key) = key {
            let entry = self.timers.borrow_mut().remove(&key);
            drop(entry);
        }
    }

    fn pop_due_timer(&self, now: Time, cutoff: u64) -> Option<TimerEntry> {
        let entry = {
            let mut timers = self.timers.borrow_mut();
            let key = timers
                .keys()
                .take_while(|key| key.deadline <= now)
                .find(|key| key.seq < cutoff)
                .copied()?;
            timers.remove(&key)?
        };
        self.timer_index.borrow_mut().remove(&entry.id);
        Some(entry)
    }

    fn run_timers(&self, now: Time, cutoff: u64) -> bool {
        let mut fired = false;
        while !self.shut_down.get() {
            let Some(entry) = self.pop_due_timer(now, cutoff) else {
                break;
            };
            fired = true;
            let elapsed = now - entry.started;
            match entry.kind {
                TimerKind::Once(job) => {
                    if let Some(task) = entry.task.upgrade() {
                        if !task.mark_completed() {
                            continue;
                        }
                    }
                    log::trace!("timer {} fired after {}", entry.id, elapsed);
                    job(elapsed);
                }
                TimerKind::Repeating { interval, mut job } => {
                    if !entry.task.is_live() {
                        continue;
                    }
                    log::trace!("repeating timer {} fired after {}", entry.id, elapsed);
                    job(elapsed);
                    if self.shut_down.get() {
                        // Shutdown ran inside the job and could not see this entry.
                        if let Some(task) = entry.task.upgrade() {
                            task.cancel();
                        }
                    } else if entry.task.is_live() {
                        self.insert_timer(
                            now + interval,
                            TimerEntry {
                                id: entry.id,
                                task: entry.task,
                                started: now,
                                kind: TimerKind::Repeating { interval, job },
                            },
                        );
                    }
                }
            }
        }
        fired
    }

    fn next_deadline(&self) -> Option<Time> {
        self.timers.borrow().keys().next().map(|key| key.deadline)
    }

    fn drain_ui(&self) -> bool {
        let mut executed = false;
        // Messages posted while draining wait for the next turn.
        let budget = self.ui_dispatcher.pending.load(Ordering::SeqCst);
        for _ in 0..budget {
            let message = self.ui_rx.borrow_mut().try_recv();
            let Ok(task) = message else {
                break;
            };
            let _guard = PendingGuard::new(&self.ui_dispatcher.pending);
            executed = true;
            if !self.shut_down.get() {
                task();
            }
        }
        executed
    }

    fn poll_spawned(&self) -> bool {
        let mut progressed = false;
        for id in self.wake_queue.take() {
            let entry = self.spawned.borrow_mut().remove(&id);
            let Some(mut entry) = entry else {
                continue;
            };
            if !entry.task.is_live() {
                continue;
            }
            progressed = true;
            let mut cx = Context::from_waker(&entry.waker);
            match entry.future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    log::trace!("spawned future {} finished", id);
                    if let Some(task) = entry.task.upgrade() {
                        task.mark_completed();
                    }
                }
                Poll::Pending => {
                    if self.shut_down.get() {
                        if let Some(task) = entry.task.upgrade() {
                            task.cancel();
                        }
                    } else if entry.task.is_live() {
                        self.spawned.borrow_mut().insert(id, entry);
                    }
                }
            }
        }
        progressed
    }

    fn remove_spawned(&self, id: TaskId) {
        let entry = self.spawned.borrow_mut().remove(&id);
        drop(entry);
    }

    fn run_turn(&self) -> bool {
        if self.shut_down.get() {
            return self.drain_ui();
        }
        let cutoff = self.next_seq.get();
        let now = self.timer.now();
        let mut progressed = self.drain_ui();
        progressed |= self.run_timers(now, cutoff);
        progressed |= self.poll_spawned();
        progressed
    }

    fn has_ready_work(&self) -> bool {
        if self.ui_dispatcher.has_pending() {
            return true;
        }
        if self.shut_down.get() {
            return false;
        }
        if !self.wake_queue.is_empty() {
            return true;
        }
        match self.next_deadline() {
            Some(deadline) => deadline <= self.timer.now(),
            None => false,
        }
    }

    fn push_frame_callback(&self, entry: FrameCallbackEntry) {
        self.frame_callbacks.borrow_mut().push_back(entry);
        self.needs_frame.set(true);
        self.driver.request_frame();
    }

    fn cancel_frame_callback(&self, id: TaskId) {
        let entry = {
            let mut callbacks = self.frame_callbacks.borrow_mut();
            let index = callbacks.iter().position(|entry| entry.id == id);
            let entry = index.and_then(|index| callbacks.remove(index));
            if callbacks.is_empty() {
                self.needs_frame.set(false);
            }
            entry
        };
        drop(entry);
    }

    fn drain_frame_callbacks(&self, frame_time: Time) {
        let pending: Vec<FrameCallbackEntry> = self.frame_callbacks.borrow_mut().drain(..).collect();
        let mut pending = pending.into_iter();
        while let Some(entry) = pending.next() {
            if self.shut_down.get() {
                for entry in std::iter::once(entry).chain(pending.by_ref()) {
                    if let Some(task) = entry.task.upgrade() {
                        task.cancel();
                    }
                }
                break;
            }
            if let Some(task) = entry.task.upgrade() {
                if !task.mark_completed() {
                    continue;
                }
            }
            (entry.callback)(frame_time);
        }
        let remaining = !self.frame_callbacks.borrow().is_empty();
        self.needs_frame.set(remaining);
    }

    fn shutdown(&self) {
        if self.shut_down.replace(true) {
            return;
        }
        let timers = std::mem::take(&mut *self.timers.borrow_mut());
        self.timer_index.borrow_mut().clear();
        let frames = std::mem::take(&mut *self.frame_callbacks.borrow_mut());
        let spawned = std::mem::take(&mut *self.spawned.borrow_mut());
        self.wake_queue.take();
        self.needs_frame.set(false);
        log::debug!(
            "runtime shutting down: {} timers, {} frame callbacks, {} futures",
            timers.len(),
            frames.len(),
            spawned.len()
        );

        let tasks = timers
            .into_values()
            .map(|entry| entry.task)
            .chain(frames.into_iter().map(|entry| entry.task))
            .chain(spawned.into_values().map(|entry| entry.task));
        for task in tasks {
            if let Some(task) = task.upgrade() {
                task.cancel();
            }
        }
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Single-threaded executor for timers, frame callbacks and spawned futures.
///
/// The runtime owns all scheduler bookkeeping. Work is submitted through a
/// [`RuntimeHandle`]; a host loop drives it by calling
/// [`RuntimeHandle::run_turn`] and [`RuntimeHandle::drain_frame_callbacks`].
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(driver: Arc<dyn HostDriver>, timer: Rc<dyn Timer>) -> Self {
        Self::with_config(driver, timer, RuntimeConfig::default())
    }

    pub fn with_config(
        driver: Arc<dyn HostDriver>,
        timer: Rc<dyn Timer>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(driver, timer, config)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Rc::downgrade(&self.inner),
            dispatcher: UiDispatcher::new(self.inner.ui_dispatcher.clone()),
            timer: self.inner.timer.clone(),
            config: self.inner.config,
        }
    }

    pub fn config(&self) -> RuntimeConfig {
        self.inner.config
    }

    pub fn needs_frame(&self) -> bool {
        self.inner.needs_frame.get()
    }

    pub fn frame_clock(&self) -> FrameClock {
        FrameClock::new(self.handle())
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

/// Non-owning access to a [`Runtime`].
///
/// Scheduling through a handle whose runtime was dropped yields rejected
/// tasks.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Weak<RuntimeInner>,
    dispatcher: UiDispatcher,
    timer: Rc<dyn Timer>,
    config: RuntimeConfig,
}

impl RuntimeHandle {
    /// Runs one scheduler turn: posted messages, then due timers, then woken
    /// futures. Returns `true` if any work ran.
    ///
    /// Work submitted during a turn is picked up by a later turn.
    pub fn run_turn(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.run_turn())
            .unwrap_or(false)
    }

    /// Returns `true` if calling [`RuntimeHandle::run_turn`] now would run
    /// something.
    pub fn has_ready_work(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.has_ready_work())
            .unwrap_or_else(|| self.dispatcher.has_pending())
    }

    /// Earliest pending timer deadline in the runtime's [`Timer`] time base.
    pub fn next_deadline(&self) -> Option<Time> {
        self.inner.upgrade().and_then(|inner| inner.next_deadline())
    }

    pub fn needs_frame(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.needs_frame.get())
            .unwrap_or(false)
    }

    /// Delivers a frame tick to every callback registered before the call.
    pub fn drain_frame_callbacks(&self, frame_time: Time) {
        if let Some(inner) = self.inner.upgrade() {
            inner.drain_frame_callbacks(frame_time);
        }
    }

    pub fn has_frame_callbacks(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| !inner.frame_callbacks.borrow().is_empty())
            .unwrap_or(false)
    }

    /// Number of timers still queued.
    pub fn scheduled_timers(&self) -> usize {
        self.inner
            .upgrade()
            .map(|inner| inner.timers.borrow().len())
            .unwrap_or(0)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.shut_down.get())
            .unwrap_or(true)
    }

    /// Drives `future` to completion on the runtime thread.
    ///
    /// The future is polled on the next turn and afterwards only when its
    /// waker fires. Canceling the returned task drops the future.
    pub fn spawn<F>(&self, future: F) -> Task
    where
        F: Future<Output = ()> + 'static,
    {
        let Some(inner) = self.live_inner("spawn") else {
            return Task::rejected();
        };
        let task = Task::pending();
        let id = task.id();
        let waker = futures_task::waker(Arc::new(SpawnedTaskWaker {
            id,
            queue: inner.wake_queue.clone(),
        }));
        inner.spawned.borrow_mut().insert(
            id,
            SpawnedEntry {
                task: task.downgrade(),
                future: Box::pin(future),
                waker,
            },
        );
        let weak = self.inner.clone();
        task.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_spawned(id);
            }
        });
        inner.wake_queue.push(id);
        task
    }

    pub fn dispatcher(&self) -> UiDispatcher {
        self.dispatcher.clone()
    }

    pub fn timer(&self) -> Rc<dyn Timer> {
        self.timer.clone()
    }

    pub fn config(&self) -> RuntimeConfig {
        self.config
    }

    pub fn frame_clock(&self) -> FrameClock {
        FrameClock::new(self.clone())
    }

    /// A [`Strand`] that yields to the next frame after the configured budget.
    pub fn strand(&self) -> Strand {
        Strand::new(self.frame_clock(), self.timer(), self.config.strand_budget)
    }

    pub fn debounce_queue(&self) -> DebounceQueue {
        DebounceQueue::new(self.clone(), self.config.debounce_budget)
    }

    pub(crate) fn register_frame_callback(&self, callback: FrameJob) -> Task {
        let Some(inner) = self.live_inner("frame callback") else {
            return Task::rejected();
        };
        let task = Task::pending();
        let id = task.id();
        inner.push_frame_callback(FrameCallbackEntry {
            id,
            task: task.downgrade(),
            callback,
        });
        let weak = self.inner.clone();
        task.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel_frame_callback(id);
            }
        });
        task
    }

    fn schedule_timer(&self, delay: Time, kind: TimerKind) -> Task {
        let Some(inner) = self.live_inner("timer") else {
            return Task::rejected();
        };
        let task = Task::pending();
        let id = task.id();
        let started = inner.timer.now();
        log::trace!("timer {} scheduled in {}", id, delay);
        inner.insert_timer(
            started + delay.max(Time::ZERO),
            TimerEntry {
                id,
                task: task.downgrade(),
                started,
                kind,
            },
        );
        let weak = self.inner.clone();
        task.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_timer(id);
            }
        });
        task
    }

    fn live_inner(&self, what: &str) -> Option<Rc<RuntimeInner>> {
        match self.inner.upgrade() {
            Some(inner) if !inner.shut_down.get() => Some(inner),
            Some(_) => {
                log::warn!("{what} rejected: scheduler has shut down");
                None
            }
            None => {
                log::warn!("{what} rejected: runtime is no longer alive");
                None
            }
        }
    }
}

impl Scheduler for RuntimeHandle {
    fn after(&self, time: Time, job: Job) -> Task {
        self.schedule_timer(time, TimerKind::Once(job))
    }

    fn every(&self, time: Time, job: RepeatingJob) -> Task {
        self.schedule_timer(
            time,
            TimerKind::Repeating {
                interval: time.max(Time::ZERO),
                job,
            },
        )
    }

    fn delay_until(&self, predicate: Predicate) -> Delay {
        if self.live_inner("delay_until").is_none() {
            return Delay::new(Task::rejected());
        }
        let outer = Task::pending();
        let wait = Rc::new(UntilWait {
            handle: self.clone(),
            predicate: RefCell::new(predicate),
            started: self.timer.now(),
            outer: outer.clone(),
            current: RefCell::new(None),
        });
        let weak_wait = Rc::downgrade(&wait);
        outer.on_cancel(move || {
            if let Some(wait) = weak_wait.upgrade() {
                let current = wait.current.borrow_mut().take();
                if let Some(check) = current {
                    check.cancel();
                }
            }
        });
        UntilWait::schedule_check(&wait);
        Delay::new(outer)
    }

    fn shutdown(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.shutdown();
        }
    }
}

impl AnimationScheduler for RuntimeHandle {
    fn on_next_frame(&self, job: FrameJob) -> Task {
        self.register_frame_callback(job)
    }
}

/// A `delay_until` wait: one scheduled check per turn until the predicate holds.
struct UntilWait {
    handle: RuntimeHandle,
    predicate: RefCell<Predicate>,
    started: Time,
    outer: Task,
    current: RefCell<Option<Task>>,
}

impl UntilWait {
    fn schedule_check(this: &Rc<Self>) {
        let wait = Rc::clone(this);
        let check = this
            .handle
            .after(Time::ZERO, Box::new(move |_| UntilWait::check(&wait)));
        check.forward_cancellation(&this.outer);
        *this.current.borrow_mut() = Some(check);
    }

    fn check(this: &Rc<Self>) {
        if !this.outer.is_active() {
            return;
        }
        let elapsed = this.handle.timer.now() - this.started;
        let satisfied = (this.predicate.borrow_mut())(elapsed);
        if satisfied {
            this.current.borrow_mut().take();
            this.outer.mark_completed();
        } else if this.outer.is_active() {
            UntilWait::schedule_check(this);
        }
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
