use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::platform::Timer;
use crate::runtime::RuntimeHandle;
use crate::{Scheduler, Task, Time};

type Event = Box<dyn FnOnce() + 'static>;

/// FIFO event queue drained on scheduler turns.
///
/// A drain gives control back to the host once it has been running longer
/// than its budget, leaving the rest of the queue for a fresh turn so input
/// bursts cannot starve frames.
#[derive(Clone)]
pub struct DebounceQueue {
    inner: Rc<DebounceInner>,
}

struct DebounceInner {
    handle: RuntimeHandle,
    timer: Rc<dyn Timer>,
    budget: Time,
    events: RefCell<VecDeque<Event>>,
    turn: RefCell<Option<Task>>,
    canceled: Cell<bool>,
}

impl DebounceQueue {
    pub fn new(handle: RuntimeHandle, budget: Time) -> Self {
        let timer = handle.timer();
        Self {
            inner: Rc::new(DebounceInner {
                handle,
                timer,
                budget,
                events: RefCell::new(VecDeque::new()),
                turn: RefCell::new(None),
                canceled: Cell::new(false),
            }),
        }
    }

    pub fn post(&self, event: impl FnOnce() + 'static) {
        if self.inner.canceled.get() {
            log::trace!("debounce queue canceled; dropping event");
            return;
        }
        self.inner.events.borrow_mut().push_back(Box::new(event));
        DebounceInner::ensure_turn(&self.inner);
    }

    /// Drops every queued event and ignores later posts.
    pub fn cancel(&self) {
        if self.inner.canceled.replace(true) {
            return;
        }
        let events = std::mem::take(&mut *self.inner.events.borrow_mut());
        log::debug!("debounce queue canceled with {} events queued", events.len());
        drop(events);
        let turn = self.inner.turn.borrow_mut().take();
        if let Some(turn) = turn {
            turn.cancel();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.get()
    }

    pub fn len(&self) -> usize {
        self.inner.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.events.borrow().is_empty()
    }
}

impl DebounceInner {
    fn ensure_turn(this: &Rc<Self>) {
        let scheduled = this
            .turn
            .borrow()
            .as_ref()
            .is_some_and(|turn| turn.is_active());
        if scheduled {
            return;
        }
        let inner = Rc::clone(this);
        let turn = this
            .handle
            .now(Box::new(move |_| DebounceInner::drain(&inner)));
        if !turn.is_active() {
            // Scheduler is gone; queued events can never run.
            let events = std::mem::take(&mut *this.events.borrow_mut());
            drop(events);
            return;
        }
        *this.turn.borrow_mut() = Some(turn);
    }

    fn drain(this: &Rc<Self>) {
        this.turn.borrow_mut().take();
        let start = this.timer.now();
        loop {
            if this.canceled.get() {
                return;
            }
            let event = this.events.borrow_mut().pop_front();
            let Some(event) = event else {
                return;
            };
            event();
            if this.canceled.get() || this.events.borrow().is_empty() {
                return;
            }
            // At least one event runs per drain, whatever the budget.
            let used = this.timer.now() - start;
            if used >= this.budget {
                log::trace!("debounce queue yielding after {}", used);
                DebounceInner::ensure_turn(this);
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/debounce_tests.rs"]
mod tests;
