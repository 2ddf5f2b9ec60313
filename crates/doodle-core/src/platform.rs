//! Platform abstraction traits for doodle's time services.
//!
//! These traits let the runtime delegate wake-ups and time measurement to the
//! host platform, so the same scheduler runs on a desktop event loop, inside a
//! browser, or against a virtual clock in tests.

use crate::Time;

/// Hook through which the runtime asks its host for attention.
///
/// Implementations are called from the runtime thread when work is queued and
/// from arbitrary threads when a waker fires or a dispatcher message is
/// posted, so they must be safe to use from multiple threads. They should only
/// record the request and wake the host loop; the host then pumps the runtime
/// on its own thread.
pub trait HostDriver: Send + Sync {
    /// Request that the host deliver a frame tick.
    fn request_frame(&self);

    /// Request a scheduler turn as soon as possible.
    fn request_turn(&self);

    /// Tell the host that a timer is due at `deadline`, expressed in the
    /// runtime's [`Timer`] time base.
    ///
    /// Hosts that recompute their wait from
    /// [`RuntimeHandle::next_deadline`](crate::RuntimeHandle::next_deadline)
    /// after every turn can rely on the default, which just asks for a turn.
    fn wake_at(&self, deadline: Time) {
        let _ = deadline;
        self.request_turn();
    }
}

/// Wall-clock time source.
///
/// The value may jump backwards or forwards when the system clock is
/// adjusted. Use a [`Timer`] for measuring elapsed time.
pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn epoch(&self) -> Time;
}

/// Monotonic, high-resolution elapsed-time source.
///
/// Successive calls to [`Timer::now`] never decrease within a process.
pub trait Timer {
    fn now(&self) -> Time;
}

impl<T: Clock + ?Sized> Clock for std::rc::Rc<T> {
    fn epoch(&self) -> Time {
        (**self).epoch()
    }
}

impl<T: Timer + ?Sized> Timer for std::rc::Rc<T> {
    fn now(&self) -> Time {
        (**self).now()
    }
}

/// Driver for hosts that poll the runtime unconditionally.
#[derive(Default)]
pub struct DefaultDriver;

impl HostDriver for DefaultDriver {
    fn request_frame(&self) {}

    fn request_turn(&self) {}
}
