use std::fmt;

/// Why awaited scheduler work did not complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchedulerError {
    /// The task was canceled before it could complete, either explicitly or
    /// because the scheduler shut down while it was pending.
    Canceled,
    /// The work was requested after the scheduler had already shut down.
    ShutDown,
    /// The runtime backing a handle has been dropped.
    RuntimeDropped,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Canceled => write!(f, "task was canceled before completing"),
            SchedulerError::ShutDown => write!(f, "scheduler has shut down"),
            SchedulerError::RuntimeDropped => write!(f, "runtime is no longer alive"),
        }
    }
}

impl std::error::Error for SchedulerError {}
