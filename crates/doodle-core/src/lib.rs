#![doc = r"Time and scheduling core for the doodle UI toolkit."]

pub extern crate self as doodle_core;

mod collections;
pub mod config;
pub mod debounce;
mod error;
pub mod frame_clock;
pub mod platform;
pub mod runtime;
pub mod scheduler;
pub mod strand;
pub mod task;
pub mod time;

pub use config::RuntimeConfig;
pub use debounce::DebounceQueue;
pub use error::SchedulerError;
pub use frame_clock::{FrameClock, NextFrame};
pub use platform::{Clock, DefaultDriver, HostDriver, Timer};
pub use runtime::{Runtime, RuntimeHandle, UiDispatcher};
pub use scheduler::{AnimationScheduler, FrameJob, Job, Predicate, RepeatingJob, Scheduler};
pub use strand::{Strand, StrandJob};
pub use task::{Completion, Delay, Task, TaskId, TaskState, WeakTask};
pub use time::Time;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
