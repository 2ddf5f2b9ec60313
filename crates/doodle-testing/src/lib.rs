//! Testing utilities and virtual-time harness for doodle

pub mod testing;

pub use testing::*;

pub mod prelude {
    pub use crate::testing::*;
    pub use doodle_core::{AnimationScheduler, Scheduler, Task, TaskState, Time};
}
