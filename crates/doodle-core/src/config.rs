use crate::Time;

/// Tunables for a [`Runtime`](crate::Runtime).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RuntimeConfig {
    /// Synthetic vsync period for hosts that have no display refresh signal.
    pub frame_interval: Time,
    /// Time a [`Strand`](crate::Strand) may run before yielding to the next frame.
    pub strand_budget: Time,
    /// Time a [`DebounceQueue`](crate::DebounceQueue) may block before yielding a turn.
    pub debounce_budget: Time,
    /// Upper bound on turns executed by a single "run until idle" pump.
    pub max_turns_per_pump: usize,
}

impl RuntimeConfig {
    pub const FRAME_DURATION: Time = Time::milliseconds(1000.0 / 60.0);
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_interval: Self::FRAME_DURATION,
            strand_budget: Self::FRAME_DURATION,
            debounce_budget: Time::milliseconds(4.0),
            max_turns_per_pump: 1024,
        }
    }
}
