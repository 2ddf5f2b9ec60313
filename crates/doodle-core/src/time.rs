//! Typed time quantities.
//!
//! Every scheduling API in doodle speaks [`Time`] rather than bare numbers so
//! that a value in seconds can never be mistaken for one in milliseconds.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::time::Duration;

const NANOS_PER_MILLI: f64 = 1_000_000.0;
const MILLIS_PER_SECOND: f64 = 1_000.0;

/// A duration or instant measured in milliseconds.
///
/// Instants are expressed relative to whatever origin their provider uses
/// (the Unix epoch for a [`Clock`](crate::Clock), an arbitrary process-local
/// origin for a [`Timer`](crate::Timer)). Differences between two instants
/// from the same provider are durations. Negative values are allowed so that
/// such differences never saturate silently.
#[derive(Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct Time {
    millis: f64,
}

impl Time {
    pub const ZERO: Time = Time { millis: 0.0 };

    pub const fn milliseconds(millis: f64) -> Self {
        Self { millis }
    }

    pub fn seconds(seconds: f64) -> Self {
        Self::milliseconds(seconds * MILLIS_PER_SECOND)
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self::milliseconds(nanos as f64 / NANOS_PER_MILLI)
    }

    pub fn as_millis(self) -> f64 {
        self.millis
    }

    pub fn as_seconds(self) -> f64 {
        self.millis / MILLIS_PER_SECOND
    }

    /// Whole nanoseconds, clamped to zero for negative values.
    pub fn as_nanos(self) -> u64 {
        if self.millis <= 0.0 {
            0
        } else {
            (self.millis * NANOS_PER_MILLI) as u64
        }
    }

    /// Converts to a [`Duration`], clamping negative values to zero.
    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.as_nanos())
    }

    pub fn is_positive(self) -> bool {
        self.millis > 0.0
    }

    pub fn max(self, other: Time) -> Time {
        if other.millis > self.millis {
            other
        } else {
            self
        }
    }

    pub fn min(self, other: Time) -> Time {
        if other.millis < self.millis {
            other
        } else {
            self
        }
    }

    /// Total ordering, with NaN sorted after every other value.
    pub fn total_cmp(&self, other: &Time) -> Ordering {
        self.millis.total_cmp(&other.millis)
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.millis)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.millis)
    }
}

impl From<Duration> for Time {
    fn from(duration: Duration) -> Self {
        Self::milliseconds(duration.as_nanos() as f64 / NANOS_PER_MILLI)
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Time {
        Time::milliseconds(self.millis + rhs.millis)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Time) {
        self.millis += rhs.millis;
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Time {
        Time::milliseconds(self.millis - rhs.millis)
    }
}

impl SubAssign for Time {
    fn sub_assign(&mut self, rhs: Time) {
        self.millis -= rhs.millis;
    }
}

impl Mul<f64> for Time {
    type Output = Time;

    fn mul(self, rhs: f64) -> Time {
        Time::milliseconds(self.millis * rhs)
    }
}

impl Mul<Time> for f64 {
    type Output = Time;

    fn mul(self, rhs: Time) -> Time {
        rhs * self
    }
}

impl Div<f64> for Time {
    type Output = Time;

    fn div(self, rhs: f64) -> Time {
        Time::milliseconds(self.millis / rhs)
    }
}

/// Ratio of two times.
impl Div for Time {
    type Output = f64;

    fn div(self, rhs: Time) -> f64 {
        self.millis / rhs.millis
    }
}

impl Neg for Time {
    type Output = Time;

    fn neg(self) -> Time {
        Time::milliseconds(-self.millis)
    }
}

impl Sum for Time {
    fn sum<I: Iterator<Item = Time>>(iter: I) -> Time {
        iter.fold(Time::ZERO, Add::add)
    }
}

#[cfg(test)]
#[path = "tests/time_tests.rs"]
mod tests;
