//! Fixed-point simulation time
//!
//! Floating-point accumulation can produce different results across CPU
//! architectures and compiler optimizations, which is fatal for a simulation
//! that must stay bit-identical between peers. `SimTime` stores durations as
//! an integer count of microseconds so that all cross-peer time arithmetic
//! is exact; real-time seconds only appear at the edges (frame deltas coming
//! in from the host, delta seconds handed to the user update function).

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A simulation-time duration with microsecond resolution.
///
/// # Example
///
/// ```
/// use veles_core::SimTime;
///
/// let frame = SimTime::from_seconds(1.0 / 60.0);
/// let two_frames = frame + frame;
/// assert_eq!(two_frames.as_micros(), 2 * frame.as_micros());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct SimTime(i64);

impl SimTime {
    pub const ZERO: Self = Self(0);

    const MICROS_PER_SECOND: i64 = 1_000_000;

    /// Creates a duration from a raw microsecond count.
    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Returns the raw microsecond count.
    #[inline]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Converts real-time seconds into simulation time.
    ///
    /// This is the lossy edge of the fixed-point boundary: once converted,
    /// all further arithmetic is exact.
    #[inline]
    pub fn from_seconds(seconds: f32) -> Self {
        Self((seconds as f64 * Self::MICROS_PER_SECOND as f64) as i64)
    }

    /// Converts back to real-time seconds for presentation and for the user
    /// update function.
    #[inline]
    pub fn to_real_time_seconds(self) -> f32 {
        (self.0 as f64 / Self::MICROS_PER_SECOND as f64) as f32
    }

    /// True for durations strictly greater than zero.
    #[inline]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }
}

impl Add for SimTime {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for SimTime {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for SimTime {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for SimTime {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for SimTime {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for SimTime {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, t| acc + t)
    }
}
