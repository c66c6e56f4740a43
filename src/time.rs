// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Musical time. [Tstamp] is the universal unit of score time: an exact
//! rational count of beats, with a sub-beat remainder expressed in a
//! divisor-rich fixed denominator. [Tempo] relates beats to wall-clock
//! seconds, and from there to frames.

use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
};

/// Quick imports for time arithmetic.
pub mod prelude {
    pub use super::{Tempo, Tstamp};
}

/// [Tstamp] is exact rational musical time: `beats + rem / BEAT`.
///
/// The remainder denominator is divisor-rich (2^7 × 3^4 × 5 × 7 × 11 × 13 ×
/// 17), so that common tuplets divide a beat exactly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(i64, i32)", into = "(i64, i32)")]
pub struct Tstamp {
    beats: i64,
    rem: i32,
}

impl Tstamp {
    /// Sub-beat positions per beat.
    pub const BEAT: i32 = 882_161_280;

    /// Zero time.
    pub const ZERO: Tstamp = Tstamp { beats: 0, rem: 0 };

    /// Creates a new [Tstamp]. `rem` may be any value; it is normalized into
    /// `[0, BEAT)` by carrying into `beats`.
    pub fn new(beats: i64, rem: i64) -> Self {
        let mut beats = beats + rem.div_euclid(Self::BEAT as i64);
        let mut rem = rem.rem_euclid(Self::BEAT as i64) as i32;
        // rem_euclid() already guarantees the invariant; this guards against
        // a negative-zero style edge when rem == BEAT exactly.
        if rem >= Self::BEAT {
            beats += 1;
            rem -= Self::BEAT;
        }
        Self { beats, rem }
    }

    /// The whole-beat part.
    pub fn beats(&self) -> i64 {
        self.beats
    }

    /// The sub-beat remainder, in `[0, BEAT)`.
    pub fn rem(&self) -> i32 {
        self.rem
    }

    #[allow(missing_docs)]
    pub fn is_zero(&self) -> bool {
        self.beats == 0 && self.rem == 0
    }

    /// This time as a floating-point count of beats. Exact only within f64
    /// precision; use for frame conversion, never for score comparisons.
    pub fn to_beats_f64(&self) -> f64 {
        self.beats as f64 + self.rem as f64 / Self::BEAT as f64
    }

    /// The largest [Tstamp] not exceeding `beats` (floor on the remainder
    /// grid). Negative inputs floor toward negative infinity.
    pub fn from_beats_f64(beats: f64) -> Self {
        let whole = beats.floor();
        let rem = ((beats - whole) * Self::BEAT as f64).floor() as i64;
        Self::new(whole as i64, rem)
    }

    /// Frames spanned by this duration at the given tempo and rate.
    pub fn to_frames(&self, tempo: Tempo, rate: crate::types::AudioRate) -> f64 {
        self.to_beats_f64() * 60.0 / tempo.value() * rate.value()
    }

    /// The longest duration renderable within `frames` frames at the given
    /// tempo and rate, floored to the remainder grid.
    pub fn from_frames(frames: f64, tempo: Tempo, rate: crate::types::AudioRate) -> Self {
        Self::from_beats_f64(frames / rate.value() * tempo.value() / 60.0)
    }
}

impl fmt::Display for Tstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.beats, self.rem)
    }
}
impl From<(i64, i32)> for Tstamp {
    fn from(value: (i64, i32)) -> Self {
        Self::new(value.0, value.1 as i64)
    }
}
impl From<Tstamp> for (i64, i32) {
    fn from(value: Tstamp) -> Self {
        (value.beats, value.rem)
    }
}
impl PartialOrd for Tstamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Tstamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.beats
            .cmp(&other.beats)
            .then(self.rem.cmp(&other.rem))
    }
}
impl Add for Tstamp {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.beats + rhs.beats, self.rem as i64 + rhs.rem as i64)
    }
}
impl AddAssign for Tstamp {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl Sub for Tstamp {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.beats - rhs.beats, self.rem as i64 - rhs.rem as i64)
    }
}
impl SubAssign for Tstamp {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

/// Beats per minute. The playable range is bounded; the constructor clamps
/// nothing, so out-of-range values must be rejected where scores are loaded.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Tempo(pub f64);
impl Tempo {
    /// Smallest playable tempo.
    pub const MIN: Tempo = Tempo(1.0);
    /// Largest playable tempo.
    pub const MAX: Tempo = Tempo(999.0);

    /// The raw BPM value.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Beats per second.
    pub fn bps(&self) -> f64 {
        self.0 / 60.0
    }

    /// Whether this tempo is in the playable range.
    pub fn is_valid(&self) -> bool {
        crate::types::limits::TEMPO_RANGE.contains(&self.0)
    }
}
impl Default for Tempo {
    fn default() -> Self {
        Self(120.0)
    }
}
impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0.2} BPM", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioRate;
    use float_cmp::approx_eq;
    use more_asserts::{assert_gt, assert_lt};

    #[test]
    fn tstamp_normalizes() {
        assert_eq!(Tstamp::new(1, 0), Tstamp::new(0, Tstamp::BEAT as i64));
        assert_eq!(
            Tstamp::new(2, -1),
            Tstamp::new(1, Tstamp::BEAT as i64 - 1),
            "negative remainders should borrow from beats"
        );
        assert_eq!(Tstamp::new(0, (Tstamp::BEAT as i64) * 3 + 7), Tstamp::new(3, 7));
    }

    #[test]
    fn tstamp_arithmetic_and_ordering() {
        let a = Tstamp::new(1, 100);
        let b = Tstamp::new(0, Tstamp::BEAT as i64 - 50);
        assert_eq!(a + b, Tstamp::new(2, 50));
        assert_eq!(a - b, Tstamp::new(0, 150));
        assert_lt!(b, a);
        assert_gt!(a + b, a);
        assert_eq!(a - a, Tstamp::ZERO);
    }

    #[test]
    fn tstamp_frame_conversion_round_trips() {
        let rate = AudioRate::default();
        let tempo = Tempo(120.0);

        // One beat at 120 BPM is half a second.
        let frames = Tstamp::new(1, 0).to_frames(tempo, rate);
        assert!(approx_eq!(f64, frames, 24000.0, epsilon = 1e-6));

        let ts = Tstamp::from_frames(24000.0, tempo, rate);
        assert_eq!(ts.beats(), 1);
        assert_lt!(ts.rem(), 2, "round trip should land within a unit of exact");

        // from_frames() never overshoots what the frames can cover.
        for frames in [1.0, 17.0, 999.0, 48000.0] {
            let ts = Tstamp::from_frames(frames, tempo, rate);
            assert!(ts.to_frames(tempo, rate) <= frames + 1e-6);
        }
    }

    #[test]
    fn tstamp_serde_is_a_pair() {
        let ts = Tstamp::new(3, 12345);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "[3,12345]");
        let back: Tstamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn tempo_range() {
        assert!(Tempo(120.0).is_valid());
        assert!(Tempo::MIN.is_valid());
        assert!(Tempo::MAX.is_valid());
        assert!(!Tempo(0.5).is_valid());
        assert!(!Tempo(1000.0).is_valid());
        assert_eq!(Tempo(120.0).bps(), 2.0);
    }
}
