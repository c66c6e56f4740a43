// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    composition::PatInstRef,
    time::{Tempo, Tstamp},
};
use rustc_hash::FxHashMap;

/// What the sequencer is currently walking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    /// Not advancing; renders return zero frames.
    #[default]
    Stopped,
    /// Looping a single pattern instance.
    Pattern,
    /// Playing one song to its end.
    Song,
    /// Walking the whole track list.
    Module,
}

/// The sequencer's position in the score.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Position {
    #[allow(missing_docs)]
    pub track: usize,
    #[allow(missing_docs)]
    pub system: usize,
    /// The pattern instance the position is inside.
    pub piref: PatInstRef,
    /// Row position within the pattern.
    pub row: Tstamp,
}

/// An in-flight linear slide of some master quantity.
#[derive(Clone, Copy, Debug)]
pub struct Slide {
    #[allow(missing_docs)]
    pub start: f64,
    #[allow(missing_docs)]
    pub target: f64,
    #[allow(missing_docs)]
    pub length: Tstamp,
    #[allow(missing_docs)]
    pub elapsed: Tstamp,
}
impl Slide {
    /// The interpolated value at the current elapsed time.
    pub fn value(&self) -> f64 {
        let length = self.length.to_beats_f64();
        if length <= 0.0 {
            return self.target;
        }
        let ratio = (self.elapsed.to_beats_f64() / length).clamp(0.0, 1.0);
        self.start + (self.target - self.start) * ratio
    }

    #[allow(missing_docs)]
    pub fn is_done(&self) -> bool {
        self.elapsed >= self.length
    }
}

/// Identity of one `jump` trigger occurrence; its countdown lives in the
/// jump-context table under this key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JumpKey {
    #[allow(missing_docs)]
    pub piref: PatInstRef,
    #[allow(missing_docs)]
    pub row: Tstamp,
    #[allow(missing_docs)]
    pub channel: usize,
    /// Index of the trigger within its (channel, row).
    pub order: u32,
}

/// A goto requested by the score, performed at the next row boundary.
#[derive(Clone, Copy, Debug)]
pub enum GotoTarget {
    /// A jump to a pattern instance and row.
    Score {
        #[allow(missing_docs)]
        piref: PatInstRef,
        #[allow(missing_docs)]
        row: Tstamp,
    },
    /// Switch to looping a single pattern.
    Pattern(PatInstRef),
}

/// Sequencer-global runtime state.
#[derive(Debug, Default)]
pub struct MasterParams {
    #[allow(missing_docs)]
    pub playback: PlaybackState,
    #[allow(missing_docs)]
    pub is_paused: bool,
    #[allow(missing_docs)]
    pub pos: Position,

    #[allow(missing_docs)]
    pub tempo: Tempo,
    #[allow(missing_docs)]
    pub tempo_slide: Option<Slide>,
    /// Length applied by the next `slide_tempo`.
    pub tempo_slide_length: Tstamp,

    /// Master volume in dB.
    pub volume: f64,
    #[allow(missing_docs)]
    pub volume_slide: Option<Slide>,
    #[allow(missing_docs)]
    pub volume_slide_length: Tstamp,

    /// Remaining pattern delay; rows don't advance while this is nonzero.
    pub pattern_delay: Tstamp,

    /// Jump parameters staged by `set_jump_*`, consumed by `jump`.
    pub jump_row: Tstamp,
    #[allow(missing_docs)]
    pub jump_piref: Option<PatInstRef>,
    #[allow(missing_docs)]
    pub jump_counter: i32,
    /// Remaining executions per jump-trigger occurrence.
    pub jump_contexts: FxHashMap<JumpKey, i32>,

    #[allow(missing_docs)]
    pub pending_goto: Option<GotoTarget>,
    /// Loop at the end of the module instead of stopping.
    pub infinite: bool,

    /// Sub-frame remainder of the frame/time conversion, kept so cumulative
    /// frame counts stay drift-free across segments.
    pub frame_frac: f64,

    /// Environment variables set by control events.
    pub env: FxHashMap<String, f64>,
}

impl MasterParams {
    /// Tempo slides update at this sub-beat step, making the slide
    /// piecewise affine in frames.
    pub fn slide_step() -> Tstamp {
        Tstamp::new(0, (Tstamp::BEAT / 24) as i64)
    }

    /// Back to start-of-playback defaults. The infinite flag is host policy
    /// and survives.
    pub fn reset(&mut self) {
        let infinite = self.infinite;
        *self = Self {
            infinite,
            ..Self::default()
        };
    }

    /// The master gain as a linear factor.
    pub fn gain(&self) -> f64 {
        10f64.powf(self.volume / 20.0)
    }

    /// Distance to the next slide-update boundary, if a slide is running.
    pub fn next_slide_boundary(&self) -> Option<Tstamp> {
        let step = Self::slide_step();
        let step_units = step.rem() as i128;
        let mut nearest: Option<Tstamp> = None;
        for slide in [self.tempo_slide.as_ref(), self.volume_slide.as_ref()]
            .into_iter()
            .flatten()
        {
            let elapsed_units =
                slide.elapsed.beats() as i128 * Tstamp::BEAT as i128 + slide.elapsed.rem() as i128;
            let into_step = elapsed_units % step_units;
            let to_boundary = Tstamp::new(0, (step_units - into_step) as i64);
            let remaining = slide.length - slide.elapsed;
            let dist = to_boundary.min(remaining);
            if !dist.is_zero() {
                nearest = Some(nearest.map_or(dist, |n: Tstamp| n.min(dist)));
            }
        }
        nearest
    }

    /// Advances slide clocks by `dist` and applies the stepwise updates.
    pub fn advance_slides(&mut self, dist: Tstamp) {
        if let Some(slide) = &mut self.tempo_slide {
            slide.elapsed += dist;
            self.tempo = Tempo(slide.value());
            if slide.is_done() {
                self.tempo = Tempo(slide.target);
                self.tempo_slide = None;
            }
        }
        if let Some(slide) = &mut self.volume_slide {
            slide.elapsed += dist;
            self.volume = slide.value();
            if slide.is_done() {
                self.volume = slide.target;
                self.volume_slide = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn slide_interpolates_linearly() {
        let slide = Slide {
            start: 60.0,
            target: 120.0,
            length: Tstamp::new(2, 0),
            elapsed: Tstamp::new(1, 0),
        };
        assert!(approx_eq!(f64, slide.value(), 90.0));
        assert!(!slide.is_done());
    }

    #[test]
    fn zero_length_slide_jumps_to_target() {
        let slide = Slide {
            start: 60.0,
            target: 120.0,
            length: Tstamp::ZERO,
            elapsed: Tstamp::ZERO,
        };
        assert_eq!(slide.value(), 120.0);
        assert!(slide.is_done());
    }

    #[test]
    fn advance_finishes_a_slide_exactly() {
        let mut master = MasterParams {
            tempo: Tempo(60.0),
            tempo_slide: Some(Slide {
                start: 60.0,
                target: 120.0,
                length: Tstamp::new(2, 0),
                elapsed: Tstamp::ZERO,
            }),
            ..MasterParams::default()
        };
        master.advance_slides(Tstamp::new(1, 0));
        assert!(approx_eq!(f64, master.tempo.value(), 90.0));
        master.advance_slides(Tstamp::new(1, 0));
        assert_eq!(master.tempo.value(), 120.0);
        assert!(master.tempo_slide.is_none());
    }

    #[test]
    fn slide_boundaries_step_at_twenty_fourths() {
        let master = MasterParams {
            tempo_slide: Some(Slide {
                start: 60.0,
                target: 120.0,
                length: Tstamp::new(2, 0),
                elapsed: Tstamp::ZERO,
            }),
            ..MasterParams::default()
        };
        let boundary = master.next_slide_boundary().unwrap();
        assert_eq!(boundary, MasterParams::slide_step());
    }

    #[test]
    fn reset_preserves_infinite_mode() {
        let mut master = MasterParams {
            infinite: true,
            volume: -6.0,
            ..MasterParams::default()
        };
        master.reset();
        assert!(master.infinite);
        assert_eq!(master.volume, 0.0);
        assert_eq!(master.playback, PlaybackState::Stopped);
    }

    #[test]
    fn master_gain_is_unity_at_zero_db() {
        let master = MasterParams::default();
        assert!(approx_eq!(f64, master.gain(), 1.0));
    }
}
