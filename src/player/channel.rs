// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    composition::ChannelDefaults,
    events::CondState,
    time::Tstamp,
    types::AudioRate,
    voices::VoiceParams,
};
use rustc_hash::FxHashMap;

/// A value that can glide linearly to a target over a frame count.
#[derive(Clone, Debug, Default)]
pub struct Slider {
    current: f64,
    target: f64,
    step: f64,
    frames_left: u64,
}

impl Slider {
    /// A slider resting at `value`.
    pub fn new(value: f64) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            frames_left: 0,
        }
    }

    /// Jumps immediately, cancelling any slide.
    pub fn set(&mut self, value: f64) {
        self.current = value;
        self.target = value;
        self.frames_left = 0;
    }

    /// Starts a linear slide to `target` over `frames` frames.
    pub fn start(&mut self, target: f64, frames: f64) {
        if frames < 1.0 {
            self.set(target);
            return;
        }
        self.target = target;
        self.frames_left = frames as u64;
        self.step = (target - self.current) / frames;
    }

    /// The current value.
    pub fn value(&self) -> f64 {
        self.current
    }

    /// The value this slider will have after `frames` more frames.
    pub fn value_after(&self, frames: usize) -> f64 {
        let n = (frames as u64).min(self.frames_left);
        if n == self.frames_left {
            // Slides land exactly on the target, never on float residue.
            if self.frames_left > 0 {
                self.target
            } else {
                self.current
            }
        } else {
            self.current + self.step * n as f64
        }
    }

    /// Moves time forward by `frames` frames.
    pub fn advance(&mut self, frames: usize) {
        self.current = self.value_after(frames);
        self.frames_left = self.frames_left.saturating_sub(frames as u64);
    }
}

/// A low-frequency oscillator for vibrato and tremolo.
#[derive(Clone, Debug, Default)]
pub struct Lfo {
    /// Oscillation speed in Hz.
    pub speed: f64,
    /// Peak deviation; unit depends on what the LFO drives.
    pub depth: f64,
    phase: f64,
    /// Frames before the oscillation engages.
    delay_frames: f64,
}

impl Lfo {
    /// The current deviation. Zero while the onset delay is running.
    pub fn value(&self) -> f64 {
        if self.depth == 0.0 || self.delay_frames > 0.0 {
            0.0
        } else {
            (self.phase * std::f64::consts::TAU).sin() * self.depth
        }
    }

    /// Sets the onset delay.
    pub fn set_delay(&mut self, frames: f64) {
        self.delay_frames = frames.max(0.0);
    }

    /// Moves the phase forward by `frames` frames.
    pub fn advance(&mut self, frames: usize, rate: AudioRate) {
        if self.delay_frames > 0.0 {
            self.delay_frames -= frames as f64;
            return;
        }
        if self.speed > 0.0 && self.depth != 0.0 {
            self.phase += self.speed * frames as f64 / rate.value();
            self.phase -= self.phase.floor();
        }
    }
}

/// Arpeggio state: alternates the sounding pitch between the played note
/// and a companion note.
#[derive(Clone, Debug)]
pub struct Arpeggio {
    #[allow(missing_docs)]
    pub active: bool,
    /// The companion pitch.
    pub alt_pitch: f64,
    /// Toggles per second.
    pub speed: f64,
    phase: f64,
}
impl Default for Arpeggio {
    fn default() -> Self {
        Self {
            active: false,
            alt_pitch: 0.0,
            speed: 24.0,
            phase: 0.0,
        }
    }
}
impl Arpeggio {
    fn offset(&self, base_pitch: f64) -> f64 {
        if self.active && self.phase.fract() >= 0.5 {
            self.alt_pitch - base_pitch
        } else {
            0.0
        }
    }

    fn advance(&mut self, frames: usize, rate: AudioRate) {
        if self.active {
            self.phase += self.speed * frames as f64 / rate.value();
            self.phase -= self.phase.floor();
        }
    }
}

/// Per-channel runtime state. One exists for every channel regardless of
/// whether the score uses it; reset brings it back to the module's channel
/// defaults.
#[derive(Debug)]
pub struct Channel {
    #[allow(missing_docs)]
    pub index: usize,
    /// The audio unit notes on this channel play into.
    pub au_input: usize,
    /// The foreground voice group, if a note is held.
    pub fg_group: Option<u64>,
    /// Generation-checked handles to the foreground group's slots.
    pub fg_slots: Vec<(u32, u64)>,
    /// Pitch of the most recent note-on.
    pub base_pitch: f64,

    /// Force in dB.
    pub force: Slider,
    /// Panning in [-1, 1].
    pub panning: Slider,
    /// Length applied by the next `slide_force`.
    pub force_slide_length: Tstamp,
    #[allow(missing_docs)]
    pub pan_slide_length: Tstamp,

    #[allow(missing_docs)]
    pub arpeggio: Arpeggio,
    /// Vibrato depth is in semitones.
    pub vibrato: Lfo,
    /// Tremolo depth is in dB.
    pub tremolo: Lfo,

    #[allow(missing_docs)]
    pub cond: CondState,
    /// Active-name slot for control variables.
    pub cv_name: Option<String>,
    /// Active-name slot for streams.
    pub stream_name: Option<String>,
    /// Active-name slot for environment variables.
    pub env_name: Option<String>,
    /// Default expression, from the channel defaults.
    pub expression: Option<String>,
    /// Stream values, keyed by name.
    pub streams: FxHashMap<String, f64>,

    #[allow(missing_docs)]
    pub rng: oorandom::Rand64,
}

impl Channel {
    /// A channel in its power-on state.
    pub fn new(index: usize) -> Self {
        let mut channel = Self {
            index,
            au_input: 0,
            fg_group: None,
            fg_slots: Vec::with_capacity(crate::types::limits::PROCESSORS_MAX),
            base_pitch: 69.0,
            force: Slider::new(0.0),
            panning: Slider::new(0.0),
            force_slide_length: Tstamp::ZERO,
            pan_slide_length: Tstamp::ZERO,
            arpeggio: Arpeggio::default(),
            vibrato: Lfo::default(),
            tremolo: Lfo::default(),
            cond: CondState::default(),
            cv_name: None,
            stream_name: None,
            env_name: None,
            expression: None,
            streams: FxHashMap::default(),
            rng: oorandom::Rand64::new(0),
        };
        channel.reset(&ChannelDefaults::default(), 0);
        channel
    }

    /// Back to the module's defaults. `seed` keeps channel randomness
    /// deterministic per playback run.
    pub fn reset(&mut self, defaults: &ChannelDefaults, seed: u64) {
        self.au_input = defaults.au_input;
        self.expression = defaults.expression.clone();
        self.fg_group = None;
        self.fg_slots.clear();
        self.base_pitch = 69.0;
        self.force = Slider::new(0.0);
        self.panning = Slider::new(0.0);
        self.force_slide_length = Tstamp::ZERO;
        self.pan_slide_length = Tstamp::ZERO;
        self.arpeggio = Arpeggio::default();
        self.vibrato = Lfo::default();
        self.tremolo = Lfo::default();
        self.cond.reset();
        self.cv_name = None;
        self.stream_name = None;
        self.env_name = None;
        self.streams.clear();
        self.rng = oorandom::Rand64::new(((self.index as u128) << 64) | seed as u128);
    }

    /// The expression parameters for the next `frames` frames, as a ramp
    /// from the current slider values to where they will be afterwards.
    pub fn voice_params(&self, frames: usize) -> VoiceParams {
        let pitch =
            self.base_pitch + self.arpeggio.offset(self.base_pitch) + self.vibrato.value();
        let freq = 440.0 * ((pitch - 69.0) / 12.0).exp2();
        let tremolo_db = self.tremolo.value();
        VoiceParams {
            freq,
            force_start: db_to_gain(self.force.value() + tremolo_db),
            force_end: db_to_gain(self.force.value_after(frames) + tremolo_db),
            pan_start: self.panning.value(),
            pan_end: self.panning.value_after(frames),
        }
    }

    /// Moves the channel's expression clocks forward by `frames`.
    pub fn advance_expression(&mut self, frames: usize, rate: AudioRate) {
        self.force.advance(frames);
        self.panning.advance(frames);
        self.vibrato.advance(frames, rate);
        self.tremolo.advance(frames, rate);
        self.arpeggio.advance(frames, rate);
    }
}

pub(super) fn db_to_gain(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn slider_slides_and_lands_exactly() {
        let mut slider = Slider::new(0.0);
        slider.start(10.0, 4.0);
        assert_eq!(slider.value(), 0.0);
        assert!(approx_eq!(f64, slider.value_after(2), 5.0));
        slider.advance(2);
        assert!(approx_eq!(f64, slider.value(), 5.0));
        slider.advance(100);
        assert_eq!(slider.value(), 10.0, "slides land on the target exactly");
    }

    #[test]
    fn zero_frame_slide_is_a_set() {
        let mut slider = Slider::new(1.0);
        slider.start(3.0, 0.0);
        assert_eq!(slider.value(), 3.0);
    }

    #[test]
    fn default_params_are_neutral() {
        let channel = Channel::new(0);
        let params = channel.voice_params(64);
        assert!(approx_eq!(f64, params.force_start, 1.0));
        assert!(approx_eq!(f64, params.freq, 440.0));
        assert_eq!(params.pan_start, 0.0);
    }

    #[test]
    fn force_slide_shows_up_as_a_ramp() {
        let mut channel = Channel::new(0);
        channel.force.start(-6.0, 100.0);
        let params = channel.voice_params(100);
        assert!(approx_eq!(f64, params.force_start, 1.0));
        assert!(approx_eq!(f64, params.force_end, db_to_gain(-6.0)));
    }

    #[test]
    fn rng_is_deterministic_per_reset() {
        let mut channel = Channel::new(2);
        channel.reset(&crate::composition::ChannelDefaults::default(), 42);
        let a = channel.rng.rand_u64();
        channel.reset(&crate::composition::ChannelDefaults::default(), 42);
        let b = channel.rng.rand_u64();
        assert_eq!(a, b);
    }
}
