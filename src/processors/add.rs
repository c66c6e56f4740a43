// Copyright (c) 2024 Mike Tsao. All rights reserved.

use super::{NoteParams, VoiceRender, VoiceRenderCtx};
use crate::{graph::WorkBuffer, types::AudioRate};
use serde::{Deserialize, Serialize};

/// Description of the additive processor. A single sine partial is enough
/// for the engine's purposes; a full partial stack is a DSP concern, not a
/// sequencing one.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddSpec {
    /// Output amplitude of the partial.
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    /// Release length in seconds once the note ends.
    #[serde(default = "default_release")]
    pub release: f64,
}

fn default_amplitude() -> f64 {
    0.5
}

fn default_release() -> f64 {
    0.005
}

impl Default for AddSpec {
    fn default() -> Self {
        Self {
            amplitude: default_amplitude(),
            release: default_release(),
        }
    }
}

/// Voice state of the additive processor.
#[derive(Clone, Debug)]
pub struct AddVoiceState {
    amplitude: f64,
    release_step: f64,
    phase: f64,
    /// Remaining release gain; 1.0 until the release begins.
    release_gain: f64,
    released: bool,
    finished: bool,
}

impl AddVoiceState {
    pub(super) fn new(spec: &AddSpec, _note: &NoteParams, rate: AudioRate) -> Self {
        let release_frames = (spec.release * rate.value()).max(1.0);
        Self {
            amplitude: spec.amplitude,
            release_step: 1.0 / release_frames,
            phase: 0.0,
            release_gain: 1.0,
            released: false,
            finished: false,
        }
    }

    pub(super) fn note_off(&mut self) {
        self.released = true;
    }

    pub(super) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(super) fn render(
        &mut self,
        ctx: &VoiceRenderCtx,
        outputs: &mut [WorkBuffer],
        frames: usize,
    ) -> VoiceRender {
        if outputs.is_empty() {
            return VoiceRender { finished: true };
        }
        // Sustain holds the release: the voice keeps sounding at full gain
        // until the audio unit lets go.
        let releasing = self.released && ctx.sustain < 0.5;
        let phase_step = ctx.freq / ctx.rate.value();

        let mut quiet_from = 0;
        let (first, rest) = outputs.split_at_mut(1);
        {
            let left = first[0].claim();
            for (i, out) in left.iter_mut().enumerate().take(frames) {
                *out = if self.finished {
                    0.0
                } else {
                    let v = (self.phase * std::f64::consts::TAU).sin()
                        * self.amplitude
                        * self.release_gain;
                    self.phase += phase_step;
                    if self.phase >= 1.0 {
                        self.phase -= self.phase.floor();
                    }
                    if releasing {
                        self.release_gain -= self.release_step;
                        if self.release_gain <= 0.0 {
                            self.release_gain = 0.0;
                            self.finished = true;
                        }
                    }
                    quiet_from = i + 1;
                    v as crate::types::SampleType
                };
            }
        }
        first[0].set_const_start(quiet_from);
        if let Some(right) = rest.first_mut() {
            right.copy_from(&first[0]);
        }

        VoiceRender {
            finished: self.finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::AllocWatch;
    use more_asserts::assert_gt;

    fn ctx() -> VoiceRenderCtx {
        VoiceRenderCtx {
            freq: 440.0,
            sustain: 0.0,
            rate: AudioRate::default(),
        }
    }

    fn outputs(frames: usize) -> Vec<WorkBuffer> {
        (0..2)
            .map(|_| {
                let mut b = WorkBuffer::default();
                b.reserve(frames, &mut AllocWatch::default());
                b.begin(frames);
                b
            })
            .collect()
    }

    fn new_state() -> AddVoiceState {
        AddVoiceState::new(
            &AddSpec::default(),
            &NoteParams {
                pitch: Some(69.0),
                hit: None,
            },
            AudioRate::default(),
        )
    }

    #[test]
    fn produces_signal_while_held() {
        let mut state = new_state();
        let mut outs = outputs(256);
        let result = state.render(&ctx(), &mut outs, 256);
        assert!(!result.finished);
        let energy: f64 = outs[0]
            .read()
            .unwrap()
            .iter()
            .map(|s| (*s as f64) * (*s as f64))
            .sum();
        assert_gt!(energy, 0.0, "a held sine voice is not silent");
    }

    #[test]
    fn release_decays_to_finished() {
        let mut state = new_state();
        let mut outs = outputs(64);
        state.render(&ctx(), &mut outs, 64);
        state.note_off();

        // Default release is 5 ms = 240 frames at 48 kHz.
        let mut outs = outputs(512);
        let result = state.render(&ctx(), &mut outs, 512);
        assert!(result.finished, "release should complete within the chunk");
        assert_eq!(*outs[0].read().unwrap().last().unwrap(), 0.0);
    }

    #[test]
    fn sustain_defers_release() {
        let mut state = new_state();
        state.note_off();
        let sustained = VoiceRenderCtx {
            sustain: 1.0,
            ..ctx()
        };
        let mut outs = outputs(512);
        let result = state.render(&sustained, &mut outs, 512);
        assert!(
            !result.finished,
            "a sustained voice holds its tail until sustain drops"
        );
    }
}
