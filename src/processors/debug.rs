// Copyright (c) 2024 Mike Tsao. All rights reserved.

use super::{NoteParams, VoiceRender, VoiceRenderCtx};
use crate::{graph::WorkBuffer, types::AudioRate};

/// How many phase cycles a debug voice emits before going quiet.
const CYCLE_LIMIT: u32 = 10;

/// Voice state of the debug processor.
///
/// The output is deliberately trivial to eyeball in a test failure: the
/// first sample of every phase cycle is 1.0, the rest of the cycle is 0.5,
/// and after ten cycles the voice is done. There is no release tail; a
/// note-off ends the voice at the next render call.
#[derive(Clone, Debug)]
pub struct DebugVoiceState {
    cycle_frames: f64,
    pos_in_cycle: f64,
    cycles_done: u32,
    released: bool,
    finished: bool,
}

impl DebugVoiceState {
    pub(super) fn new(note: &NoteParams, rate: AudioRate) -> Self {
        // A cycle shorter than one frame would spin without producing
        // anything observable; clamp so degenerate rates stay harmless.
        let cycle_frames = (rate.value() / note.frequency()).max(1.0);
        Self {
            cycle_frames,
            pos_in_cycle: 0.0,
            cycles_done: 0,
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
        _ctx: &VoiceRenderCtx,
        outputs: &mut [WorkBuffer],
        frames: usize,
    ) -> VoiceRender {
        if self.released {
            self.finished = true;
        }

        if outputs.is_empty() {
            return VoiceRender { finished: true };
        }
        let mut quiet_from = 0;
        let (first, rest) = outputs.split_at_mut(1);
        {
            let left = first[0].claim();
            for (i, out) in left.iter_mut().enumerate().take(frames) {
                *out = if self.finished {
                    0.0
                } else {
                    let v = if self.pos_in_cycle < 1.0 { 1.0 } else { 0.5 };
                    self.pos_in_cycle += 1.0;
                    if self.pos_in_cycle >= self.cycle_frames {
                        self.pos_in_cycle -= self.cycle_frames;
                        self.cycles_done += 1;
                        if self.cycles_done >= CYCLE_LIMIT {
                            self.finished = true;
                        }
                    }
                    quiet_from = i + 1;
                    v
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

    fn ctx(rate: u32) -> VoiceRenderCtx {
        VoiceRenderCtx {
            freq: 440.0,
            sustain: 0.0,
            rate: AudioRate::new(rate).unwrap(),
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

    fn new_state(rate: u32, pitch: f64) -> DebugVoiceState {
        DebugVoiceState::new(
            &NoteParams {
                pitch: Some(pitch),
                hit: None,
            },
            AudioRate::new(rate).unwrap(),
        )
    }

    #[test]
    fn pulse_shape() {
        let mut state = new_state(48000, 69.0); // 440 Hz -> ~109.09 frames per cycle
        let mut outs = outputs(4);
        state.render(&ctx(48000), &mut outs, 4);
        let left = outs[0].read().unwrap();
        assert_eq!(left[0], 1.0, "cycle starts with a full-scale marker");
        assert_eq!(left[1], 0.5);
        assert_eq!(left[2], 0.5);
        let right = outs[1].read().unwrap();
        assert_eq!(left, right, "both channels carry the same pulse");
    }

    #[test]
    fn finishes_after_ten_cycles() {
        let mut state = new_state(48000, 69.0);
        let cycle: f64 = 48000.0 / 440.0;
        let enough = (cycle * 10.0).ceil() as usize + 16;
        let mut outs = outputs(enough);
        let result = state.render(&ctx(48000), &mut outs, enough);
        assert!(result.finished);
        assert!(state.is_finished());
        let left = outs[0].read().unwrap();
        assert_eq!(*left.last().unwrap(), 0.0, "silence after the last cycle");
        assert!(
            outs[0].const_start() < enough,
            "tail silence should be marked constant"
        );
    }

    #[test]
    fn note_off_ends_without_tail() {
        let mut state = new_state(48000, 69.0);
        let mut outs = outputs(8);
        state.render(&ctx(48000), &mut outs, 8);
        state.note_off();
        let mut outs = outputs(8);
        let result = state.render(&ctx(48000), &mut outs, 8);
        assert!(result.finished);
        assert_eq!(outs[0].read().unwrap(), &[0.0; 8]);
    }

    #[test]
    fn degenerate_rate_does_not_hang() {
        let mut state = new_state(1, 69.0);
        // The cycle length clamps to one frame, so the ten-cycle budget
        // burns in ten frames.
        let mut outs = outputs(16);
        let result = state.render(&ctx(1), &mut outs, 16);
        assert!(result.finished);
    }
}
