// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! The processor set. A processor is a leaf DSP node inside an audio unit;
//! it either renders per-voice (sources driven by notes) or per-chunk
//! (effects on the mixed path). The set is closed, so dispatch is a `match`
//! on an enum rather than a boxed trait object.

use crate::{graph::WorkBuffer, types::AudioRate};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

pub use add::{AddSpec, AddVoiceState};
pub use debug::DebugVoiceState;
pub use volume::VolumeSpec;

mod add;
mod debug;
mod volume;

/// Quick imports for processor handling.
pub mod prelude {
    pub use super::{
        AddSpec, NoteParams, ProcessorSpec, VoiceProcState, VoiceRender, VoiceRenderCtx,
        VolumeSpec,
    };
}

/// Description of one processor, as found in a module.
#[derive(Clone, Debug, Display, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorSpec {
    /// Test pulse generator: one 1.0 sample then 0.5s for the rest of each
    /// phase cycle, up to ten cycles.
    Debug,
    /// A single sine partial.
    Add(AddSpec),
    /// Fixed gain on the mixed path.
    Volume(VolumeSpec),
}
impl ProcessorSpec {
    /// Whether this processor renders per-voice. Everything else renders
    /// once per chunk on the mixed path.
    pub fn is_voice(&self) -> bool {
        match self {
            ProcessorSpec::Debug | ProcessorSpec::Add(_) => true,
            ProcessorSpec::Volume(_) => false,
        }
    }

    /// `(receive, send)` audio port counts.
    pub fn port_counts(&self) -> (u8, u8) {
        match self {
            ProcessorSpec::Debug | ProcessorSpec::Add(_) => (0, 2),
            ProcessorSpec::Volume(_) => (2, 2),
        }
    }

    /// Creates the per-voice state for one activation. Only meaningful for
    /// voice processors.
    pub fn new_voice_state(&self, note: &NoteParams, rate: AudioRate) -> VoiceProcState {
        match self {
            ProcessorSpec::Debug => VoiceProcState::Debug(DebugVoiceState::new(note, rate)),
            ProcessorSpec::Add(spec) => VoiceProcState::Add(AddVoiceState::new(spec, note, rate)),
            ProcessorSpec::Volume(_) => VoiceProcState::None,
        }
    }

    /// Renders one segment on the mixed path. Inputs that were never written
    /// read as silence; outputs are written in place.
    pub fn render_mixed(
        &self,
        inputs: &[WorkBuffer],
        outputs: &mut [WorkBuffer],
        frames: usize,
    ) {
        if let ProcessorSpec::Volume(spec) = self {
            spec.render(inputs, outputs, frames);
        }
    }
}

/// The note parameters captured when a voice group is activated.
#[derive(Clone, Copy, Debug)]
pub struct NoteParams {
    /// Pitch as a MIDI-style note number; `None` for hits.
    pub pitch: Option<f64>,
    /// Hit index, for percussion-style activation.
    pub hit: Option<i64>,
}
impl NoteParams {
    /// The fundamental frequency in Hz. Hits fall back to A4.
    pub fn frequency(&self) -> f64 {
        match self.pitch {
            Some(note) => 440.0 * ((note - 69.0) / 12.0).exp2(),
            None => 440.0,
        }
    }
}

/// Per-segment context for voice rendering, derived from channel state.
#[derive(Clone, Copy, Debug)]
pub struct VoiceRenderCtx {
    /// Effective frequency after channel expression (arpeggio, vibrato).
    pub freq: f64,
    /// The containing audio unit's sustain level.
    pub sustain: f64,
    #[allow(missing_docs)]
    pub rate: AudioRate,
}

/// What one voice-render call reports back.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoiceRender {
    /// The voice's tail has fully decayed; the slot can be reclaimed at the
    /// next chunk boundary.
    pub finished: bool,
}

/// Per-voice processor state, one variant per voice-rendering kind.
#[derive(Clone, Debug)]
pub enum VoiceProcState {
    /// Placeholder for slots that are not currently leased.
    None,
    #[allow(missing_docs)]
    Debug(DebugVoiceState),
    #[allow(missing_docs)]
    Add(AddVoiceState),
}
impl VoiceProcState {
    /// Renders `frames` frames into `outputs`, reading `inputs` from any
    /// upstream voice processors of the same group.
    pub fn render_voice(
        &mut self,
        ctx: &VoiceRenderCtx,
        inputs: &[WorkBuffer],
        outputs: &mut [WorkBuffer],
        frames: usize,
    ) -> VoiceRender {
        let _ = inputs;
        match self {
            VoiceProcState::None => VoiceRender { finished: true },
            VoiceProcState::Debug(state) => state.render(ctx, outputs, frames),
            VoiceProcState::Add(state) => state.render(ctx, outputs, frames),
        }
    }

    /// The note ended; begin the release phase (or finish outright for
    /// processors without a tail).
    pub fn note_off(&mut self) {
        match self {
            VoiceProcState::None => {}
            VoiceProcState::Debug(state) => state.note_off(),
            VoiceProcState::Add(state) => state.note_off(),
        }
    }

    #[allow(missing_docs)]
    pub fn is_finished(&self) -> bool {
        match self {
            VoiceProcState::None => true,
            VoiceProcState::Debug(state) => state.is_finished(),
            VoiceProcState::Add(state) => state.is_finished(),
        }
    }
}
