// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! The voice pool: a fixed array of voice slots leased to channels in
//! atomic groups.
//!
//! A *voice group* is the set of voices created by one trigger, one per
//! voice processor in the target audio unit. Groups activate atomically:
//! either every member gets a slot or the trigger fails silently. Slots are
//! leased, never owned, by channels; a channel keeps `(slot, group_id)`
//! handles and every dereference is generation-checked, so a reallocated
//! slot can never be mutated through a stale handle.

pub use pool::{Voice, VoicePool, VoicePrio};
pub use reservations::GroupReservations;

mod pool;
mod reservations;

/// Quick imports for voice management.
pub mod prelude {
    pub use super::{GroupReservations, VoiceParams, VoicePool, VoicePrio};
}

/// Channel-expression parameters a voice renders with during one segment.
/// Start/end pairs describe a linear ramp across the segment, which is how
/// force and panning slides reach the audio.
#[derive(Clone, Copy, Debug)]
pub struct VoiceParams {
    /// Effective frequency in Hz, after arpeggio and vibrato.
    pub freq: f64,
    #[allow(missing_docs)]
    pub force_start: f64,
    #[allow(missing_docs)]
    pub force_end: f64,
    /// Panning in [-1, 1]; negative is left.
    pub pan_start: f64,
    #[allow(missing_docs)]
    pub pan_end: f64,
}
impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            freq: 440.0,
            force_start: 1.0,
            force_end: 1.0,
            pan_start: 0.0,
            pan_end: 0.0,
        }
    }
}
impl VoiceParams {
    /// Left-channel gain at the segment start and end.
    pub fn left_gains(&self) -> (f64, f64) {
        (
            self.force_start * (1.0 - self.pan_start).min(1.0),
            self.force_end * (1.0 - self.pan_end).min(1.0),
        )
    }

    /// Right-channel gain at the segment start and end.
    pub fn right_gains(&self) -> (f64, f64) {
        (
            self.force_start * (1.0 + self.pan_start).min(1.0),
            self.force_end * (1.0 + self.pan_end).min(1.0),
        )
    }
}
