// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::types::Normal;
use rustc_hash::FxHashMap;

/// Runtime state of one audio unit. The closed processor set carries no
/// per-processor mixed state, so the device-states table currently keys
/// audio units only; per-processor entries would slot in beside these.
#[derive(Clone, Debug)]
pub struct AuState {
    /// Sustain level. Above 0.5, released voices hold their tails.
    pub sustain: Normal,
    /// Bypassed units render their voices as silence and pass mixed input
    /// through unchanged.
    pub bypass: bool,
    /// Control-variable values, keyed by name.
    pub cv_values: FxHashMap<String, f64>,
}
impl Default for AuState {
    fn default() -> Self {
        Self {
            sustain: Normal::MIN,
            bypass: false,
            cv_values: FxHashMap::default(),
        }
    }
}
impl AuState {
    fn reset(&mut self) {
        self.sustain = Normal::MIN;
        self.bypass = false;
        self.cv_values.clear();
    }
}

/// Per-device runtime state, keyed by top-level audio unit index. Owned by
/// the player and reset whenever playback (re)starts or the audio rate
/// changes.
#[derive(Clone, Debug, Default)]
pub struct DeviceStates {
    aus: Vec<AuState>,
}

impl DeviceStates {
    /// Creates states for `unit_count` audio units.
    pub fn new(unit_count: usize) -> Self {
        Self {
            aus: vec![AuState::default(); unit_count],
        }
    }

    #[allow(missing_docs)]
    pub fn au(&self, index: usize) -> Option<&AuState> {
        self.aus.get(index)
    }

    #[allow(missing_docs)]
    pub fn au_mut(&mut self, index: usize) -> Option<&mut AuState> {
        self.aus.get_mut(index)
    }

    /// Resets every unit to its initial state.
    pub fn reset(&mut self) {
        for au in &mut self.aus {
            au.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_everything() {
        let mut states = DeviceStates::new(2);
        states.au_mut(0).unwrap().sustain = Normal::MAX;
        states.au_mut(1).unwrap().bypass = true;
        states
            .au_mut(1)
            .unwrap()
            .cv_values
            .insert("cutoff".into(), 0.5);

        states.reset();
        assert_eq!(states.au(0).unwrap().sustain, Normal::MIN);
        assert!(!states.au(1).unwrap().bypass);
        assert!(states.au(1).unwrap().cv_values.is_empty());
        assert!(states.au(2).is_none());
    }
}
