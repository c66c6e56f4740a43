// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::graph::WorkBuffer;
use serde::{Deserialize, Serialize};

/// Description of the mixed-path volume processor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Gain in dB. Zero is unity.
    #[serde(default)]
    pub gain_db: f64,
}
impl Default for VolumeSpec {
    fn default() -> Self {
        Self { gain_db: 0.0 }
    }
}

impl VolumeSpec {
    /// The gain as a linear factor.
    pub fn gain(&self) -> f64 {
        10f64.powf(self.gain_db / 20.0)
    }

    pub(super) fn render(
        &self,
        inputs: &[WorkBuffer],
        outputs: &mut [WorkBuffer],
        frames: usize,
    ) {
        let gain = self.gain() as crate::types::SampleType;
        for (port, out) in outputs.iter_mut().enumerate() {
            let Some(input) = inputs.get(port) else {
                continue;
            };
            let Some(src) = input.read() else {
                // Unwritten input falls through as an unwritten output.
                continue;
            };
            let dst = out.claim();
            for (d, s) in dst.iter_mut().zip(src.iter()).take(frames) {
                *d = *s * gain;
            }
            out.set_const_start(input.const_start());
            out.set_final(input.is_final());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::AllocWatch;
    use float_cmp::approx_eq;

    fn buffer(frames: usize) -> WorkBuffer {
        let mut b = WorkBuffer::default();
        b.reserve(frames, &mut AllocWatch::default());
        b.begin(frames);
        b
    }

    #[test]
    fn applies_gain_per_port() {
        let spec = VolumeSpec { gain_db: -6.0 };
        let mut input = buffer(4);
        input.claim().copy_from_slice(&[1.0, 1.0, 0.5, 0.5]);
        input.set_const_start(2);
        let inputs = vec![input, buffer(4)];

        let mut outputs = vec![buffer(4), buffer(4)];
        spec.render(&inputs, &mut outputs, 4);

        let out = outputs[0].read().unwrap();
        assert!(approx_eq!(f32, out[0], 0.5011872f32, epsilon = 1e-5));
        assert_eq!(
            outputs[0].const_start(),
            2,
            "constant region passes through a static gain"
        );
        assert!(
            !outputs[1].is_valid(),
            "silent input port stays silent on output"
        );
    }

    #[test]
    fn unity_default() {
        assert!(approx_eq!(f64, VolumeSpec::default().gain(), 1.0));
    }
}
