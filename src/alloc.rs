// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Allocation fault injection.
//!
//! The render path allocates only when a chunk needs larger work buffers
//! than any chunk before it. Tests need to prove that an allocation failure
//! at that point degrades to a zero-frame render instead of a crash, so
//! every buffer growth on the render path is routed through an [AllocWatch]
//! handle owned by the player. Production use leaves the watch disarmed and
//! it costs one integer compare per growth.

/// Countdown fault injector for render-path allocations.
#[derive(Debug)]
pub struct AllocWatch {
    /// Remaining successful allocations before the injected failure; -1 when
    /// disarmed.
    steps: i32,
}

impl Default for AllocWatch {
    fn default() -> Self {
        Self { steps: -1 }
    }
}

impl AllocWatch {
    /// Arms the watch: the next `steps` allocations succeed, the one after
    /// fails. `steps` of -1 disarms.
    pub fn fail_after(&mut self, steps: i32) {
        self.steps = steps.max(-1);
    }

    /// Accounts for one allocation. Returns false exactly when the armed
    /// countdown expires; the watch disarms itself afterwards.
    pub fn approve(&mut self) -> bool {
        match self.steps {
            -1 => true,
            0 => {
                self.steps = -1;
                false
            }
            _ => {
                self.steps -= 1;
                true
            }
        }
    }

    /// Whether a fault is pending.
    pub fn is_armed(&self) -> bool {
        self.steps >= 0
    }
}
