// Copyright (c) 2024 Mike Tsao. All rights reserved.

use super::VoiceParams;
use crate::{
    processors::{NoteParams, ProcessorSpec, VoiceProcState},
    types::{limits, AudioRate},
};
use log::debug;

/// Lifecycle priority of an active voice. Background voices (note already
/// off, tail still sounding) are evicted before foreground ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VoicePrio {
    #[allow(missing_docs)]
    Background,
    #[allow(missing_docs)]
    Foreground,
}

/// One slot of the pool.
#[derive(Debug)]
pub struct Voice {
    /// The activation this slot currently belongs to. Stale handles carry an
    /// old group id and fail the generation check.
    pub group_id: u64,
    #[allow(missing_docs)]
    pub channel: usize,
    /// Top-level audio unit the voice renders in.
    pub unit: usize,
    /// Graph node of the voice processor this slot drives.
    pub node: usize,
    #[allow(missing_docs)]
    pub prio: VoicePrio,
    #[allow(missing_docs)]
    pub active: bool,
    /// The processor reported its tail fully decayed.
    pub finished: bool,
    #[allow(missing_docs)]
    pub state: VoiceProcState,
    #[allow(missing_docs)]
    pub params: VoiceParams,
}
impl Default for Voice {
    fn default() -> Self {
        Self {
            group_id: 0,
            channel: 0,
            unit: 0,
            node: 0,
            prio: VoicePrio::Background,
            active: false,
            finished: false,
            state: VoiceProcState::None,
            params: VoiceParams::default(),
        }
    }
}

/// The fixed pool of voice slots.
#[derive(Debug)]
pub struct VoicePool {
    voices: Vec<Voice>,
    next_group_id: u64,
    scratch_groups: Vec<u64>,
}

impl VoicePool {
    /// Creates a pool with `size` slots, clamped to `[1, VOICES_MAX]`.
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, limits::VOICES_MAX);
        Self {
            voices: (0..size).map(|_| Voice::default()).collect(),
            next_group_id: 1,
            scratch_groups: Vec::with_capacity(size),
        }
    }

    /// Deactivates everything and restarts group numbering.
    pub fn reset(&mut self) {
        for voice in &mut self.voices {
            voice.active = false;
            voice.state = VoiceProcState::None;
        }
        self.next_group_id = 1;
    }

    #[allow(missing_docs)]
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Voices currently leased out.
    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    #[allow(missing_docs)]
    pub fn voice(&self, slot: usize) -> Option<&Voice> {
        self.voices.get(slot)
    }

    #[allow(missing_docs)]
    pub fn voice_mut(&mut self, slot: usize) -> Option<&mut Voice> {
        self.voices.get_mut(slot)
    }

    /// Atomically leases one slot per member of `members` (graph node plus
    /// processor description). Eviction runs group-wise in ascending
    /// (priority, group id) order; a foreground group of the requesting
    /// channel is never evicted. Returns the new group id, or `None` when
    /// the trigger must fail silently.
    pub fn reserve_group(
        &mut self,
        channel: usize,
        unit: usize,
        members: &[(usize, &ProcessorSpec)],
        note: &NoteParams,
        rate: AudioRate,
        params: VoiceParams,
    ) -> Option<u64> {
        let k = members.len();
        if k == 0 || k > self.voices.len() {
            return None;
        }

        // Capacity is secured up front, so activation below cannot partially
        // fail.
        loop {
            let free = self.voices.iter().filter(|v| !v.active).count();
            if free >= k {
                break;
            }
            let victim = self
                .voices
                .iter()
                .filter(|v| v.active)
                .filter(|v| !(v.prio == VoicePrio::Foreground && v.channel == channel))
                .map(|v| (v.prio, v.group_id))
                .min()?;
            debug!("evicting voice group {} (prio {:?})", victim.1, victim.0);
            self.deactivate_group(victim.1);
        }

        let group_id = self.next_group_id;
        self.next_group_id += 1;
        let mut member_iter = members.iter();
        for voice in self.voices.iter_mut().filter(|v| !v.active) {
            let Some(&(node, spec)) = member_iter.next() else {
                break;
            };
            voice.group_id = group_id;
            voice.channel = channel;
            voice.unit = unit;
            voice.node = node;
            voice.prio = VoicePrio::Foreground;
            voice.active = true;
            voice.finished = false;
            voice.state = spec.new_voice_state(note, rate);
            voice.params = params;
        }
        debug_assert!(member_iter.next().is_none(), "capacity was secured above");
        Some(group_id)
    }

    fn deactivate_group(&mut self, group_id: u64) {
        for voice in &mut self.voices {
            if voice.active && voice.group_id == group_id {
                voice.active = false;
                voice.state = VoiceProcState::None;
            }
        }
    }

    /// Demotes a group to background and begins its members' releases.
    pub fn note_off_group(&mut self, group_id: u64) {
        for voice in &mut self.voices {
            if voice.active && voice.group_id == group_id {
                voice.prio = VoicePrio::Background;
                voice.state.note_off();
            }
        }
    }

    /// Generation-checked parameter update through a `(slot, group_id)`
    /// handle. Returns false for stale handles.
    pub fn update_voice_params(&mut self, slot: u32, group_id: u64, params: VoiceParams) -> bool {
        match self.voices.get_mut(slot as usize) {
            Some(voice) if voice.active && voice.group_id == group_id => {
                voice.params = params;
                true
            }
            _ => false,
        }
    }

    /// Collects the slots of a group, in slot order.
    pub fn group_slots_into(&self, group_id: u64, out: &mut Vec<usize>) {
        out.clear();
        for (slot, voice) in self.voices.iter().enumerate() {
            if voice.active && voice.group_id == group_id {
                out.push(slot);
            }
        }
    }

    /// Collects `(slot, group_id)` handles for a group.
    pub fn group_handles_into(&self, group_id: u64, out: &mut Vec<(u32, u64)>) {
        out.clear();
        for (slot, voice) in self.voices.iter().enumerate() {
            if voice.active && voice.group_id == group_id {
                out.push((slot as u32, group_id));
            }
        }
    }

    /// Whether any member of the group still holds a slot.
    pub fn group_is_active(&self, group_id: u64) -> bool {
        self.voices
            .iter()
            .any(|v| v.active && v.group_id == group_id)
    }

    /// Collects the ids of all active groups, ascending. The scratch buffer
    /// lives in the pool so the render path allocates nothing.
    pub fn active_group_ids(&mut self) -> &[u64] {
        self.scratch_groups.clear();
        for voice in &self.voices {
            if voice.active {
                self.scratch_groups.push(voice.group_id);
            }
        }
        self.scratch_groups.sort_unstable();
        self.scratch_groups.dedup();
        &self.scratch_groups
    }

    /// Returns fully-finished groups' slots to the pool. Called at chunk
    /// boundaries; a group with any unfinished member keeps all its slots,
    /// preserving all-or-nothing observability.
    pub fn reap_finished(&mut self) {
        self.scratch_groups.clear();
        for voice in &self.voices {
            if voice.active && !voice.finished {
                self.scratch_groups.push(voice.group_id);
            }
        }
        self.scratch_groups.sort_unstable();
        self.scratch_groups.dedup();
        for voice in &mut self.voices {
            if voice.active && self.scratch_groups.binary_search(&voice.group_id).is_err() {
                voice.active = false;
                voice.state = VoiceProcState::None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::AddSpec;

    const NOTE: NoteParams = NoteParams {
        pitch: Some(60.0),
        hit: None,
    };

    fn specs() -> (ProcessorSpec, ProcessorSpec) {
        (ProcessorSpec::Debug, ProcessorSpec::Add(AddSpec::default()))
    }

    fn reserve(pool: &mut VoicePool, channel: usize, members: &[(usize, &ProcessorSpec)]) -> Option<u64> {
        pool.reserve_group(
            channel,
            0,
            members,
            &NOTE,
            AudioRate::default(),
            VoiceParams::default(),
        )
    }

    #[test]
    fn groups_activate_atomically() {
        let (debug, add) = specs();
        let mut pool = VoicePool::new(4);
        let members = [(0usize, &debug), (1usize, &add)];

        let g1 = reserve(&mut pool, 0, &members).unwrap();
        let g2 = reserve(&mut pool, 1, &members).unwrap();
        assert_ne!(g1, g2);
        assert_eq!(pool.active_voice_count(), 4);

        let mut slots = Vec::new();
        pool.group_slots_into(g1, &mut slots);
        assert_eq!(slots.len(), 2, "every member of the group is active");
    }

    #[test]
    fn group_ids_strictly_increase() {
        let (debug, _) = specs();
        let mut pool = VoicePool::new(8);
        let members = [(0usize, &debug)];
        let mut last = 0;
        for _ in 0..8 {
            let gid = reserve(&mut pool, 0, &members).unwrap();
            assert!(gid > last);
            last = gid;
        }
    }

    #[test]
    fn eviction_prefers_background_and_oldest() {
        let (debug, _) = specs();
        let mut pool = VoicePool::new(2);
        let members = [(0usize, &debug)];

        let g1 = reserve(&mut pool, 0, &members).unwrap();
        let g2 = reserve(&mut pool, 1, &members).unwrap();
        pool.note_off_group(g1);

        // Pool is full; the background group goes first.
        let g3 = reserve(&mut pool, 2, &members).unwrap();
        assert!(!pool.group_is_active(g1), "background voice was evicted");
        assert!(pool.group_is_active(g2));
        assert!(pool.group_is_active(g3));

        // Full again, all foreground: the oldest foreground group of another
        // channel goes.
        let g4 = reserve(&mut pool, 3, &members).unwrap();
        assert!(!pool.group_is_active(g2));
        assert!(pool.group_is_active(g3));
        assert!(pool.group_is_active(g4));
    }

    #[test]
    fn own_foreground_is_never_evicted() {
        let (debug, _) = specs();
        let mut pool = VoicePool::new(1);
        let members = [(0usize, &debug)];

        let g1 = reserve(&mut pool, 5, &members).unwrap();
        assert!(
            reserve(&mut pool, 5, &members).is_none(),
            "same-channel retrigger must go through note_off"
        );
        assert!(pool.group_is_active(g1));

        // A different channel may steal it.
        assert!(reserve(&mut pool, 6, &members).is_some());
        assert!(!pool.group_is_active(g1));
    }

    #[test]
    fn oversized_groups_fail_cleanly() {
        let (debug, add) = specs();
        let mut pool = VoicePool::new(1);
        let members = [(0usize, &debug), (1usize, &add)];
        assert!(reserve(&mut pool, 0, &members).is_none());
        assert_eq!(pool.active_voice_count(), 0, "nothing was partially leased");
    }

    #[test]
    fn stale_handles_fail_the_generation_check() {
        let (debug, _) = specs();
        let mut pool = VoicePool::new(1);
        let members = [(0usize, &debug)];

        let g1 = reserve(&mut pool, 0, &members).unwrap();
        let mut handles = Vec::new();
        pool.group_handles_into(g1, &mut handles);
        let (slot, gen) = handles[0];
        assert!(pool.update_voice_params(slot, gen, VoiceParams::default()));

        // Steal the slot from another channel; the old handle must go dead.
        let _g2 = reserve(&mut pool, 1, &members).unwrap();
        assert!(!pool.update_voice_params(slot, gen, VoiceParams::default()));
    }

    #[test]
    fn reaping_respects_group_atomicity() {
        let (debug, add) = specs();
        let mut pool = VoicePool::new(2);
        let members = [(0usize, &debug), (1usize, &add)];
        let g1 = reserve(&mut pool, 0, &members).unwrap();

        let mut slots = Vec::new();
        pool.group_slots_into(g1, &mut slots);
        pool.voice_mut(slots[0]).unwrap().finished = true;
        pool.reap_finished();
        assert!(
            pool.group_is_active(g1),
            "a group with an unfinished member keeps all its slots"
        );

        pool.voice_mut(slots[1]).unwrap().finished = true;
        pool.reap_finished();
        assert!(!pool.group_is_active(g1));
        assert_eq!(pool.active_voice_count(), 0);
    }
}
