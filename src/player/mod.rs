// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! The player: the master sequencer plus everything it owns.
//!
//! One [Player] owns all runtime state for one module: master parameters,
//! per-channel state, the voice pool, device states, and the render arena.
//! [Player::play] renders one chunk on the calling thread, walking musical
//! time event-to-event so that every trigger lands at its exact frame
//! offset. A control thread talks to the player only through the external
//! event queue and the host-goto cell; the audio thread consumes both at
//! chunk boundaries.

use crate::{
    alloc::AllocWatch,
    composition::{Module, PatInstRef, Pattern},
    events::EventValue,
    graph::{executor, DeviceStates, RenderArena},
    time::Tstamp,
    types::{limits, AudioRate, Sample, SampleType, StereoSample},
    voices::{GroupReservations, VoicePool},
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use delegate::delegate;
use log::warn;
use std::sync::Arc;

pub use channel::{Arpeggio, Channel, Lfo, Slider};
pub use master::{GotoTarget, JumpKey, MasterParams, PlaybackState, Position, Slide};

mod cgiter;
mod channel;
mod events;
mod master;

use cgiter::Cgiter;

/// Quick imports for driving playback.
pub mod prelude {
    pub use super::{EventSender, Player, PlaybackState};
}

/// Seed mixed into every channel RNG so runs are reproducible.
const CHANNEL_SEED: u64 = 0x736e_6172_6521;

/// Safety valve for degenerate scores whose whole playback rounds to zero
/// frames; after this many consecutive zero-frame advances the chunk gives
/// up instead of spinning.
const STALL_LIMIT: u32 = 100_000;

/// An event injected from outside the score.
#[derive(Clone, Debug)]
pub struct ExternalEvent {
    #[allow(missing_docs)]
    pub channel: usize,
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub argument: EventValue,
}

/// A cloneable handle a control thread uses to inject events. Delivery is
/// at the start of the next render chunk.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: Sender<ExternalEvent>,
}
impl EventSender {
    /// Enqueues an event for the next chunk.
    pub fn fire(&self, channel: usize, name: impl Into<String>, argument: EventValue) {
        let _ = self.tx.send(ExternalEvent {
            channel,
            name: name.into(),
            argument,
        });
    }
}

/// Renders a module. See the module docs for the ownership story.
pub struct Player {
    module: Arc<Module>,
    rate: AudioRate,

    master: MasterParams,
    channels: Vec<Channel>,
    cgiters: Vec<Cgiter>,
    pool: VoicePool,
    reservations: GroupReservations,
    device_states: DeviceStates,
    arena: RenderArena,
    watch: AllocWatch,

    out: [Vec<SampleType>; 2],
    frames_avail: usize,
    peaks: StereoSample,

    event_tx: Sender<ExternalEvent>,
    event_rx: Receiver<ExternalEvent>,
    pending_host_goto: Option<(usize, usize, Tstamp)>,
}

impl Player {
    /// Creates a player with the default audio rate and voice pool.
    pub fn new(module: Arc<Module>) -> Self {
        Self::new_with(module, AudioRate::default(), limits::VOICES_DEFAULT)
    }

    /// Creates a player with an explicit rate and voice pool size.
    pub fn new_with(module: Arc<Module>, rate: AudioRate, voice_count: usize) -> Self {
        let (event_tx, event_rx) = unbounded();
        let node_count = module.graph().nodes.len();
        let mut player = Self {
            channels: (0..limits::CHANNELS).map(Channel::new).collect(),
            cgiters: (0..limits::CHANNELS).map(Cgiter::new).collect(),
            pool: VoicePool::new(voice_count),
            reservations: GroupReservations::default(),
            device_states: DeviceStates::new(module.audio_units.len()),
            arena: RenderArena::new(node_count),
            watch: AllocWatch::default(),
            master: MasterParams::default(),
            out: [Vec::new(), Vec::new()],
            frames_avail: 0,
            peaks: StereoSample::SILENCE,
            event_tx,
            event_rx,
            pending_host_goto: None,
            module,
            rate,
        };
        player.reset_runtime();
        player
    }

    /// The module being played.
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    #[allow(missing_docs)]
    pub fn audio_rate(&self) -> AudioRate {
        self.rate
    }

    /// Changes the audio rate. Device and voice states depend on the rate,
    /// so both reset. Must not be called while a render is in flight, which
    /// single-threaded ownership already guarantees.
    pub fn set_audio_rate(&mut self, rate: AudioRate) {
        self.rate = rate;
        self.device_states.reset();
        self.pool.reset();
    }

    #[allow(missing_docs)]
    pub fn playback_state(&self) -> PlaybackState {
        self.master.playback
    }

    #[allow(missing_docs)]
    pub fn is_paused(&self) -> bool {
        self.master.is_paused
    }

    delegate! {
        to self.pool {
            /// Voices currently leased from the pool.
            pub fn active_voice_count(&self) -> usize;
            /// Size of the voice pool.
            pub fn voice_count(&self) -> usize;
        }
    }

    /// Starts playing the whole module from the top.
    pub fn play_module(&mut self) {
        self.reset_runtime();
        self.master.playback = PlaybackState::Module;
        self.start_at_position();
    }

    /// Starts playing one track's song from its first system.
    pub fn play_song(&mut self, track: usize) {
        self.reset_runtime();
        self.master.playback = PlaybackState::Song;
        self.master.pos.track = track;
        self.start_at_position();
    }

    /// Starts looping a single pattern instance.
    pub fn play_pattern(&mut self, piref: PatInstRef) {
        self.reset_runtime();
        self.master.playback = PlaybackState::Pattern;
        self.master.pos.piref = piref;
        let module = Arc::clone(&self.module);
        if !self.enter_pattern(&module, true) {
            self.master.playback = PlaybackState::Stopped;
        }
    }

    /// Stops playback and silences every voice.
    pub fn stop(&mut self) {
        self.master.playback = PlaybackState::Stopped;
        self.pool.reset();
    }

    /// Pauses sequencer time. Sounding voices keep sounding.
    pub fn pause(&mut self) {
        self.master.is_paused = true;
    }

    #[allow(missing_docs)]
    pub fn resume(&mut self) {
        self.master.is_paused = false;
    }

    /// Loop at the end of the module instead of stopping.
    pub fn set_infinite(&mut self, infinite: bool) {
        self.master.infinite = infinite;
    }

    /// Requests a seek. Takes effect at the next chunk boundary, with all
    /// channel states reset.
    pub fn set_position(&mut self, track: usize, system: usize, row: Tstamp) {
        self.pending_host_goto = Some((track, system, row));
    }

    /// Enqueues an external event for the next chunk.
    pub fn fire_event(&mut self, channel: usize, name: &str, argument: EventValue) {
        let _ = self.event_tx.send(ExternalEvent {
            channel,
            name: name.to_owned(),
            argument,
        });
    }

    /// A handle for control threads; see [EventSender].
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.event_tx.clone(),
        }
    }

    /// Testing aid: the next `steps`th render-path allocation fails,
    /// causing that chunk to render zero frames.
    pub fn fake_out_of_memory(&mut self, steps: i32) {
        self.watch.fail_after(steps);
    }

    /// Frames rendered by the most recent [Player::play] call.
    pub fn frames_available(&self) -> usize {
        self.frames_avail
    }

    /// The loudest absolute sample per channel seen since playback started.
    /// Purely informational; the engine never limits.
    pub fn peaks(&self) -> StereoSample {
        self.peaks
    }

    /// One output channel of the most recent chunk (0 left, 1 right).
    pub fn audio_buffer(&self, channel: usize) -> &[SampleType] {
        &self.out[channel][..self.frames_avail]
    }

    /// Copies the most recent chunk out as interleaved stereo. Returns the
    /// frame count copied.
    pub fn mix_interleaved(&self, out: &mut [SampleType]) -> usize {
        let frames = self.frames_avail.min(out.len() / 2);
        for i in 0..frames {
            out[2 * i] = self.out[0][i];
            out[2 * i + 1] = self.out[1][i];
        }
        frames
    }

    /// Renders up to `frame_count` frames into the internal buffers.
    /// Returns the number actually rendered, which is less when playback
    /// ends mid-chunk and zero when stopped or out of memory.
    pub fn play(&mut self, frame_count: usize) -> usize {
        self.frames_avail = 0;
        if frame_count == 0 {
            return 0;
        }
        if !self.prepare_chunk(frame_count) {
            return 0;
        }
        self.reservations.clear();
        self.drain_external_events();
        self.apply_host_goto();
        if self.master.playback == PlaybackState::Stopped {
            return 0;
        }

        let module = Arc::clone(&self.module);
        let mut rendered = 0usize;
        let mut stalls = 0u32;
        while rendered < frame_count {
            if self.master.playback == PlaybackState::Stopped {
                break;
            }
            if self.master.is_paused {
                let n = frame_count - rendered;
                self.update_voice_expression(n);
                self.render_frames(rendered, n);
                rendered += n;
                break;
            }

            let Some((_, pattern)) = self.current_pattern(&module) else {
                self.master.playback = PlaybackState::Stopped;
                break;
            };

            if self.master.pattern_delay.is_zero() {
                self.process_row(pattern);
                if self.perform_pending_goto(&module) {
                    continue;
                }
                if self.master.playback == PlaybackState::Stopped || self.master.is_paused {
                    continue;
                }
                if self.master.pos.row >= pattern.length && self.master.pattern_delay.is_zero() {
                    self.advance_system(&module);
                    stalls += 1;
                    if stalls > STALL_LIMIT {
                        warn!("score makes no audible progress; abandoning chunk");
                        break;
                    }
                    continue;
                }
            }

            let dist = self.next_event_distance(pattern);
            if dist.is_zero() {
                self.advance_system(&module);
                continue;
            }

            let budget = frame_count - rendered;
            let exact = dist.to_frames(self.master.tempo, self.rate) + self.master.frame_frac;
            let frames_needed = exact.floor().max(0.0) as usize;
            let (n, advance) = if frames_needed <= budget {
                self.master.frame_frac = exact - frames_needed as f64;
                (frames_needed, dist)
            } else {
                let partial = Tstamp::from_frames(
                    (budget as f64 - self.master.frame_frac).max(0.0),
                    self.master.tempo,
                    self.rate,
                )
                .min(dist);
                let covered = partial.to_frames(self.master.tempo, self.rate)
                    + self.master.frame_frac;
                self.master.frame_frac = covered - budget as f64;
                (budget, partial)
            };

            if n > 0 {
                self.update_voice_expression(n);
                self.render_frames(rendered, n);
                rendered += n;
                stalls = 0;
            } else {
                stalls += 1;
                if stalls > STALL_LIMIT {
                    warn!("score makes no audible progress; abandoning chunk");
                    break;
                }
            }
            self.advance_time(advance);
        }

        self.pool.reap_finished();
        self.frames_avail = rendered;
        for (channel, peak) in [&mut self.peaks.0, &mut self.peaks.1].into_iter().enumerate() {
            for sample in &self.out[channel][..rendered] {
                let sample = Sample(sample.abs());
                if sample > *peak {
                    *peak = sample;
                }
            }
        }
        rendered
    }

    // ---------------------------------------------------------------------
    // Chunk plumbing

    fn prepare_chunk(&mut self, frame_count: usize) -> bool {
        for buffer in &mut self.out {
            if buffer.len() < frame_count {
                if !self.watch.approve() {
                    return false;
                }
                buffer.resize(frame_count, 0.0);
            }
        }
        self.arena.prepare(frame_count, &mut self.watch)
    }

    fn drain_external_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            let channel = event.channel.min(limits::CHANNELS - 1);
            self.process_trigger(channel, &event.name, &event.argument, 0, true);
        }
    }

    fn apply_host_goto(&mut self) {
        let Some((track, system, row)) = self.pending_host_goto.take() else {
            return;
        };
        if self.master.playback == PlaybackState::Stopped {
            return;
        }
        let module = Arc::clone(&self.module);
        for (index, channel) in self.channels.iter_mut().enumerate() {
            channel.reset(&module.channel_defaults(index), CHANNEL_SEED);
        }
        self.pool.reset();
        self.master.pattern_delay = Tstamp::ZERO;
        self.master.tempo_slide = None;
        self.master.volume_slide = None;
        self.master.jump_contexts.clear();
        self.master.pending_goto = None;
        self.master.frame_frac = 0.0;
        if self.master.playback != PlaybackState::Pattern {
            self.master.pos.track = track;
            self.master.pos.system = system;
        }
        self.master.pos.row = row;
        if !self.enter_pattern(&module, true) {
            self.master.playback = PlaybackState::Stopped;
        }
    }

    fn reset_runtime(&mut self) {
        let module = Arc::clone(&self.module);
        self.master.reset();
        for (index, channel) in self.channels.iter_mut().enumerate() {
            channel.reset(&module.channel_defaults(index), CHANNEL_SEED);
        }
        self.pool.reset();
        self.reservations.clear();
        self.device_states.reset();
        self.pending_host_goto = None;
        self.frames_avail = 0;
        self.peaks = StereoSample::SILENCE;
    }

    fn start_at_position(&mut self) {
        let module = Arc::clone(&self.module);
        if let Some(song) = self
            .module
            .track_list
            .song_index(self.master.pos.track)
            .and_then(|index| self.module.song(index))
        {
            self.master.tempo = song.initial_tempo;
            self.master.volume = song.initial_volume;
        }
        if !self.enter_pattern(&module, true) {
            self.master.playback = PlaybackState::Stopped;
        }
    }

    // ---------------------------------------------------------------------
    // Position management

    /// The pattern the position is inside. `pos.piref` is authoritative: a
    /// jump can park playback in a pattern the current system doesn't
    /// schedule.
    fn current_pattern<'m>(&self, module: &'m Module) -> Option<(PatInstRef, &'m Pattern)> {
        if self.master.playback == PlaybackState::Stopped {
            return None;
        }
        let piref = self.master.pos.piref;
        module.pattern(piref).map(|pattern| (piref, pattern))
    }

    /// What the schedule puts at the current `(track, system)`.
    fn scheduled_pattern<'m>(&self, module: &'m Module) -> Option<(PatInstRef, &'m Pattern)> {
        match self.master.playback {
            PlaybackState::Stopped => None,
            PlaybackState::Pattern => {
                let piref = self.master.pos.piref;
                module.pattern(piref).map(|pattern| (piref, pattern))
            }
            PlaybackState::Song | PlaybackState::Module => {
                module.pattern_at(self.master.pos.track, self.master.pos.system)
            }
        }
    }

    fn enter_pattern(&mut self, module: &Module, from_outside: bool) -> bool {
        let Some((piref, pattern)) = self.scheduled_pattern(module) else {
            return false;
        };
        self.master.pos.piref = piref;
        for iter in &mut self.cgiters {
            iter.reset(pattern, self.master.pos.row);
        }
        if from_outside {
            self.master.jump_contexts.retain(|key, _| key.piref != piref);
        }
        true
    }

    fn advance_system(&mut self, module: &Module) {
        self.master.pos.row = Tstamp::ZERO;
        match self.master.playback {
            PlaybackState::Stopped => {}
            PlaybackState::Pattern => {
                if !self.enter_pattern(module, true) {
                    self.master.playback = PlaybackState::Stopped;
                }
            }
            PlaybackState::Song => {
                self.master.pos.system += 1;
                if module
                    .pattern_at(self.master.pos.track, self.master.pos.system)
                    .is_none()
                {
                    if !self.master.infinite {
                        self.master.playback = PlaybackState::Stopped;
                        return;
                    }
                    self.master.pos.system = 0;
                }
                if !self.enter_pattern(module, true) {
                    self.master.playback = PlaybackState::Stopped;
                }
            }
            PlaybackState::Module => {
                self.master.pos.system += 1;
                let mut wrapped = false;
                loop {
                    if module
                        .pattern_at(self.master.pos.track, self.master.pos.system)
                        .is_some()
                    {
                        break;
                    }
                    if self.master.pos.track + 1 < self.module.track_list.track_count() {
                        self.master.pos.track += 1;
                        self.master.pos.system = 0;
                    } else if self.master.infinite && !wrapped {
                        wrapped = true;
                        self.master.pos.track = 0;
                        self.master.pos.system = 0;
                    } else {
                        self.master.playback = PlaybackState::Stopped;
                        return;
                    }
                }
                if !self.enter_pattern(module, true) {
                    self.master.playback = PlaybackState::Stopped;
                }
            }
        }
    }

    fn perform_pending_goto(&mut self, module: &Module) -> bool {
        let Some(target) = self.master.pending_goto.take() else {
            return false;
        };
        match target {
            GotoTarget::Score { piref, row } => {
                let Some(pattern) = module.pattern(piref) else {
                    self.master.playback = PlaybackState::Stopped;
                    return true;
                };
                if piref != self.master.pos.piref
                    && self.master.playback != PlaybackState::Pattern
                {
                    // Prefer a system of the current song that schedules the
                    // target; a jump outside the schedule plays the pattern
                    // in place and advancement resumes from the current
                    // system.
                    if let Some(song) = self
                        .module
                        .track_list
                        .song_index(self.master.pos.track)
                        .and_then(|index| self.module.song(index))
                    {
                        if let Some(system) = song
                            .pattern_instances
                            .iter()
                            .position(|candidate| *candidate == piref)
                        {
                            self.master.pos.system = system;
                        }
                    }
                }
                self.master.pos.piref = piref;
                self.master.pos.row = row;
                for iter in &mut self.cgiters {
                    iter.reset(pattern, row);
                }
                true
            }
            GotoTarget::Pattern(piref) => {
                self.master.playback = PlaybackState::Pattern;
                self.master.pos.piref = piref;
                self.master.pos.row = Tstamp::ZERO;
                if !self.enter_pattern(module, true) {
                    self.master.playback = PlaybackState::Stopped;
                }
                true
            }
        }
    }

    // ---------------------------------------------------------------------
    // Time arithmetic

    fn next_event_distance(&self, pattern: &Pattern) -> Tstamp {
        let mut dist = if self.master.pattern_delay.is_zero() {
            let mut dist = pattern.length - self.master.pos.row;
            for iter in &self.cgiters {
                if let Some(trigger) = iter.peek(pattern) {
                    let ahead = trigger.position - self.master.pos.row;
                    if !ahead.is_zero() {
                        dist = dist.min(ahead);
                    }
                }
            }
            dist
        } else {
            self.master.pattern_delay
        };
        if let Some(boundary) = self.master.next_slide_boundary() {
            dist = dist.min(boundary);
        }
        dist
    }

    fn advance_time(&mut self, dist: Tstamp) {
        if dist.is_zero() {
            return;
        }
        if self.master.pattern_delay.is_zero() {
            self.master.pos.row += dist;
        } else {
            self.master.pattern_delay =
                if dist >= self.master.pattern_delay {
                    Tstamp::ZERO
                } else {
                    self.master.pattern_delay - dist
                };
        }
        self.master.advance_slides(dist);
    }

    // ---------------------------------------------------------------------
    // Rendering

    fn update_voice_expression(&mut self, frames: usize) {
        for ch in 0..self.channels.len() {
            if !self.channels[ch].fg_slots.is_empty() {
                let params = self.channels[ch].voice_params(frames);
                for i in 0..self.channels[ch].fg_slots.len() {
                    let (slot, generation) = self.channels[ch].fg_slots[i];
                    self.pool.update_voice_params(slot, generation, params);
                }
            }
            self.channels[ch].advance_expression(frames, self.rate);
        }
    }

    fn render_frames(&mut self, offset: usize, frames: usize) {
        if frames == 0 {
            return;
        }
        let module = Arc::clone(&self.module);
        let gain = self.master.gain() * module.mix_gain();
        let [left, right] = &mut self.out;
        executor::render_segment(
            module.graph(),
            &self.device_states,
            &mut self.pool,
            &mut self.arena,
            self.rate,
            frames,
            gain,
            &mut left[offset..offset + frames],
            &mut right[offset..offset + frames],
        );
    }
}
