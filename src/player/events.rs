// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Trigger dispatch.
//!
//! Row processing walks the columns in channel order and each column's
//! triggers in row order, which fixes the ordering of triggers that share a
//! frame offset. Every trigger is routed through its registry entry; an
//! argument that fails validation is dropped without a sound.

use super::{
    master::{GotoTarget, JumpKey, Slide},
    PlaybackState, Player,
};
use crate::{
    composition::Pattern,
    events::{self, EventKind, EventValue},
    processors::NoteParams,
    time::{Tempo, Tstamp},
};
use log::debug;
use std::sync::Arc;

impl Player {
    /// Processes every trigger sitting exactly at the current row. Stops
    /// early when an event suspends row processing (pattern delay, a
    /// pending goto, pause, stop); unconsumed triggers stay queued in their
    /// cgiters and run when processing resumes.
    pub(super) fn process_row(&mut self, pattern: &Pattern) {
        for ch in 0..self.cgiters.len() {
            let mut order: u32 = 0;
            loop {
                let Some(trigger) = self.cgiters[ch].peek(pattern) else {
                    break;
                };
                if trigger.position != self.master.pos.row {
                    break;
                }
                self.cgiters[ch].consume();
                self.process_trigger(ch, &trigger.name, &trigger.argument, order, false);
                order += 1;

                if !self.master.pattern_delay.is_zero()
                    || self.master.pending_goto.is_some()
                    || self.master.is_paused
                    || self.master.playback == PlaybackState::Stopped
                {
                    return;
                }
            }
        }
    }

    /// Validates, gates on conditional state, and routes one trigger.
    pub(super) fn process_trigger(
        &mut self,
        ch: usize,
        name: &str,
        argument: &EventValue,
        order: u32,
        external: bool,
    ) {
        let Some(spec) = events::lookup(name) else {
            debug!("dropping unknown event \"{name}\"");
            return;
        };
        if external && !events::value_fits(spec, argument) {
            debug!("dropping external event \"{name}\" with bad argument {argument:?}");
            return;
        }

        let allows = self.channels[ch].cond.allows_processing();
        if spec.kind == EventKind::General {
            let cond = &mut self.channels[ch].cond;
            match name {
                "?" => {
                    if allows {
                        cond.evaluate(argument.as_bool().unwrap_or(false));
                    }
                }
                "?if" => cond.begin_if(),
                "?else" => cond.begin_else(),
                "?end" => cond.end(),
                // Comments and calls have no runtime effect.
                _ => {}
            }
            return;
        }
        if !allows {
            return;
        }

        match spec.kind {
            EventKind::Master => self.handle_master_event(ch, name, argument, order),
            EventKind::Channel => self.handle_channel_event(ch, name, argument),
            EventKind::AudioUnit => self.handle_au_event(ch, name, argument),
            EventKind::Control => self.handle_control_event(ch, name, argument),
            EventKind::General => unreachable!("general events were handled above"),
        }
    }

    fn handle_master_event(&mut self, ch: usize, name: &str, argument: &EventValue, order: u32) {
        let master = &mut self.master;
        match name {
            "set_tempo" => {
                if let Some(bpm) = argument.as_float() {
                    master.tempo = Tempo(bpm);
                    master.tempo_slide = None;
                }
            }
            "slide_tempo" => {
                if let Some(bpm) = argument.as_float() {
                    if master.tempo_slide_length.is_zero() {
                        master.tempo = Tempo(bpm);
                        master.tempo_slide = None;
                    } else {
                        master.tempo_slide = Some(Slide {
                            start: master.tempo.value(),
                            target: bpm,
                            length: master.tempo_slide_length,
                            elapsed: Tstamp::ZERO,
                        });
                    }
                }
            }
            "slide_tempo_length" => {
                if let Some(length) = argument.as_tstamp() {
                    master.tempo_slide_length = length;
                }
            }
            "set_volume" => {
                if let Some(db) = argument.as_float() {
                    master.volume = db;
                    master.volume_slide = None;
                }
            }
            "slide_volume" => {
                if let Some(db) = argument.as_float() {
                    if master.volume_slide_length.is_zero() {
                        master.volume = db;
                        master.volume_slide = None;
                    } else {
                        master.volume_slide = Some(Slide {
                            start: master.volume,
                            target: db,
                            length: master.volume_slide_length,
                            elapsed: Tstamp::ZERO,
                        });
                    }
                }
            }
            "slide_volume_length" => {
                if let Some(length) = argument.as_tstamp() {
                    master.volume_slide_length = length;
                }
            }
            "pattern_delay" => {
                if let Some(delay) = argument.as_tstamp() {
                    master.pattern_delay = delay;
                }
            }
            "set_jump_row" => {
                if let Some(row) = argument.as_tstamp() {
                    master.jump_row = row;
                }
            }
            "set_jump_pat_inst" => {
                if let Some(piref) = argument.as_pat_inst_ref() {
                    master.jump_piref = Some(piref);
                }
            }
            "set_jump_counter" => {
                if let Some(counter) = argument.as_int() {
                    master.jump_counter = counter as i32;
                }
            }
            "jump" => {
                let key = JumpKey {
                    piref: master.pos.piref,
                    row: master.pos.row,
                    channel: ch,
                    order,
                };
                let initial = master.jump_counter;
                let remaining = master.jump_contexts.entry(key).or_insert(initial);
                if *remaining > 0 {
                    *remaining -= 1;
                    master.pending_goto = Some(GotoTarget::Score {
                        piref: master.jump_piref.unwrap_or(master.pos.piref),
                        row: master.jump_row,
                    });
                }
            }
            _ => debug!("unhandled master event \"{name}\""),
        }
    }

    fn handle_channel_event(&mut self, ch: usize, name: &str, argument: &EventValue) {
        match name {
            "note_on" => {
                if let Some(pitch) = argument.as_float() {
                    self.do_note_on(
                        ch,
                        NoteParams {
                            pitch: Some(pitch),
                            hit: None,
                        },
                    );
                }
            }
            "note_off" => self.do_note_off(ch),
            "hit" => {
                if let Some(index) = argument.as_int() {
                    self.do_note_on(
                        ch,
                        NoteParams {
                            pitch: None,
                            hit: Some(index),
                        },
                    );
                }
            }
            "set_au_input" => {
                if let Some(index) = argument.as_int() {
                    let index = index as usize;
                    if index < self.module.audio_units.len() {
                        self.channels[ch].au_input = index;
                    }
                }
            }
            "set_force" => {
                if let Some(db) = argument.as_float() {
                    self.channels[ch].force.set(db);
                }
            }
            "slide_force" => {
                if let Some(db) = argument.as_float() {
                    let frames = self.slide_frames(self.channels[ch].force_slide_length);
                    self.channels[ch].force.start(db, frames);
                }
            }
            "slide_force_length" => {
                if let Some(length) = argument.as_tstamp() {
                    self.channels[ch].force_slide_length = length;
                }
            }
            "set_panning" => {
                if let Some(pan) = argument.as_float() {
                    self.channels[ch].panning.set(pan);
                }
            }
            "slide_panning" => {
                if let Some(pan) = argument.as_float() {
                    let frames = self.slide_frames(self.channels[ch].pan_slide_length);
                    self.channels[ch].panning.start(pan, frames);
                }
            }
            "slide_panning_length" => {
                if let Some(length) = argument.as_tstamp() {
                    self.channels[ch].pan_slide_length = length;
                }
            }
            "arpeggio_on" => {
                if let Some(pitch) = argument.as_float() {
                    self.channels[ch].arpeggio.alt_pitch = pitch;
                    self.channels[ch].arpeggio.active = true;
                }
            }
            "arpeggio_off" => self.channels[ch].arpeggio.active = false,
            "arpeggio_speed" => {
                if let Some(speed) = argument.as_float() {
                    self.channels[ch].arpeggio.speed = speed;
                }
            }
            "vibrato_speed" => {
                if let Some(speed) = argument.as_float() {
                    self.channels[ch].vibrato.speed = speed;
                }
            }
            "vibrato_depth" => {
                if let Some(depth) = argument.as_float() {
                    self.channels[ch].vibrato.depth = depth;
                }
            }
            "vibrato_delay" => {
                if let Some(delay) = argument.as_tstamp() {
                    let frames = self.slide_frames(delay);
                    self.channels[ch].vibrato.set_delay(frames);
                }
            }
            "tremolo_speed" => {
                if let Some(speed) = argument.as_float() {
                    self.channels[ch].tremolo.speed = speed;
                }
            }
            "tremolo_depth" => {
                if let Some(depth) = argument.as_float() {
                    self.channels[ch].tremolo.depth = depth;
                }
            }
            "tremolo_delay" => {
                if let Some(delay) = argument.as_tstamp() {
                    let frames = self.slide_frames(delay);
                    self.channels[ch].tremolo.set_delay(frames);
                }
            }
            "set_stream_name" => {
                if let Some(name) = argument.as_str() {
                    self.channels[ch].stream_name = Some(name.to_owned());
                }
            }
            "set_stream_value" => {
                if let Some(value) = argument.as_float() {
                    let channel = &mut self.channels[ch];
                    if let Some(name) = channel.stream_name.as_ref() {
                        if let Some(existing) = channel.streams.get_mut(name) {
                            *existing = value;
                        } else {
                            let key = name.clone();
                            channel.streams.insert(key, value);
                        }
                    }
                }
            }
            _ => debug!("unhandled channel event \"{name}\""),
        }
    }

    fn handle_au_event(&mut self, ch: usize, name: &str, argument: &EventValue) {
        if name == "set_cv_name" {
            if let Some(name) = argument.as_str() {
                self.channels[ch].cv_name = Some(name.to_owned());
            }
            return;
        }
        let au_index = self.channels[ch].au_input;
        let Some(au) = self.device_states.au_mut(au_index) else {
            return;
        };
        match name {
            "set_sustain" => {
                if let Some(sustain) = argument.as_float() {
                    au.sustain = crate::types::Normal::new(sustain);
                }
            }
            "set_cv_value" => {
                if let Some(value) = argument.as_float() {
                    if let Some(name) = self.channels[ch].cv_name.as_ref() {
                        if let Some(existing) = au.cv_values.get_mut(name) {
                            *existing = value;
                        } else {
                            au.cv_values.insert(name.clone(), value);
                        }
                    }
                }
            }
            "bypass_on" => au.bypass = true,
            "bypass_off" => au.bypass = false,
            _ => debug!("unhandled audio-unit event \"{name}\""),
        }
    }

    fn handle_control_event(&mut self, ch: usize, name: &str, argument: &EventValue) {
        match name {
            "pause" => self.master.is_paused = true,
            "resume" => self.master.is_paused = false,
            "play_pattern" => {
                if let Some(piref) = argument.as_pat_inst_ref() {
                    self.master.pending_goto = Some(GotoTarget::Pattern(piref));
                }
            }
            "infinite_on" => self.master.infinite = true,
            "infinite_off" => self.master.infinite = false,
            "set_env_name" => {
                if let Some(name) = argument.as_str() {
                    self.channels[ch].env_name = Some(name.to_owned());
                }
            }
            "set_env_value" => {
                if let Some(value) = argument.as_float() {
                    if let Some(name) = self.channels[ch].env_name.as_ref() {
                        if let Some(existing) = self.master.env.get_mut(name) {
                            *existing = value;
                        } else {
                            self.master.env.insert(name.clone(), value);
                        }
                    }
                }
            }
            _ => debug!("unhandled control event \"{name}\""),
        }
    }

    // -----------------------------------------------------------------

    fn slide_frames(&self, length: Tstamp) -> f64 {
        length.to_frames(self.master.tempo, self.rate)
    }

    fn do_note_on(&mut self, ch: usize, note: NoteParams) {
        let module = Arc::clone(&self.module);
        let graph = module.graph();

        // A retrigger releases the previous note first.
        self.do_note_off(ch);

        let unit = self.channels[ch].au_input;
        let Some(nodes) = graph.unit_voice_orders.get(unit) else {
            return;
        };
        if nodes.is_empty() {
            return;
        }
        if let Some(pitch) = note.pitch {
            self.channels[ch].base_pitch = pitch;
        }

        let members: Vec<_> = nodes
            .iter()
            .map(|&node| (node, &graph.nodes[node].spec))
            .collect();
        let params = self.channels[ch].voice_params(0);
        if let Some(group_id) =
            self.pool
                .reserve_group(ch, unit, &members, &note, self.rate, params)
        {
            self.reservations.add_entry(ch, group_id);
        }
        // The reservation pass hands the group back to the channel; one left
        // unconsumed would expire at the next chunk boundary.
        if let Some(group_id) = self.reservations.get_clear_entry(ch) {
            self.channels[ch].fg_group = Some(group_id);
            self.pool
                .group_handles_into(group_id, &mut self.channels[ch].fg_slots);
        }
    }

    fn do_note_off(&mut self, ch: usize) {
        if let Some(group_id) = self.channels[ch].fg_group.take() {
            self.pool.note_off_group(group_id);
        }
        self.channels[ch].fg_slots.clear();
    }
}
