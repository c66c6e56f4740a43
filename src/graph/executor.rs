// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Chunk execution over the compiled graph.
//!
//! Rendering one segment is two passes. The voice pass walks every active
//! voice group through its unit's voice processors in topological order,
//! scaling each group's contribution by the owning voice's force/panning
//! ramp as it lands in the mixed path. The mixed pass then runs the mixed
//! processors once each, again in topological order, and the master sink's
//! buffers are copied out to the audio stream. A cleared buffer anywhere
//! reads as silence, so a misconfigured device degrades to nothing instead
//! of an error.

use super::{work_buffer::WorkBuffer, CompiledGraph, DeviceStates, MASTER_NODE};
use crate::{
    alloc::AllocWatch,
    processors::VoiceRenderCtx,
    types::{AudioRate, SampleType},
    voices::VoicePool,
};

/// All buffers the executor needs for one chunk, reused across chunks. Slots
/// grow monotonically; the only render-path allocations happen here, under
/// the watch.
#[derive(Debug, Default)]
pub struct RenderArena {
    node_in: Vec<[WorkBuffer; 2]>,
    node_out: Vec<[WorkBuffer; 2]>,
    voice_in: Vec<[WorkBuffer; 2]>,
    voice_out: Vec<[WorkBuffer; 2]>,
    master: [WorkBuffer; 2],
    group_ids: Vec<u64>,
    group_slots: Vec<usize>,
}

impl RenderArena {
    /// Creates an arena for a graph with `node_count` processors.
    pub fn new(node_count: usize) -> Self {
        let make = || -> Vec<[WorkBuffer; 2]> {
            (0..node_count)
                .map(|_| [WorkBuffer::default(), WorkBuffer::default()])
                .collect()
        };
        Self {
            node_in: make(),
            node_out: make(),
            voice_in: make(),
            voice_out: make(),
            ..Self::default()
        }
    }

    /// Grows every buffer to `frames` capacity. Returns false (leaving the
    /// arena unchanged in length) if the watch denies an allocation.
    pub fn prepare(&mut self, frames: usize, watch: &mut AllocWatch) -> bool {
        for lane in [
            &mut self.node_in,
            &mut self.node_out,
            &mut self.voice_in,
            &mut self.voice_out,
        ] {
            for pair in lane.iter_mut() {
                for buffer in pair.iter_mut() {
                    if !buffer.reserve(frames, watch) {
                        return false;
                    }
                }
            }
        }
        for buffer in self.master.iter_mut() {
            if !buffer.reserve(frames, watch) {
                return false;
            }
        }
        true
    }

    fn begin_segment(&mut self, frames: usize) {
        for lane in [&mut self.node_in, &mut self.node_out] {
            for pair in lane.iter_mut() {
                for buffer in pair.iter_mut() {
                    buffer.begin(frames);
                }
            }
        }
        for buffer in self.master.iter_mut() {
            buffer.begin(frames);
        }
    }
}

/// Renders `frames` frames of the graph into `out_left`/`out_right`
/// (each exactly `frames` long), with `master_gain` applied at the sink.
#[allow(clippy::too_many_arguments)]
pub fn render_segment(
    graph: &CompiledGraph,
    states: &DeviceStates,
    pool: &mut VoicePool,
    arena: &mut RenderArena,
    rate: AudioRate,
    frames: usize,
    master_gain: f64,
    out_left: &mut [SampleType],
    out_right: &mut [SampleType],
) {
    debug_assert_eq!(out_left.len(), frames);
    debug_assert_eq!(out_right.len(), frames);

    arena.begin_segment(frames);
    render_voice_groups(graph, states, pool, arena, rate, frames);
    render_mixed(graph, states, arena, frames);

    let gain = master_gain as SampleType;
    for (port, out) in [&mut *out_left, &mut *out_right].into_iter().enumerate() {
        match arena.master[port].read() {
            Some(src) => {
                for (d, s) in out.iter_mut().zip(src.iter()) {
                    *d = *s * gain;
                }
            }
            None => out.fill(0.0),
        }
    }
}

fn render_voice_groups(
    graph: &CompiledGraph,
    states: &DeviceStates,
    pool: &mut VoicePool,
    arena: &mut RenderArena,
    rate: AudioRate,
    frames: usize,
) {
    let mut group_ids = std::mem::take(&mut arena.group_ids);
    let mut group_slots = std::mem::take(&mut arena.group_slots);
    group_ids.clear();
    group_ids.extend_from_slice(pool.active_group_ids());

    for &group_id in &group_ids {
        pool.group_slots_into(group_id, &mut group_slots);
        let Some(&first_slot) = group_slots.first() else {
            continue;
        };
        let unit = pool.voice(first_slot).map_or(0, |v| v.unit);
        let au = states.au(unit);
        if au.is_some_and(|au| au.bypass) {
            continue;
        }
        let sustain = au.map_or(0.0, |au| au.sustain.value());

        let voice_nodes = match graph.unit_voice_orders.get(unit) {
            Some(nodes) => nodes.as_slice(),
            None => continue,
        };
        for &node in voice_nodes {
            for buffer in arena.voice_in[node].iter_mut() {
                buffer.begin(frames);
            }
            for buffer in arena.voice_out[node].iter_mut() {
                buffer.begin(frames);
            }
        }

        for &node in voice_nodes {
            let Some(&slot) = group_slots
                .iter()
                .find(|&&s| pool.voice(s).is_some_and(|v| v.node == node))
            else {
                continue;
            };
            for &edge_index in &graph.in_edges[node] {
                let edge = graph.edges[edge_index];
                arena.voice_in[node][edge.dst_port as usize]
                    .mix_from(&arena.voice_out[edge.src][edge.src_port as usize]);
            }
            let Some(voice) = pool.voice_mut(slot) else {
                continue;
            };
            let ctx = VoiceRenderCtx {
                freq: voice.params.freq,
                sustain,
                rate,
            };
            let result = voice.state.render_voice(
                &ctx,
                &arena.voice_in[node][..],
                &mut arena.voice_out[node][..],
                frames,
            );
            if result.finished {
                voice.finished = true;
                for buffer in arena.voice_out[node].iter_mut() {
                    buffer.set_final(true);
                }
            }
        }

        // Everything this group sends across the voice/mixed boundary lands
        // additively in the receivers' input buffers, scaled by the sending
        // voice's expression ramp.
        for edge in &graph.edges {
            if edge.dst != MASTER_NODE && graph.nodes[edge.dst].is_voice {
                continue;
            }
            let src_node = &graph.nodes[edge.src];
            if !src_node.is_voice || src_node.unit != unit {
                continue;
            }
            let Some(&slot) = group_slots
                .iter()
                .find(|&&s| pool.voice(s).is_some_and(|v| v.node == edge.src))
            else {
                continue;
            };
            let params = pool.voice(slot).map(|v| v.params).unwrap_or_default();
            let (gain_start, gain_end) = if edge.src_port == 0 {
                params.left_gains()
            } else {
                params.right_gains()
            };
            let src_buf = &arena.voice_out[edge.src][edge.src_port as usize];
            if edge.dst == MASTER_NODE {
                arena.master[edge.dst_port as usize].mix_from_scaled(src_buf, gain_start, gain_end);
            } else {
                arena.node_in[edge.dst][edge.dst_port as usize]
                    .mix_from_scaled(src_buf, gain_start, gain_end);
            }
        }
    }

    arena.group_ids = group_ids;
    arena.group_slots = group_slots;
}

fn render_mixed(
    graph: &CompiledGraph,
    states: &DeviceStates,
    arena: &mut RenderArena,
    frames: usize,
) {
    for &node in &graph.mixed_order {
        for &edge_index in &graph.in_edges[node] {
            let edge = graph.edges[edge_index];
            if graph.nodes[edge.src].is_voice {
                // Voice contributions were accumulated during the voice pass.
                continue;
            }
            arena.node_in[node][edge.dst_port as usize]
                .mix_from(&arena.node_out[edge.src][edge.src_port as usize]);
        }
        let unit = graph.nodes[node].unit;
        if states.au(unit).is_some_and(|au| au.bypass) {
            for port in 0..2 {
                let src = &arena.node_in[node][port];
                arena.node_out[node][port].copy_from(src);
            }
        } else {
            graph.nodes[node].spec.render_mixed(
                &arena.node_in[node][..],
                &mut arena.node_out[node][..],
                frames,
            );
        }
    }

    for &edge_index in &graph.master_in {
        let edge = graph.edges[edge_index];
        if graph.nodes[edge.src].is_voice {
            continue;
        }
        arena.master[edge.dst_port as usize]
            .mix_from(&arena.node_out[edge.src][edge.src_port as usize]);
    }
}
