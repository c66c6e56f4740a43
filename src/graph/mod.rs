// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! The device graph: audio units containing processors (and nested
//! sub-units), wired port-to-port into a DAG that ends at the master sink.
//!
//! A module carries the *description* ([AudioUnitSpec], [Connection]); at
//! load time the description is flattened into a [CompiledGraph] whose
//! processor-level topological order drives rendering. Cycles are rejected
//! at load; the render path assumes acyclicity.

use crate::processors::ProcessorSpec;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

pub use compile::compile;
pub use device_states::{AuState, DeviceStates};
pub use executor::RenderArena;
pub use work_buffer::WorkBuffer;

mod compile;
mod device_states;
pub(crate) mod executor;
mod work_buffer;

/// Quick imports for graph handling.
pub mod prelude {
    pub use super::{
        AudioUnitSpec, AudioUnitSpecBuilder, CompiledGraph, Connection, DeviceStates, Endpoint,
        EndpointNode, WorkBuffer,
    };
}

/// Audio ports per device boundary: 0 is left, 1 is right.
pub const UNIT_PORTS: u8 = 2;

/// One side of a connection, within the scope of a single audio unit's
/// connection list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointNode {
    /// The containing unit's own boundary. As a sender this is the unit's
    /// input port (signal arriving from outside); as a receiver it is the
    /// unit's output port. At the top level, the receiving boundary is the
    /// master sink.
    UnitBoundary,
    /// A processor of this unit, by index.
    Processor(usize),
    /// A nested unit, by index.
    SubUnit(usize),
}

/// A port on an [EndpointNode].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[allow(missing_docs)]
    pub node: EndpointNode,
    #[allow(missing_docs)]
    pub port: u8,
}
impl Endpoint {
    #[allow(missing_docs)]
    pub fn new(node: EndpointNode, port: u8) -> Self {
        Self { node, port }
    }

    /// A processor endpoint.
    pub fn processor(index: usize, port: u8) -> Self {
        Self::new(EndpointNode::Processor(index), port)
    }

    /// A sub-unit (or, at top level, audio-unit) endpoint.
    pub fn sub_unit(index: usize, port: u8) -> Self {
        Self::new(EndpointNode::SubUnit(index), port)
    }

    /// The unit boundary (master sink at top level).
    pub fn boundary(port: u8) -> Self {
        Self::new(EndpointNode::UnitBoundary, port)
    }
}

/// A directed connection from a sender port to a receiver port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[allow(missing_docs)]
    pub from: Endpoint,
    #[allow(missing_docs)]
    pub to: Endpoint,
}
impl Connection {
    #[allow(missing_docs)]
    pub fn new(from: Endpoint, to: Endpoint) -> Self {
        Self { from, to }
    }
}

/// Description of one audio unit: processors, nested units, internal wiring.
#[derive(Clone, Debug, Default, PartialEq, Builder, Serialize, Deserialize)]
#[builder(build_fn(private, name = "build_from_builder"))]
pub struct AudioUnitSpec {
    /// Display name; purely diagnostic.
    #[builder(default)]
    #[serde(default)]
    pub name: Option<String>,
    #[allow(missing_docs)]
    #[builder(default, setter(each(name = "processor")))]
    #[serde(default)]
    pub processors: Vec<ProcessorSpec>,
    #[allow(missing_docs)]
    #[builder(default, setter(each(name = "sub_unit")))]
    #[serde(default)]
    pub sub_units: Vec<AudioUnitSpec>,
    #[allow(missing_docs)]
    #[builder(default, setter(each(name = "connection")))]
    #[serde(default)]
    pub connections: Vec<Connection>,
}
impl AudioUnitSpecBuilder {
    /// Builds the [AudioUnitSpec]. Wiring is validated later, when the whole
    /// graph is compiled.
    pub fn build(&self) -> anyhow::Result<AudioUnitSpec> {
        self.build_from_builder()
            .map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}

/// Sentinel node index for the master sink in compiled edges.
pub const MASTER_NODE: usize = usize::MAX;

/// One flattened processor-to-processor (or processor-to-master) edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    #[allow(missing_docs)]
    pub src: usize,
    #[allow(missing_docs)]
    pub src_port: u8,
    /// Receiver node, or [MASTER_NODE].
    pub dst: usize,
    #[allow(missing_docs)]
    pub dst_port: u8,
}

/// One node of the flattened graph.
#[derive(Clone, Debug)]
pub struct CompiledNode {
    /// Index of the top-level audio unit this processor belongs to.
    pub unit: usize,
    #[allow(missing_docs)]
    pub spec: ProcessorSpec,
    /// Whether this node renders per-voice.
    pub is_voice: bool,
}

/// The flattened, validated, topologically-sorted device graph.
#[derive(Clone, Debug, Default)]
pub struct CompiledGraph {
    #[allow(missing_docs)]
    pub nodes: Vec<CompiledNode>,
    #[allow(missing_docs)]
    pub edges: Vec<Edge>,
    /// All nodes in topological order.
    pub order: Vec<usize>,
    /// Mixed-path nodes in topological order.
    pub mixed_order: Vec<usize>,
    /// Per top-level unit: its voice nodes in topological order.
    pub unit_voice_orders: Vec<Vec<usize>>,
    /// Per node: indices into `edges` of its incoming edges.
    pub in_edges: Vec<Vec<usize>>,
    /// Indices into `edges` of the master sink's incoming edges.
    pub master_in: Vec<usize>,
}
impl CompiledGraph {
    /// Number of top-level audio units.
    pub fn unit_count(&self) -> usize {
        self.unit_voice_orders.len()
    }
}
