// Copyright (c) 2024 Mike Tsao. All rights reserved.

#![warn(missing_docs)]

//! Weft is a tracker-style music rendering engine. It loads an immutable
//! score plus device-graph description (a [Module](composition::Module)),
//! and a [Player](player::Player) renders it into interleaved stereo audio
//! with sample-accurate event timing.
//!
//! The renderer is a voice-based polyphonic synthesizer: a master sequencer
//! walks tracks, songs, patterns, and rows, dispatching triggers to a DAG of
//! audio units whose processors render per-voice or per-chunk into work
//! buffers that flow edge-by-edge into the master sink.

/// Allocation fault injection for render-path testing.
pub mod alloc;
/// The immutable score: patterns, songs, tracks, and the [Module](composition::Module).
pub mod composition;
/// The event registry and conditional-execution state.
pub mod events;
/// The device graph: description, compilation, work buffers, execution.
pub mod graph;
/// The master sequencer and everything it owns.
pub mod player;
/// The closed set of processors.
pub mod processors;
/// Musical time: exact rational timestamps and tempo.
pub mod time;
/// Scalar audio types and engine limits.
pub mod types;
/// The voice pool and group allocator.
pub mod voices;

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use crate::composition::prelude::*;
    pub use crate::events::prelude::*;
    pub use crate::graph::prelude::*;
    pub use crate::player::prelude::*;
    pub use crate::processors::prelude::*;
    pub use crate::time::prelude::*;
    pub use crate::types::prelude::*;
    pub use crate::voices::prelude::*;
}
