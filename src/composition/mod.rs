// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! The score: everything the sequencer reads and never writes. Patterns
//! hold timestamp-ordered triggers per channel; songs schedule pattern
//! instances; the track list picks songs; the [Module] bundles the score
//! with the device-graph description and validates the whole thing at load.

pub use module::{Module, ModuleBuilder, ModuleError};
pub use pattern::{Column, PatInstRef, Pattern, PatternBuilder, Trigger};
pub use song::{ChannelDefaults, Song, SongBuilder, TrackList};

mod module;
mod pattern;
mod song;

/// Quick imports for score handling.
pub mod prelude {
    pub use super::{
        ChannelDefaults, Module, ModuleBuilder, PatInstRef, Pattern, PatternBuilder, Song,
        SongBuilder, TrackList, Trigger,
    };
}
