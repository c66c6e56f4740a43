// Copyright (c) 2024 Mike Tsao. All rights reserved.

use super::{ChannelDefaults, PatInstRef, Pattern, Song, TrackList};
use crate::{
    graph::{self, AudioUnitSpec, CompiledGraph, Connection},
    types::limits,
};
use anyhow::{anyhow, Context};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural reasons a module fails to load. Wrapped in [anyhow::Error]
/// with context at the load boundary.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A song schedules a pattern the module doesn't contain.
    #[error("song {song} schedules {piref}, which does not exist")]
    MissingPattern {
        #[allow(missing_docs)]
        song: usize,
        #[allow(missing_docs)]
        piref: PatInstRef,
    },
    /// A table exceeds an engine maximum.
    #[error("too many {what} ({count})")]
    LimitExceeded {
        #[allow(missing_docs)]
        what: &'static str,
        #[allow(missing_docs)]
        count: usize,
    },
    /// The module-wide mixing volume is above unity or not finite.
    #[error("mix volume {0} dB is above unity")]
    BadMixVolume(f64),
}

/// A complete composition: the score plus the device-graph description. A
/// [Module] is immutable once loaded and is shared by reference with the
/// player; everything mutable at render time lives in the player's own
/// state.
#[derive(Clone, Debug, Default, Builder, Serialize, Deserialize)]
#[builder(build_fn(private, name = "build_from_builder"))]
pub struct Module {
    #[allow(missing_docs)]
    #[builder(default)]
    #[serde(default)]
    pub track_list: TrackList,
    #[allow(missing_docs)]
    #[builder(default, setter(each(name = "song")))]
    #[serde(default)]
    pub songs: Vec<Song>,
    /// Patterns, indexed by [PatInstRef::pat].
    #[builder(default, setter(each(name = "pattern")))]
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[allow(missing_docs)]
    #[builder(default, setter(each(name = "channel_default")))]
    #[serde(default)]
    pub channel_defaults: Vec<ChannelDefaults>,
    #[allow(missing_docs)]
    #[builder(default, setter(each(name = "audio_unit")))]
    #[serde(default)]
    pub audio_units: Vec<AudioUnitSpec>,
    /// Top-level wiring: audio units to each other and to the master sink.
    #[builder(default, setter(each(name = "connection")))]
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Module-wide mixing volume in dB.
    #[builder(default)]
    #[serde(default)]
    pub mix_volume: f64,

    #[builder(default, setter(skip))]
    #[serde(skip)]
    graph: CompiledGraph,
}

impl ModuleBuilder {
    /// Builds and validates the [Module], compiling its device graph.
    pub fn build(&self) -> anyhow::Result<Module> {
        let mut module = self
            .build_from_builder()
            .map_err(|e| anyhow!(e.to_string()))?;
        module.finalize()?;
        Ok(module)
    }
}

impl Module {
    /// Loads a module from its serialized JSON form. Everything structural
    /// is validated here; a successfully loaded module cannot fail later.
    pub fn from_json(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut module: Module =
            serde_json::from_slice(bytes).context("parsing module description")?;
        module.finalize()?;
        Ok(module)
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        if self.songs.len() > limits::SONGS_MAX {
            return Err(ModuleError::LimitExceeded {
                what: "songs",
                count: self.songs.len(),
            }
            .into());
        }
        if self.patterns.len() > limits::PATTERNS_MAX {
            return Err(ModuleError::LimitExceeded {
                what: "patterns",
                count: self.patterns.len(),
            }
            .into());
        }
        if self.channel_defaults.len() > limits::CHANNELS {
            return Err(ModuleError::LimitExceeded {
                what: "channel defaults",
                count: self.channel_defaults.len(),
            }
            .into());
        }
        if !(self.mix_volume <= 0.0 && self.mix_volume.is_finite()) {
            return Err(ModuleError::BadMixVolume(self.mix_volume).into());
        }

        self.track_list.validate_against(self.songs.len())?;
        for (index, song) in self.songs.iter().enumerate() {
            song.validate().with_context(|| format!("song {index}"))?;
            for piref in &song.pattern_instances {
                if piref.pat as usize >= self.patterns.len() {
                    return Err(ModuleError::MissingPattern {
                        song: index,
                        piref: *piref,
                    }
                    .into());
                }
            }
        }
        for (index, pattern) in self.patterns.iter().enumerate() {
            pattern
                .validate()
                .with_context(|| format!("pattern {index}"))?;
        }
        let au_count = self.audio_units.len();
        for (index, defaults) in self.channel_defaults.iter().enumerate() {
            defaults
                .validate_against(au_count)
                .with_context(|| format!("channel {index}"))?;
        }

        self.graph = graph::compile(&self.audio_units, &self.connections)
            .context("compiling device graph")?;
        Ok(())
    }

    /// The compiled device graph.
    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// The linear mixing gain corresponding to [Module::mix_volume].
    pub fn mix_gain(&self) -> f64 {
        10f64.powf(self.mix_volume / 20.0)
    }

    /// The pattern a reference resolves to.
    pub fn pattern(&self, piref: PatInstRef) -> Option<&Pattern> {
        self.patterns.get(piref.pat as usize)
    }

    #[allow(missing_docs)]
    pub fn song(&self, index: usize) -> Option<&Song> {
        self.songs.get(index)
    }

    /// Resolves `(track, system)` to the scheduled pattern instance.
    pub fn pattern_at(&self, track: usize, system: usize) -> Option<(PatInstRef, &Pattern)> {
        let song = self.song(self.track_list.song_index(track)?)?;
        let piref = song.system(system)?;
        self.pattern(piref).map(|pattern| (piref, pattern))
    }

    /// The initial channel state for `channel`.
    pub fn channel_defaults(&self, channel: usize) -> ChannelDefaults {
        self.channel_defaults
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        composition::{PatternBuilder, SongBuilder, Trigger},
        events::EventValue,
        graph::{AudioUnitSpecBuilder, Endpoint},
        processors::ProcessorSpec,
        time::Tstamp,
    };

    fn debug_unit() -> AudioUnitSpec {
        AudioUnitSpecBuilder::default()
            .processor(ProcessorSpec::Debug)
            .connection(Connection::new(
                Endpoint::processor(0, 0),
                Endpoint::boundary(0),
            ))
            .connection(Connection::new(
                Endpoint::processor(0, 1),
                Endpoint::boundary(1),
            ))
            .build()
            .unwrap()
    }

    fn one_pattern_module() -> Module {
        ModuleBuilder::default()
            .track_list(TrackList { songs: vec![0] })
            .song(
                SongBuilder::default()
                    .system(PatInstRef::new(0, 0))
                    .build()
                    .unwrap(),
            )
            .pattern(
                PatternBuilder::default()
                    .length(Tstamp::new(4, 0))
                    .trigger(
                        0,
                        Trigger::new(Tstamp::ZERO, "note_on", EventValue::Float(60.0)).unwrap(),
                    )
                    .build()
                    .unwrap(),
            )
            .audio_unit(debug_unit())
            .connection(Connection::new(
                Endpoint::sub_unit(0, 0),
                Endpoint::boundary(0),
            ))
            .connection(Connection::new(
                Endpoint::sub_unit(0, 1),
                Endpoint::boundary(1),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_produces_a_playable_module() {
        let module = one_pattern_module();
        assert_eq!(module.graph().nodes.len(), 1);
        let (piref, pattern) = module.pattern_at(0, 0).unwrap();
        assert_eq!(piref, PatInstRef::new(0, 0));
        assert_eq!(pattern.length, Tstamp::new(4, 0));
        assert!(module.pattern_at(0, 1).is_none(), "only one system");
        assert!(module.pattern_at(1, 0).is_none(), "only one track");
    }

    #[test]
    fn dangling_pattern_reference_is_rejected() {
        let result = ModuleBuilder::default()
            .track_list(TrackList { songs: vec![0] })
            .song(
                SongBuilder::default()
                    .system(PatInstRef::new(7, 0))
                    .build()
                    .unwrap(),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn json_round_trip() {
        let module = one_pattern_module();
        let json = serde_json::to_vec(&module).unwrap();
        let loaded = Module::from_json(&json).unwrap();
        assert_eq!(loaded.patterns, module.patterns);
        assert_eq!(loaded.songs, module.songs);
        assert_eq!(
            loaded.graph().nodes.len(),
            module.graph().nodes.len(),
            "the graph recompiles from the description"
        );
    }

    #[test]
    fn malformed_json_is_rejected_with_context() {
        let err = Module::from_json(b"{\"songs\": 3}").unwrap_err();
        assert!(err.to_string().contains("parsing module description"));
    }
}
