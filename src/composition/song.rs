// Copyright (c) 2024 Mike Tsao. All rights reserved.

use super::PatInstRef;
use crate::{time::Tempo, types::limits};
use anyhow::anyhow;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// A song: an ordered schedule of pattern instances ("systems"), plus the
/// starting tempo and mixing volume.
#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
#[builder(build_fn(private, name = "build_from_builder"))]
pub struct Song {
    /// The systems, in playback order.
    #[builder(default, setter(each(name = "system")))]
    pub pattern_instances: Vec<PatInstRef>,
    /// Tempo at the start of the song.
    #[builder(default)]
    #[serde(default)]
    pub initial_tempo: Tempo,
    /// Global volume at the start of the song, in dB (0.0 or below).
    #[builder(default)]
    #[serde(default)]
    pub initial_volume: f64,
}
impl SongBuilder {
    /// Builds the [Song], validating it.
    pub fn build(&self) -> anyhow::Result<Song> {
        let song = self
            .build_from_builder()
            .map_err(|e| anyhow!(e.to_string()))?;
        song.validate()?;
        Ok(song)
    }
}
impl Song {
    /// The pattern instance at the given system index.
    pub fn system(&self, index: usize) -> Option<PatInstRef> {
        self.pattern_instances.get(index).copied()
    }

    #[allow(missing_docs)]
    pub fn system_count(&self) -> usize {
        self.pattern_instances.len()
    }

    /// Structural checks. Pattern references are resolved by the module.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.initial_tempo.is_valid() {
            return Err(anyhow!("initial tempo {} is out of range", self.initial_tempo));
        }
        if self.initial_volume > 0.0 || !self.initial_volume.is_finite() {
            return Err(anyhow!(
                "initial volume {} dB is above unity",
                self.initial_volume
            ));
        }
        for piref in &self.pattern_instances {
            if !piref.is_valid() {
                return Err(anyhow!("pattern instance reference {piref} is out of range"));
            }
        }
        Ok(())
    }
}

/// The track list: which song each track plays, in order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackList {
    #[allow(missing_docs)]
    pub songs: Vec<u16>,
}
impl TrackList {
    /// The song index played by the given track.
    pub fn song_index(&self, track: usize) -> Option<usize> {
        self.songs.get(track).map(|s| *s as usize)
    }

    #[allow(missing_docs)]
    pub fn track_count(&self) -> usize {
        self.songs.len()
    }

    fn validate(&self, song_count: usize) -> anyhow::Result<()> {
        if self.songs.len() > limits::TRACKS_MAX {
            return Err(anyhow!("too many tracks ({})", self.songs.len()));
        }
        for (track, song) in self.songs.iter().enumerate() {
            if *song as usize >= song_count {
                return Err(anyhow!(
                    "track {track} refers to song {song}, but only {song_count} songs exist"
                ));
            }
        }
        Ok(())
    }

    /// Structural checks against the module's song table.
    pub fn validate_against(&self, song_count: usize) -> anyhow::Result<()> {
        self.validate(song_count)
    }
}

/// Per-channel initial state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelDefaults {
    /// Index of the audio unit this channel plays at start.
    #[serde(default)]
    pub au_input: usize,
    /// Optional default expression name.
    #[serde(default)]
    pub expression: Option<String>,
}
impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            au_input: 0,
            expression: None,
        }
    }
}
impl ChannelDefaults {
    fn validate(&self, au_count: usize) -> anyhow::Result<()> {
        if self.au_input >= au_count.max(1) {
            return Err(anyhow!(
                "channel defaults refer to audio unit {}, but only {au_count} exist",
                self.au_input
            ));
        }
        Ok(())
    }

    /// Structural checks against the module's audio-unit table.
    pub fn validate_against(&self, au_count: usize) -> anyhow::Result<()> {
        self.validate(au_count)
    }
}
