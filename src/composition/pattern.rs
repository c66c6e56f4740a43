// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    events::{self, EventValue},
    time::Tstamp,
    types::limits,
};
use anyhow::anyhow;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(pattern, instance)` pair. The same pattern can be scheduled several
/// times in a song; each scheduling is a distinct instance with its own
/// identity (jump bookkeeping is keyed by instance, not by pattern).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(from = "(u16, u16)", into = "(u16, u16)")]
pub struct PatInstRef {
    #[allow(missing_docs)]
    pub pat: u16,
    #[allow(missing_docs)]
    pub inst: u16,
}
impl PatInstRef {
    #[allow(missing_docs)]
    pub fn new(pat: u16, inst: u16) -> Self {
        Self { pat, inst }
    }

    /// Whether both components are within the engine maxima.
    pub fn is_valid(&self) -> bool {
        (self.pat as usize) < limits::PATTERNS_MAX
            && (self.inst as usize) < limits::PAT_INSTANCES_MAX
    }
}
impl From<(u16, u16)> for PatInstRef {
    fn from(value: (u16, u16)) -> Self {
        Self::new(value.0, value.1)
    }
}
impl From<PatInstRef> for (u16, u16) {
    fn from(value: PatInstRef) -> Self {
        (value.pat, value.inst)
    }
}
impl fmt::Display for PatInstRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pat {} inst {}", self.pat, self.inst)
    }
}

/// A timestamped event in a column. The argument is typed and validated at
/// construction, so the render path never sees a malformed trigger.
#[derive(Clone, Debug, PartialEq)]
pub struct Trigger {
    #[allow(missing_docs)]
    pub position: Tstamp,
    /// The event name, as found in the registry.
    pub name: String,
    #[allow(missing_docs)]
    pub argument: EventValue,
}
impl Trigger {
    /// Creates a validated trigger. Fails if the event name is unknown or the
    /// argument doesn't fit the event's schema.
    pub fn new(
        position: Tstamp,
        name: impl Into<String>,
        argument: EventValue,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let spec =
            events::lookup(&name).ok_or_else(|| anyhow!("unknown event name \"{name}\""))?;
        if !events::value_fits(spec, &argument) {
            return Err(anyhow!(
                "argument {argument:?} does not fit event \"{name}\""
            ));
        }
        Ok(Self {
            position,
            name,
            argument,
        })
    }
}

// The serialized shape of a trigger: position, event name, raw argument.
// Validation happens during deserialization so that a loaded Module is
// correct by construction.
#[derive(Serialize, Deserialize)]
struct RawTrigger {
    position: Tstamp,
    event: String,
    #[serde(default)]
    argument: serde_json::Value,
}
impl Serialize for Trigger {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawTrigger {
            position: self.position,
            event: self.name.clone(),
            argument: self.argument.to_json(),
        }
        .serialize(serializer)
    }
}
impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let raw = RawTrigger::deserialize(deserializer)?;
        let spec = events::lookup(&raw.event)
            .ok_or_else(|| D::Error::custom(format!("unknown event name \"{}\"", raw.event)))?;
        let argument = events::parse_argument(spec, &raw.argument).ok_or_else(|| {
            D::Error::custom(format!(
                "argument {} does not fit event \"{}\"",
                raw.argument, raw.event
            ))
        })?;
        Ok(Self {
            position: raw.position,
            name: raw.event,
            argument,
        })
    }
}

/// One channel's triggers within a pattern, ordered by timestamp.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Column {
    #[allow(missing_docs)]
    pub triggers: Vec<Trigger>,
}
impl Column {
    /// Index of the first trigger at or after `position`.
    pub fn first_index_at_or_after(&self, position: Tstamp) -> usize {
        self.triggers.partition_point(|t| t.position < position)
    }

    fn validate(&self, length: Tstamp) -> anyhow::Result<()> {
        let mut prev = Tstamp::ZERO;
        for trigger in &self.triggers {
            if trigger.position < prev {
                return Err(anyhow!(
                    "trigger \"{}\" at {} is before its predecessor at {}",
                    trigger.name,
                    trigger.position,
                    prev
                ));
            }
            if trigger.position > length {
                return Err(anyhow!(
                    "trigger \"{}\" at {} is past the pattern length {}",
                    trigger.name,
                    trigger.position,
                    length
                ));
            }
            prev = trigger.position;
        }
        Ok(())
    }
}

/// A pattern: a fixed musical length plus one column of triggers per channel.
#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
#[builder(build_fn(private, name = "build_from_builder"))]
pub struct Pattern {
    /// Musical length. Rows past this never play.
    pub length: Tstamp,
    /// One column per channel. Channels past the end of this list are empty.
    #[builder(default)]
    pub columns: Vec<Column>,
}
impl PatternBuilder {
    /// Adds a trigger to the given channel's column, keeping the column
    /// sorted insertion-order-stable.
    pub fn trigger(&mut self, channel: usize, trigger: Trigger) -> &mut Self {
        let columns = self.columns.get_or_insert_with(Default::default);
        if columns.len() <= channel {
            columns.resize(channel + 1, Column::default());
        }
        columns[channel].triggers.push(trigger);
        self
    }

    /// Builds the [Pattern], validating it.
    pub fn build(&self) -> anyhow::Result<Pattern> {
        let pattern = self
            .build_from_builder()
            .map_err(|e| anyhow!(e.to_string()))?;
        pattern.validate()?;
        Ok(pattern)
    }
}
impl Pattern {
    /// The column for a channel, if it has one.
    pub fn column(&self, channel: usize) -> Option<&Column> {
        self.columns.get(channel)
    }

    /// Structural checks. Called for every pattern at module load.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.length <= Tstamp::ZERO {
            return Err(anyhow!("pattern length {} is not positive", self.length));
        }
        if self.columns.len() > limits::CHANNELS {
            return Err(anyhow!(
                "pattern has {} columns; at most {} channels exist",
                self.columns.len(),
                limits::CHANNELS
            ));
        }
        for (index, column) in self.columns.iter().enumerate() {
            column
                .validate(self.length)
                .map_err(|e| anyhow!("column {index}: {e}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note_on(position: Tstamp, pitch: f64) -> Trigger {
        Trigger::new(position, "note_on", EventValue::Float(pitch)).unwrap()
    }

    #[test]
    fn trigger_construction_validates() {
        assert!(Trigger::new(Tstamp::ZERO, "note_on", EventValue::Float(60.0)).is_ok());
        assert!(
            Trigger::new(Tstamp::ZERO, "nonsense", EventValue::None).is_err(),
            "unknown names should be rejected"
        );
        assert!(
            Trigger::new(Tstamp::ZERO, "note_off", EventValue::Int(3)).is_err(),
            "note_off takes no argument"
        );
        assert!(
            Trigger::new(Tstamp::ZERO, "set_tempo", EventValue::Float(0.0)).is_err(),
            "tempo outside range should be rejected"
        );
    }

    #[test]
    fn pattern_builder_builds_sorted_columns() {
        let pattern = PatternBuilder::default()
            .length(Tstamp::new(4, 0))
            .trigger(0, note_on(Tstamp::ZERO, 60.0))
            .trigger(0, note_on(Tstamp::new(1, 0), 62.0))
            .trigger(2, note_on(Tstamp::new(2, 0), 64.0))
            .build()
            .unwrap();
        assert_eq!(pattern.columns.len(), 3);
        assert_eq!(pattern.column(0).unwrap().triggers.len(), 2);
        assert!(pattern.column(1).unwrap().triggers.is_empty());
    }

    #[test]
    fn pattern_validation_rejects_bad_shapes() {
        assert!(
            PatternBuilder::default()
                .length(Tstamp::ZERO)
                .build()
                .is_err(),
            "zero-length patterns are not playable"
        );
        assert!(
            PatternBuilder::default()
                .length(Tstamp::new(1, 0))
                .trigger(0, note_on(Tstamp::new(2, 0), 60.0))
                .build()
                .is_err(),
            "triggers past the pattern length are invalid"
        );
        assert!(
            PatternBuilder::default()
                .length(Tstamp::new(4, 0))
                .trigger(0, note_on(Tstamp::new(1, 0), 60.0))
                .trigger(0, note_on(Tstamp::ZERO, 62.0))
                .build()
                .is_err(),
            "out-of-order triggers are invalid"
        );
    }

    #[test]
    fn column_cursor_lookup() {
        let pattern = PatternBuilder::default()
            .length(Tstamp::new(4, 0))
            .trigger(0, note_on(Tstamp::ZERO, 60.0))
            .trigger(0, note_on(Tstamp::new(1, 0), 62.0))
            .trigger(0, note_on(Tstamp::new(1, 0), 64.0))
            .build()
            .unwrap();
        let column = pattern.column(0).unwrap();
        assert_eq!(column.first_index_at_or_after(Tstamp::ZERO), 0);
        assert_eq!(column.first_index_at_or_after(Tstamp::new(0, 1)), 1);
        assert_eq!(column.first_index_at_or_after(Tstamp::new(1, 0)), 1);
        assert_eq!(column.first_index_at_or_after(Tstamp::new(2, 0)), 3);
    }

    #[test]
    fn trigger_serde_round_trip() {
        let trigger = Trigger::new(
            Tstamp::new(1, 440),
            "pattern_delay",
            EventValue::Tstamp(Tstamp::new(2, 0)),
        )
        .unwrap();
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(
            json,
            json!({"position": [1, 440], "event": "pattern_delay", "argument": [2, 0]})
        );
        let back: Trigger = serde_json::from_value(json).unwrap();
        assert_eq!(back, trigger);
    }

    #[test]
    fn trigger_deserialization_rejects_malformed() {
        let bad = json!({"position": [0, 0], "event": "set_tempo", "argument": "x"});
        assert!(serde_json::from_value::<Trigger>(bad).is_err());
    }

    #[test]
    fn pat_inst_ref_bounds() {
        assert!(PatInstRef::new(0, 0).is_valid());
        assert!(!PatInstRef::new(u16::MAX, 0).is_valid());
    }
}
