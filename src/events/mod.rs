// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! The event registry: every trigger name the engine understands, its
//! routing scope, its argument schema, and its validator.
//!
//! The registry is a read-only table built once. Scores refer to events by
//! name; the sequencer looks names up here both at load time (to reject
//! malformed scores) and at dispatch time (to route). An event whose argument
//! fails validation is dropped silently, never faulted.

use crate::{composition::PatInstRef, time::Tstamp, types::limits};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use strum_macros::Display;

pub use conditions::CondState;

mod conditions;

/// Quick imports for event handling.
pub mod prelude {
    pub use super::{lookup, CondState, EventKind, EventSpec, EventValue};
}

/// The routing scope of an event.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum EventKind {
    /// Sequencer-global: tempo, volume, jumps, pattern delay.
    Master,
    /// Per-channel: notes, force, expression.
    Channel,
    /// Targets the channel's current audio unit.
    AudioUnit,
    /// Playback control: pause/resume, playback mode, environment.
    Control,
    /// Scope-independent: comments and conditional execution.
    General,
}

/// The argument schema of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventArgType {
    #[allow(missing_docs)]
    None,
    #[allow(missing_docs)]
    Bool,
    #[allow(missing_docs)]
    Int,
    #[allow(missing_docs)]
    Float,
    /// A float that external (host-injected) events may stream continuously.
    Realtime,
    #[allow(missing_docs)]
    Tstamp,
    #[allow(missing_docs)]
    String,
    /// A `(pattern, instance)` reference.
    PatInstRef,
}

/// A typed event argument.
#[derive(Clone, Debug, PartialEq)]
pub enum EventValue {
    #[allow(missing_docs)]
    None,
    #[allow(missing_docs)]
    Bool(bool),
    #[allow(missing_docs)]
    Int(i64),
    #[allow(missing_docs)]
    Float(f64),
    #[allow(missing_docs)]
    Tstamp(Tstamp),
    #[allow(missing_docs)]
    String(String),
    #[allow(missing_docs)]
    PatInstRef(PatInstRef),
}
impl EventValue {
    #[allow(missing_docs)]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            EventValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Accepts both int and float arguments, as scores commonly write `0`
    /// where `0.0` is meant.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            EventValue::Float(f) => Some(*f),
            EventValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EventValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_tstamp(&self) -> Option<Tstamp> {
        match self {
            EventValue::Tstamp(t) => Some(*t),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EventValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_pat_inst_ref(&self) -> Option<PatInstRef> {
        match self {
            EventValue::PatInstRef(p) => Some(*p),
            _ => None,
        }
    }

    /// The JSON shape this value takes in a serialized score.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            EventValue::None => serde_json::Value::Null,
            EventValue::Bool(b) => (*b).into(),
            EventValue::Int(i) => (*i).into(),
            EventValue::Float(f) => (*f).into(),
            EventValue::Tstamp(t) => serde_json::json!([t.beats(), t.rem()]),
            EventValue::String(s) => s.clone().into(),
            EventValue::PatInstRef(p) => serde_json::json!([p.pat, p.inst]),
        }
    }
}

impl EventArgType {
    /// Parses a raw JSON argument into a typed [EventValue], or `None` if the
    /// shape doesn't match this schema.
    pub fn parse(&self, raw: &serde_json::Value) -> Option<EventValue> {
        use serde_json::Value;
        match (self, raw) {
            (EventArgType::None, Value::Null) => Some(EventValue::None),
            (EventArgType::Bool, Value::Bool(b)) => Some(EventValue::Bool(*b)),
            (EventArgType::Int, Value::Number(n)) => n.as_i64().map(EventValue::Int),
            (EventArgType::Float | EventArgType::Realtime, Value::Number(n)) => {
                n.as_f64().map(EventValue::Float)
            }
            (EventArgType::Tstamp, Value::Array(a)) if a.len() == 2 => {
                let beats = a[0].as_i64()?;
                let rem = a[1].as_i64()?;
                if (0..Tstamp::BEAT as i64).contains(&rem) {
                    Some(EventValue::Tstamp(Tstamp::new(beats, rem)))
                } else {
                    None
                }
            }
            (EventArgType::String, Value::String(s)) => Some(EventValue::String(s.clone())),
            (EventArgType::PatInstRef, Value::Array(a)) if a.len() == 2 => {
                let pat = a[0].as_u64()?;
                let inst = a[1].as_u64()?;
                let piref = PatInstRef {
                    pat: pat as u16,
                    inst: inst as u16,
                };
                piref.is_valid().then_some(EventValue::PatInstRef(piref))
            }
            _ => None,
        }
    }
}

/// One entry of the event registry.
#[derive(Debug)]
pub struct EventSpec {
    #[allow(missing_docs)]
    pub name: &'static str,
    #[allow(missing_docs)]
    pub kind: EventKind,
    #[allow(missing_docs)]
    pub arg_type: EventArgType,
    /// Range check beyond the argument's shape. Shape-valid arguments that
    /// fail this are dropped at dispatch.
    pub validator: fn(&EventValue) -> bool,
}

fn any(_: &EventValue) -> bool {
    true
}

fn valid_tempo(v: &EventValue) -> bool {
    v.as_float().is_some_and(|f| limits::TEMPO_RANGE.contains(&f))
}

fn nonnegative_tstamp(v: &EventValue) -> bool {
    v.as_tstamp().is_some_and(|t| t >= Tstamp::ZERO)
}

fn valid_volume(v: &EventValue) -> bool {
    // Volume is in dB, zero or below.
    v.as_float().is_some_and(|f| f <= 0.0 && f.is_finite())
}

fn valid_force(v: &EventValue) -> bool {
    v.as_float().is_some_and(|f| f <= 18.0 && f.is_finite())
}

fn valid_pitch(v: &EventValue) -> bool {
    // MIDI-style note numbers; any finite value is playable.
    v.as_float().is_some_and(f64::is_finite)
}

fn nonnegative_int(v: &EventValue) -> bool {
    v.as_int().is_some_and(|i| i >= 0)
}

fn valid_counter(v: &EventValue) -> bool {
    v.as_int().is_some_and(|i| (0..=32767).contains(&i))
}

fn valid_au_index(v: &EventValue) -> bool {
    v.as_int()
        .is_some_and(|i| (0..limits::AUDIO_UNITS_MAX as i64).contains(&i))
}

fn valid_sustain(v: &EventValue) -> bool {
    v.as_float().is_some_and(|f| (0.0..=1.0).contains(&f))
}

fn valid_panning(v: &EventValue) -> bool {
    v.as_float().is_some_and(|f| (-1.0..=1.0).contains(&f))
}

fn nonnegative_float(v: &EventValue) -> bool {
    v.as_float().is_some_and(|f| f >= 0.0 && f.is_finite())
}

fn valid_name(v: &EventValue) -> bool {
    v.as_str().is_some_and(|s| !s.is_empty() && s.len() <= 128)
}

macro_rules! events {
    ($(($name:literal, $kind:ident, $arg:ident, $validator:expr)),* $(,)?) => {
        &[$(EventSpec {
            name: $name,
            kind: EventKind::$kind,
            arg_type: EventArgType::$arg,
            validator: $validator,
        }),*]
    };
}

/// Every event the engine understands. The table is the contract; handlers
/// live beside the player.
static EVENTS: &[EventSpec] = events![
    // Master.
    ("set_tempo", Master, Float, valid_tempo),
    ("slide_tempo", Master, Float, valid_tempo),
    ("slide_tempo_length", Master, Tstamp, nonnegative_tstamp),
    ("set_volume", Master, Float, valid_volume),
    ("slide_volume", Master, Float, valid_volume),
    ("slide_volume_length", Master, Tstamp, nonnegative_tstamp),
    ("pattern_delay", Master, Tstamp, nonnegative_tstamp),
    ("set_jump_row", Master, Tstamp, nonnegative_tstamp),
    ("set_jump_pat_inst", Master, PatInstRef, any),
    ("set_jump_counter", Master, Int, valid_counter),
    ("jump", Master, None, any),
    // Channel.
    ("note_on", Channel, Float, valid_pitch),
    ("note_off", Channel, None, any),
    ("hit", Channel, Int, nonnegative_int),
    ("set_au_input", Channel, Int, valid_au_index),
    ("set_force", Channel, Float, valid_force),
    ("slide_force", Channel, Float, valid_force),
    ("slide_force_length", Channel, Tstamp, nonnegative_tstamp),
    ("set_panning", Channel, Float, valid_panning),
    ("slide_panning", Channel, Float, valid_panning),
    ("slide_panning_length", Channel, Tstamp, nonnegative_tstamp),
    ("arpeggio_on", Channel, Float, valid_pitch),
    ("arpeggio_off", Channel, None, any),
    ("arpeggio_speed", Channel, Float, nonnegative_float),
    ("vibrato_speed", Channel, Float, nonnegative_float),
    ("vibrato_depth", Channel, Float, nonnegative_float),
    ("vibrato_delay", Channel, Tstamp, nonnegative_tstamp),
    ("tremolo_speed", Channel, Float, nonnegative_float),
    ("tremolo_depth", Channel, Float, nonnegative_float),
    ("tremolo_delay", Channel, Tstamp, nonnegative_tstamp),
    ("set_stream_name", Channel, String, valid_name),
    ("set_stream_value", Channel, Realtime, any),
    // Audio unit.
    ("set_sustain", AudioUnit, Float, valid_sustain),
    ("set_cv_name", AudioUnit, String, valid_name),
    ("set_cv_value", AudioUnit, Realtime, any),
    ("bypass_on", AudioUnit, None, any),
    ("bypass_off", AudioUnit, None, any),
    // Control.
    ("pause", Control, None, any),
    ("resume", Control, None, any),
    ("play_pattern", Control, PatInstRef, any),
    ("infinite_on", Control, None, any),
    ("infinite_off", Control, None, any),
    ("set_env_name", Control, String, valid_name),
    ("set_env_value", Control, Realtime, any),
    // General.
    ("comment", General, String, any),
    ("?", General, Bool, any),
    ("?if", General, None, any),
    ("?else", General, None, any),
    ("?end", General, None, any),
    ("call", General, String, valid_name),
];

static REGISTRY: Lazy<FxHashMap<&'static str, &'static EventSpec>> = Lazy::new(|| {
    EVENTS.iter().map(|spec| (spec.name, spec)).collect()
});

/// Looks up an event by name.
pub fn lookup(name: &str) -> Option<&'static EventSpec> {
    REGISTRY.get(name).copied()
}

/// Parses and validates a raw argument against the event's schema. `None`
/// means the event must be dropped.
pub fn parse_argument(spec: &EventSpec, raw: &serde_json::Value) -> Option<EventValue> {
    let value = spec.arg_type.parse(raw)?;
    (spec.validator)(&value).then_some(value)
}

/// Whether an already-typed value fits the event's schema and passes its
/// validator. Used for programmatically-built triggers and host-injected
/// events, which skip the JSON parse.
pub fn value_fits(spec: &EventSpec, value: &EventValue) -> bool {
    use EventArgType as T;
    let shape_ok = matches!(
        (spec.arg_type, value),
        (T::None, EventValue::None)
            | (T::Bool, EventValue::Bool(_))
            | (T::Int, EventValue::Int(_))
            | (T::Float | T::Realtime, EventValue::Float(_) | EventValue::Int(_))
            | (T::Tstamp, EventValue::Tstamp(_))
            | (T::String, EventValue::String(_))
            | (T::PatInstRef, EventValue::PatInstRef(_))
    );
    shape_ok && (spec.validator)(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_knows_its_events() {
        assert!(lookup("note_on").is_some());
        assert!(lookup("set_tempo").is_some());
        assert!(lookup("?end").is_some());
        assert!(lookup("bogus_event").is_none());

        assert_eq!(lookup("jump").unwrap().kind, EventKind::Master);
        assert_eq!(lookup("pause").unwrap().kind, EventKind::Control);
        assert_eq!(lookup("set_sustain").unwrap().kind, EventKind::AudioUnit);
    }

    #[test]
    fn arguments_parse_by_schema() {
        let spec = lookup("set_tempo").unwrap();
        assert_eq!(
            parse_argument(spec, &json!(120.0)),
            Some(EventValue::Float(120.0))
        );
        assert_eq!(parse_argument(spec, &json!(0.0)), None, "below tempo range");
        assert_eq!(parse_argument(spec, &json!("fast")), None, "wrong shape");

        let spec = lookup("pattern_delay").unwrap();
        assert_eq!(
            parse_argument(spec, &json!([2, 0])),
            Some(EventValue::Tstamp(crate::time::Tstamp::new(2, 0)))
        );
        assert_eq!(
            parse_argument(spec, &json!([0, -1])),
            None,
            "remainder outside [0, BEAT) is not a score timestamp"
        );

        let spec = lookup("note_off").unwrap();
        assert_eq!(parse_argument(spec, &json!(null)), Some(EventValue::None));
        assert_eq!(parse_argument(spec, &json!(1)), None);
    }

    #[test]
    fn int_accepted_where_float_expected() {
        let spec = lookup("note_on").unwrap();
        assert_eq!(
            parse_argument(spec, &json!(60)),
            Some(EventValue::Float(60.0)),
            "int literals are fine for float schemas"
        );
    }

    #[test]
    fn rejection_is_not_an_error() {
        // A malformed argument yields None; nothing panics, nothing faults.
        let spec = lookup("set_jump_counter").unwrap();
        assert_eq!(parse_argument(spec, &json!(-1)), None);
        assert_eq!(parse_argument(spec, &json!(40000)), None);
        assert_eq!(
            parse_argument(spec, &json!(3)),
            Some(EventValue::Int(3))
        );
    }
}
