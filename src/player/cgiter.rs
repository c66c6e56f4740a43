// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::composition::{Pattern, Trigger};
use crate::time::Tstamp;

/// A cursor over one channel's column in the current pattern. Restartable
/// and strictly index-based; the pattern itself lives in the module and is
/// never copied.
#[derive(Clone, Debug, Default)]
pub struct Cgiter {
    channel: usize,
    next_index: usize,
}

impl Cgiter {
    pub fn new(channel: usize) -> Self {
        Self {
            channel,
            next_index: 0,
        }
    }

    /// Repositions the cursor at the first trigger at or after `row`.
    pub fn reset(&mut self, pattern: &Pattern, row: Tstamp) {
        self.next_index = pattern
            .column(self.channel)
            .map_or(0, |column| column.first_index_at_or_after(row));
    }

    /// The next unconsumed trigger, if any.
    pub fn peek<'a>(&self, pattern: &'a Pattern) -> Option<&'a Trigger> {
        pattern.column(self.channel)?.triggers.get(self.next_index)
    }

    /// Steps past the trigger last returned by [Cgiter::peek].
    pub fn consume(&mut self) {
        self.next_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{composition::PatternBuilder, events::EventValue};

    fn pattern() -> Pattern {
        PatternBuilder::default()
            .length(Tstamp::new(4, 0))
            .trigger(
                0,
                Trigger::new(Tstamp::ZERO, "note_on", EventValue::Float(60.0)).unwrap(),
            )
            .trigger(
                0,
                Trigger::new(Tstamp::new(2, 0), "note_off", EventValue::None).unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn walks_a_column_in_order() {
        let pattern = pattern();
        let mut iter = Cgiter::new(0);
        iter.reset(&pattern, Tstamp::ZERO);
        assert_eq!(iter.peek(&pattern).unwrap().name, "note_on");
        iter.consume();
        assert_eq!(iter.peek(&pattern).unwrap().name, "note_off");
        iter.consume();
        assert!(iter.peek(&pattern).is_none());
    }

    #[test]
    fn restarts_mid_pattern() {
        let pattern = pattern();
        let mut iter = Cgiter::new(0);
        iter.reset(&pattern, Tstamp::new(1, 0));
        assert_eq!(
            iter.peek(&pattern).unwrap().name,
            "note_off",
            "reset should skip triggers before the seek row"
        );
    }

    #[test]
    fn empty_channel_yields_nothing() {
        let pattern = pattern();
        let mut iter = Cgiter::new(3);
        iter.reset(&pattern, Tstamp::ZERO);
        assert!(iter.peek(&pattern).is_none());
    }
}
