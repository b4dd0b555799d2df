//! Acknowledged message-number ranges

use std::collections::btree_map::{self, BTreeMap};
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::ops::RangeInclusive;

/// A contiguous block of acknowledged message numbers, both ends inclusive.
///
/// This is the unit carried on the wire by `SequenceAcknowledgement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckRange {
    pub lower: u64,
    pub upper: u64,
}

impl AckRange {
    pub fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    pub fn single(number: u64) -> Self {
        Self::new(number, number)
    }

    pub fn contains(&self, number: u64) -> bool {
        self.lower <= number && number <= self.upper
    }
}

impl From<RangeInclusive<u64>> for AckRange {
    fn from(r: RangeInclusive<u64>) -> Self {
        Self::new(*r.start(), *r.end())
    }
}

/// Disjoint, sorted set of acknowledged message numbers.
///
/// Stored as `start -> end`, both inclusive, so the whole `u64` domain is
/// representable. Adjacent and overlapping insertions are merged; the map
/// never holds two touching entries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AckRanges(BTreeMap<u64, u64>);

impl AckRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of disjoint ranges
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, number: u64) -> bool {
        self.pred(number).is_some_and(|(_, end)| end >= number)
    }

    /// `true` if every number in `range` has been acknowledged.
    pub fn covers(&self, range: RangeInclusive<u64>) -> bool {
        if range.is_empty() {
            return true;
        }
        let (lower, upper) = range.into_inner();
        self.pred(lower).is_some_and(|(_, end)| end >= upper)
    }

    /// Merge a single number. Returns `false` if it was already present.
    pub fn insert_one(&mut self, number: u64) -> bool {
        self.insert(number..=number)
    }

    /// Merge an inclusive range. Returns `false` if nothing new was added.
    pub fn insert(&mut self, range: RangeInclusive<u64>) -> bool {
        if range.is_empty() {
            return false;
        }
        let (mut start, mut end) = range.into_inner();

        if let Some((pred_start, pred_end)) = self.pred(start) {
            if pred_end >= end {
                return false;
            }
            if pred_end.saturating_add(1) >= start {
                self.0.remove(&pred_start);
                start = pred_start;
            }
        }

        while let Some((next_start, next_end)) = self.succ(start) {
            if next_start > end.saturating_add(1) {
                break;
            }
            self.0.remove(&next_start);
            end = end.max(next_end);
        }

        self.0.insert(start, end);
        true
    }

    /// Ranges in ascending order, inclusive bounds.
    pub fn iter(&self) -> Iter<'_> {
        Iter(self.0.iter())
    }

    /// Lowest acknowledged number
    pub fn min(&self) -> Option<u64> {
        self.0.keys().next().copied()
    }

    /// Highest acknowledged number
    pub fn max(&self) -> Option<u64> {
        self.0.values().next_back().copied()
    }

    fn pred(&self, x: u64) -> Option<(u64, u64)> {
        self.0
            .range((Unbounded, Included(x)))
            .next_back()
            .map(|(&s, &e)| (s, e))
    }

    fn succ(&self, x: u64) -> Option<(u64, u64)> {
        self.0
            .range((Excluded(x), Unbounded))
            .next()
            .map(|(&s, &e)| (s, e))
    }
}

impl FromIterator<AckRange> for AckRanges {
    fn from_iter<I: IntoIterator<Item = AckRange>>(iter: I) -> Self {
        let mut ranges = AckRanges::new();
        for r in iter {
            ranges.insert(r.lower..=r.upper);
        }
        ranges
    }
}

pub struct Iter<'a>(btree_map::Iter<'a, u64, u64>);

impl Iterator for Iter<'_> {
    type Item = AckRange;

    fn next(&mut self) -> Option<AckRange> {
        let (&start, &end) = self.0.next()?;
        Some(AckRange::new(start, end))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<AckRange> {
        let (&start, &end) = self.0.next_back()?;
        Some(AckRange::new(start, end))
    }
}
