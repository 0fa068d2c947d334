//! Sorted set of disjoint half-open byte ranges.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// The byte ranges of a resource that are present on disk.
///
/// Ranges are half-open, sorted, and never overlap or touch; adjacent
/// ranges are merged on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSet {
    ranges: Vec<Range<u64>>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `range`, returning how many previously uncovered bytes it added.
    pub fn insert(&mut self, range: Range<u64>) -> u64 {
        if range.start >= range.end {
            return 0;
        }

        let added = self.uncovered_len(&range);

        let mut start = range.start;
        let mut end = range.end;
        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;

        for existing in self.ranges.drain(..) {
            if existing.end < start {
                merged.push(existing);
            } else if existing.start > end {
                if !placed {
                    merged.push(start..end);
                    placed = true;
                }
                merged.push(existing);
            } else {
                start = start.min(existing.start);
                end = end.max(existing.end);
            }
        }
        if !placed {
            merged.push(start..end);
        }

        self.ranges = merged;
        added
    }

    /// Sub-ranges of `range` that are present, in order.
    pub fn covered(&self, range: &Range<u64>) -> Vec<Range<u64>> {
        self.ranges
            .iter()
            .filter(|r| r.start < range.end && r.end > range.start)
            .map(|r| r.start.max(range.start)..r.end.min(range.end))
            .collect()
    }

    /// Sub-ranges of `range` that are missing, in order.
    pub fn gaps(&self, range: &Range<u64>) -> Vec<Range<u64>> {
        let mut gaps = Vec::new();
        let mut cursor = range.start;

        for covered in self.covered(range) {
            if covered.start > cursor {
                gaps.push(cursor..covered.start);
            }
            cursor = covered.end;
        }
        if cursor < range.end {
            gaps.push(cursor..range.end);
        }

        gaps
    }

    /// Length of the part of `range` not yet present.
    pub fn uncovered_len(&self, range: &Range<u64>) -> u64 {
        self.gaps(range).iter().map(|g| g.end - g.start).sum()
    }

    /// Whether every byte of `range` is present.
    pub fn contains(&self, range: &Range<u64>) -> bool {
        range.start >= range.end || self.uncovered_len(range) == 0
    }

    /// Total number of bytes present.
    pub fn total_len(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    /// Drop everything at or beyond `len`.
    pub fn truncate(&mut self, len: u64) -> u64 {
        let before = self.total_len();
        self.ranges.retain(|r| r.start < len);
        if let Some(last) = self.ranges.last_mut() {
            last.end = last.end.min(len);
        }
        before - self.total_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<u64>> {
        self.ranges.iter()
    }
}
