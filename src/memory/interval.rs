//! Source snapshots for `memmove`
//!
//! A move first captures the whole source range as a list of [`Interval`]s so
//! that overlapping source and destination ranges behave like `memmove(3)`.

use super::{Address, Size};

/// What a captured run of memory holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalContent {
    /// Every byte equals this value
    Fill(u8),
    /// Raw copy of the bytes
    Bytes(Vec<u8>),
}

/// One captured run `[start, end)` of source memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub start: Address,
    pub end: Address,
    pub content: IntervalContent,
}

impl Interval {
    pub fn size(&self) -> Size {
        self.end - self.start
    }

    /// Absorb `next` if it continues this run with the same uniform fill
    fn merge_in(&mut self, next: &Interval) -> bool {
        if self.end != next.start {
            return false;
        }
        match (&self.content, &next.content) {
            (IntervalContent::Fill(a), IntervalContent::Fill(b)) if a == b => {
                self.end = next.end;
                true
            }
            _ => false,
        }
    }
}

/// Collapse neighbouring runs of the same uniform fill
pub fn merge_adjacent(intervals: Vec<Interval>) -> Vec<Interval> {
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        if let Some(last) = merged.last_mut() {
            if last.merge_in(&interval) {
                continue;
            }
        }
        merged.push(interval);
    }
    merged
}
