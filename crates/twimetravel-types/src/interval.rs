//! Closed intervals and coverage bookkeeping.
//!
//! A timeline is loaded window by window. [`IntervalSet`] remembers which
//! windows are already loaded (merging ranges that overlap or touch) and can
//! report what is still missing from a query. [`IntervalStore`] pairs that
//! coverage with the points found inside it, and only answers a query when
//! the whole query range has been loaded: a partial answer is never passed
//! off as a complete one.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::time::{SecondsSinceUnixEpoch, Snowflake};

/// A closed interval `[start, end]`.
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct Interval<T: Ord>(pub T, pub T);

impl<T: Ord> Interval<T> {
    pub fn contains(&self, point: &T) -> bool {
        point >= &self.0 && point <= &self.1
    }

    pub fn contains_interval(&self, other: &Interval<T>) -> bool {
        self.contains(&other.0) && self.contains(&other.1)
    }

    /// True when the two intervals share at least one point.
    pub fn intersects(&self, other: &Interval<T>) -> bool {
        self.0 <= other.1 && other.0 <= self.1
    }

    /// An interval whose start lies after its end contains nothing.
    pub fn is_empty(&self) -> bool {
        self.0 > self.1
    }
}

impl<T: Ord + fmt::Display> fmt::Display for Interval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.0, self.1)
    }
}

impl From<Interval<SecondsSinceUnixEpoch>> for Interval<Snowflake> {
    fn from(interval: Interval<SecondsSinceUnixEpoch>) -> Self {
        Interval(interval.0.into(), interval.1.into())
    }
}

// ============================================================================
// IntervalSet
// ============================================================================

/// A union of closed intervals, kept as disjoint ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntervalSet<T: Ord> {
    intervals: BTreeSet<Interval<T>>,
}

impl<T: Ord> Default for IntervalSet<T> {
    fn default() -> Self {
        Self {
            intervals: BTreeSet::new(),
        }
    }
}

impl<T: Ord + Copy> IntervalSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `interval`, merging it with every range it overlaps or touches.
    pub fn insert(&mut self, interval: Interval<T>) {
        if interval.is_empty() {
            return;
        }
        let overlapping: Vec<Interval<T>> = self.intersecting(&interval).copied().collect();
        if overlapping.iter().any(|i| i.contains_interval(&interval)) {
            return;
        }

        let mut merged = interval;
        for existing in overlapping {
            self.intervals.remove(&existing);
            merged = Interval(merged.0.min(existing.0), merged.1.max(existing.1));
        }
        self.intervals.insert(merged);
    }

    /// Whether a single stored range holds all of `interval`.
    pub fn covers(&self, interval: &Interval<T>) -> bool {
        self.intervals.iter().any(|i| i.contains_interval(interval))
    }

    /// Stored ranges sharing at least one point with `interval`.
    pub fn intersecting<'a>(
        &'a self,
        interval: &'a Interval<T>,
    ) -> impl Iterator<Item = &'a Interval<T>> + 'a {
        self.intervals.iter().filter(move |i| i.intersects(interval))
    }

    /// The parts of `interval` not covered by this set.
    ///
    /// Gaps are closed too, so they share their endpoints with the stored
    /// ranges around them.
    pub fn missing(&self, interval: &Interval<T>) -> IntervalSet<T> {
        let mut gaps = BTreeSet::new();
        if interval.is_empty() || self.covers(interval) {
            return IntervalSet { intervals: gaps };
        }

        let mut cursor = interval.0;
        for stored in &self.intervals {
            if stored.1 < cursor {
                continue;
            }
            if stored.0 > interval.1 {
                break;
            }
            if stored.0 > cursor {
                gaps.insert(Interval(cursor, stored.0));
            }
            cursor = cursor.max(stored.1);
        }
        if cursor < interval.1 || gaps.is_empty() {
            gaps.insert(Interval(cursor.min(interval.1), interval.1));
        }

        IntervalSet { intervals: gaps }
    }

    pub fn iter(&self) -> std::collections::btree_set::Iter<'_, Interval<T>> {
        self.intervals.iter()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

impl<T: Ord + Copy> FromIterator<Interval<T>> for IntervalSet<T> {
    fn from_iter<I: IntoIterator<Item = Interval<T>>>(iter: I) -> Self {
        let mut set = IntervalSet::new();
        for interval in iter {
            set.insert(interval);
        }
        set
    }
}

// ============================================================================
// IntervalStore
// ============================================================================

/// A re-insert disagreed with points already loaded for the same range.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("points conflict with an already loaded range")]
pub struct IntervalConflict;

/// Points (ordered by time) plus the ranges they are known to be complete for.
#[derive(Clone, Debug)]
pub struct IntervalStore<T: Ord> {
    covered: IntervalSet<T>,
    points: BTreeSet<T>,
}

impl<T: Ord> Default for IntervalStore<T> {
    fn default() -> Self {
        Self {
            covered: IntervalSet::default(),
            points: BTreeSet::new(),
        }
    }
}

impl<T: Ord + Copy> IntervalStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn covered(&self) -> &IntervalSet<T> {
        &self.covered
    }

    pub fn has(&self, interval: &Interval<T>) -> bool {
        self.covered.covers(interval)
    }

    pub fn missing(&self, interval: &Interval<T>) -> IntervalSet<T> {
        self.covered.missing(interval)
    }

    /// Every point inside `interval`, oldest first, or `None` unless the
    /// whole interval has been loaded.
    pub fn get(&self, interval: &Interval<T>) -> Option<Vec<T>> {
        if interval.is_empty() {
            return Some(Vec::new());
        }
        if !self.has(interval) {
            return None;
        }
        Some(self.points.range(interval.0..=interval.1).copied().collect())
    }

    /// Record that `points` are all the points inside `interval`.
    ///
    /// Points outside `interval` are ignored. Where `interval` overlaps a
    /// range loaded earlier, both loads must agree on the points in the
    /// overlap; otherwise nothing is recorded.
    pub fn insert(
        &mut self,
        interval: Interval<T>,
        points: impl IntoIterator<Item = T>,
    ) -> Result<(), IntervalConflict> {
        if interval.is_empty() {
            return Ok(());
        }
        let incoming: BTreeSet<T> = points.into_iter().filter(|p| interval.contains(p)).collect();

        for loaded in self.covered.intersecting(&interval) {
            let overlap = Interval(loaded.0.max(interval.0), loaded.1.min(interval.1));
            let known = self.points.range(overlap.0..=overlap.1);
            let offered = incoming.range(overlap.0..=overlap.1);
            if !known.eq(offered) {
                return Err(IntervalConflict);
            }
        }

        self.covered.insert(interval);
        self.points.extend(incoming);
        Ok(())
    }
}
