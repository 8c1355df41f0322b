//! Broad-phase overlap detection for dot populations.
//!
//! The sweep-and-prune index filters a population down to the subset of
//! entries that can possibly be interacting, so narrow-phase checks only run
//! against a small candidate set instead of every pair.

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted by broad-phase implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Bounds contained a NaN or infinite coordinate and cannot be ordered.
    #[error("non-finite bounds for entry {0}")]
    InvalidBounds(usize),
}

/// Axis-aligned bounding intervals for a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DotBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl DotBounds {
    /// Bounds of a circle centered at `(x, y)` with the given radius.
    #[must_use]
    pub fn around(x: f32, y: f32, radius: f32) -> Self {
        Self {
            min_x: x - radius,
            max_x: x + radius,
            min_y: y - radius,
            max_y: y + radius,
        }
    }

    fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.max_x.is_finite()
            && self.min_y.is_finite()
            && self.max_y.is_finite()
    }

    fn overlaps_y(&self, other: &Self) -> bool {
        self.min_y <= other.max_y && other.min_y <= self.max_y
    }
}

/// Common behaviour exposed by broad-phase indices.
pub trait BroadPhase {
    /// Rebuild internal structures from per-entry bounds.
    fn rebuild(&mut self, bounds: &[DotBounds]) -> Result<(), IndexError>;

    /// Indices of every entry that appears in at least one overlapping pair,
    /// sorted ascending. A conservative superset: callers re-check exact
    /// pairs themselves.
    fn candidates(&self) -> &[usize];
}

/// Sweep-and-prune index over axis-aligned intervals.
///
/// Entries are sorted by X-interval start, then a single sweep collects every
/// pair whose X and Y intervals both intersect. The resulting candidate set
/// is independent of input ordering: the sort is a normalization step, not an
/// observable traversal guarantee.
#[derive(Debug, Clone, Default)]
pub struct SweepPruneIndex {
    order: Vec<usize>,
    flagged: Vec<bool>,
    active: Vec<usize>,
    candidates: Vec<usize>,
}

impl SweepPruneIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BroadPhase for SweepPruneIndex {
    fn rebuild(&mut self, bounds: &[DotBounds]) -> Result<(), IndexError> {
        self.candidates.clear();
        self.order.clear();
        self.active.clear();
        self.flagged.clear();

        if let Some(bad) = bounds.iter().position(|b| !b.is_finite()) {
            return Err(IndexError::InvalidBounds(bad));
        }
        if bounds.len() < 2 {
            return Ok(());
        }

        self.order.extend(0..bounds.len());
        self.order
            .par_sort_unstable_by_key(|&idx| OrderedFloat(bounds[idx].min_x));
        self.flagged.resize(bounds.len(), false);

        for &idx in &self.order {
            let entry = bounds[idx];
            self.active.retain(|&open| bounds[open].max_x >= entry.min_x);
            for &open in &self.active {
                if entry.overlaps_y(&bounds[open]) {
                    self.flagged[idx] = true;
                    self.flagged[open] = true;
                }
            }
            self.active.push(idx);
        }

        self.candidates.extend(
            self.flagged
                .iter()
                .enumerate()
                .filter_map(|(idx, &hit)| hit.then_some(idx)),
        );
        Ok(())
    }

    fn candidates(&self) -> &[usize] {
        &self.candidates
    }
}
