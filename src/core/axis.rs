//! Regularly spaced georeferenced coordinate axes

use crate::types::{CubeError, CubeResult};
use serde::{Deserialize, Serialize};

/// Relative tolerance (in cells) for coordinate comparisons
const CELL_TOLERANCE: f64 = 1e-6;

/// A strictly monotonic, regularly spaced axis of cell-centre coordinates:
/// `coord(i) = origin + i * step`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateAxis {
    pub origin: f64,
    pub step: f64,
    pub len: usize,
}

impl CoordinateAxis {
    pub fn new(origin: f64, step: f64, len: usize) -> CubeResult<Self> {
        if !origin.is_finite() || !step.is_finite() || step == 0.0 {
            return Err(CubeError::InvalidFormat(format!(
                "axis needs a finite origin and non-zero step (origin {}, step {})",
                origin, step
            )));
        }
        if len == 0 {
            return Err(CubeError::InvalidFormat("axis has no cells".to_string()));
        }
        Ok(Self { origin, step, len })
    }

    pub fn coord(&self, index: usize) -> f64 {
        self.origin + index as f64 * self.step
    }

    pub fn coords(&self) -> Vec<f64> {
        (0..self.len).map(|i| self.coord(i)).collect()
    }

    pub fn resolution(&self) -> f64 {
        self.step.abs()
    }

    pub fn min(&self) -> f64 {
        self.coord(0).min(self.coord(self.len - 1))
    }

    pub fn max(&self) -> f64 {
        self.coord(0).max(self.coord(self.len - 1))
    }

    /// Same axis within a small fraction of a cell
    pub fn approx_eq(&self, other: &CoordinateAxis) -> bool {
        let tol = CELL_TOLERANCE * self.resolution().max(other.resolution());
        self.len == other.len
            && (self.origin - other.origin).abs() <= tol
            && (self.step - other.step).abs() <= tol
    }

    /// Index of the cell whose extent contains `coord`.
    ///
    /// Cell `i` covers `coord(i) ± resolution / 2`; a coordinate exactly on a
    /// shared edge goes to the lower index.
    pub fn index_of(&self, coord: f64) -> Option<usize> {
        let f = (coord - self.origin) / self.step;
        let upper = self.len as f64 - 0.5;
        if f < -0.5 - CELL_TOLERANCE || f > upper + CELL_TOLERANCE {
            return None;
        }
        let i = (f - 0.5).ceil().max(0.0) as usize;
        Some(i.min(self.len - 1))
    }

    /// Index range `[start, end)` of cells whose extent intersects `[lo, hi]`.
    ///
    /// Cell `i` covers `coord(i) ± resolution / 2`, so an interval lying
    /// between two cell centres still selects the cell containing it. An
    /// interval that only touches cell edges selects the cell `index_of(lo)`
    /// picks.
    pub fn range_overlapping(&self, lo: f64, hi: f64) -> Option<(usize, usize)> {
        if lo > hi {
            return None;
        }
        let half = 0.5 * self.resolution();
        let tol = CELL_TOLERANCE * self.resolution();
        let inside: Vec<usize> = (0..self.len)
            .filter(|&i| {
                let c = self.coord(i);
                c + half > lo + tol && c - half < hi - tol
            })
            .collect();
        match (inside.first(), inside.last()) {
            (Some(&start), Some(&end)) => Some((start, end + 1)),
            _ => self.index_of(lo).or_else(|| self.index_of(hi)).map(|i| (i, i + 1)),
        }
    }

    /// Ascending axis covering every input axis at the finest input resolution.
    ///
    /// The result starts at the smallest coordinate of any input and extends
    /// in whole steps until the largest coordinate is covered.
    pub fn union<'a, I>(axes: I) -> CubeResult<CoordinateAxis>
    where
        I: IntoIterator<Item = &'a CoordinateAxis>,
    {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        let mut step = f64::INFINITY;
        let mut count = 0usize;

        for axis in axes {
            lo = lo.min(axis.min());
            hi = hi.max(axis.max());
            step = step.min(axis.resolution());
            count += 1;
        }

        if count == 0 {
            return Err(CubeError::Processing("cannot unify an empty set of axes".to_string()));
        }

        let span = (hi - lo) / step;
        let len = (span - CELL_TOLERANCE).ceil().max(0.0) as usize + 1;
        log::debug!(
            "Unified {} axes into [{}, {}] step {} ({} cells)",
            count,
            lo,
            lo + (len - 1) as f64 * step,
            step,
            len
        );
        CoordinateAxis::new(lo, step, len)
    }

    /// For each cell of `target`, the index of the containing cell of `self`
    pub fn mapping_onto(&self, target: &CoordinateAxis) -> Vec<Option<usize>> {
        (0..target.len).map(|i| self.index_of(target.coord(i))).collect()
    }
}
