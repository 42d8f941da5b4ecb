use crate::core::axis::CoordinateAxis;
use crate::core::lazy::{Chunk, ChunkSource, Executor, LazyPlane, Window};
use crate::core::merge::UnifiedDataset;
use crate::types::{CubeError, CubeResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// `(den - num) / (den + num)`; NaN where the sum is zero
#[inline]
pub fn normalized_difference(num: f32, den: f32) -> f32 {
    let sum = den + num;
    if sum == 0.0 {
        f32::NAN
    } else {
        (den - num) / sum
    }
}

/// Lazy normalized difference of two planes of equal shape
#[derive(Debug)]
pub struct NormalizedDifference {
    numerator: LazyPlane,
    denominator: LazyPlane,
}

impl NormalizedDifference {
    pub fn new(numerator: LazyPlane, denominator: LazyPlane) -> CubeResult<Self> {
        if numerator.shape() != denominator.shape() {
            return Err(CubeError::InvalidParameter(format!(
                "band shapes differ: {:?} vs {:?}",
                numerator.shape(),
                denominator.shape()
            )));
        }
        Ok(Self { numerator, denominator })
    }
}

impl ChunkSource for NormalizedDifference {
    fn shape(&self) -> (usize, usize) {
        self.numerator.shape()
    }

    fn compute(&self, window: Window) -> CubeResult<Chunk> {
        let num = self.numerator.compute(window)?;
        let den = self.denominator.compute(window)?;

        let valid = &num.valid & &den.valid;
        let values = ndarray::Zip::from(&num.values)
            .and(&den.values)
            .and(&valid)
            .map_collect(|&n, &d, &ok| if ok { normalized_difference(n, d) } else { f32::NAN });
        Ok(Chunk { values, valid })
    }
}

/// Per-pixel index over a unified dataset: same time and spatial axes
#[derive(Debug, Clone)]
pub struct DerivedIndexArray {
    times: Vec<DateTime<Utc>>,
    northing: CoordinateAxis,
    easting: CoordinateAxis,
    planes: Vec<LazyPlane>,
}

impl DerivedIndexArray {
    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    pub fn northing(&self) -> &CoordinateAxis {
        &self.northing
    }

    pub fn easting(&self) -> &CoordinateAxis {
        &self.easting
    }

    /// (time, northing, easting)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.times.len(), self.northing.len, self.easting.len)
    }

    pub fn planes(&self) -> &[LazyPlane] {
        &self.planes
    }

    pub fn plane(&self, t: usize) -> CubeResult<&LazyPlane> {
        self.planes
            .get(t)
            .ok_or_else(|| CubeError::InvalidParameter(format!("time index {} out of {} steps", t, self.planes.len())))
    }

    pub fn materialize(&self, t: usize, window: Window, executor: &Executor) -> CubeResult<Chunk> {
        executor.materialize(self.plane(t)?.as_ref(), window)
    }
}

/// `result[t,y,x] = (den - num) / (den + num)` over two bands of `dataset`.
///
/// Missing input cells stay missing; cells where the sum is zero are NaN.
pub fn compute_index(
    dataset: &UnifiedDataset,
    numerator_band: &str,
    denominator_band: &str,
) -> CubeResult<DerivedIndexArray> {
    let num = dataset.band(numerator_band)?;
    let den = dataset.band(denominator_band)?;

    let planes = num
        .iter()
        .zip(den)
        .map(|(n, d)| {
            NormalizedDifference::new(Arc::clone(n), Arc::clone(d)).map(|nd| Arc::new(nd) as LazyPlane)
        })
        .collect::<CubeResult<Vec<_>>>()?;

    log::debug!(
        "Index ({} - {}) / ({} + {}) over {} time steps",
        denominator_band,
        numerator_band,
        denominator_band,
        numerator_band,
        planes.len()
    );

    Ok(DerivedIndexArray {
        times: dataset.times().to_vec(),
        northing: *dataset.northing(),
        easting: *dataset.easting(),
        planes,
    })
}

/// NDVI = (NIR - red) / (NIR + red)
pub fn ndvi(dataset: &UnifiedDataset, red_band: &str, nir_band: &str) -> CubeResult<DerivedIndexArray> {
    compute_index(dataset, red_band, nir_band)
}
