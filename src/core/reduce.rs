use crate::core::index::DerivedIndexArray;
use crate::core::lazy::{Chunk, Executor, Window};
use crate::types::{CubeError, CubeResult};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Centre point and half-width of a square spatial window, in grid coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointSelection {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl PointSelection {
    pub fn new(x: f64, y: f64, radius: f64) -> CubeResult<Self> {
        if !x.is_finite() || !y.is_finite() {
            return Err(CubeError::InvalidParameter(format!("non-finite point ({}, {})", x, y)));
        }
        if !radius.is_finite() || radius < 0.0 {
            return Err(CubeError::InvalidParameter(format!("invalid radius {}", radius)));
        }
        Ok(Self { x, y, radius })
    }
}

/// Calendar buckets for temporal resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalBucket {
    Day,
    Month,
    Year,
}

impl TemporalBucket {
    /// First day of the bucket containing `t`
    pub fn start_of(&self, t: &DateTime<Utc>) -> NaiveDate {
        let d = t.date_naive();
        match self {
            TemporalBucket::Day => d,
            TemporalBucket::Month => d.with_day(1).unwrap_or(d),
            TemporalBucket::Year => d.with_ordinal(1).unwrap_or(d),
        }
    }

    /// First day of the following bucket
    pub fn next(&self, start: NaiveDate) -> CubeResult<NaiveDate> {
        let next = match self {
            TemporalBucket::Day => start.succ_opt(),
            TemporalBucket::Month if start.month() == 12 => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1),
            TemporalBucket::Month => NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1),
            TemporalBucket::Year => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1),
        };
        next.ok_or_else(|| CubeError::Processing(format!("no {:?} bucket after {}", self, start)))
    }
}

/// One bucket of a reduced series; `value` is `None` when nothing valid fell in it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub start: NaiveDate,
    pub value: Option<f64>,
    /// Time steps that fell in the bucket
    pub steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedSeries {
    pub bucket: TemporalBucket,
    pub points: Vec<SeriesPoint>,
}

impl ReducedSeries {
    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }
}

/// Mean of cells that are present and not NaN
pub fn valid_mean(chunk: &Chunk) -> Option<f64> {
    let (sum, count) = chunk
        .values
        .iter()
        .zip(chunk.valid.iter())
        .filter(|(v, ok)| **ok && !v.is_nan())
        .fold((0.0f64, 0usize), |(s, n), (&v, _)| (s + v as f64, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Pixel window covered by a selection, or `EmptySelection`
pub fn selection_window(array: &DerivedIndexArray, selection: &PointSelection) -> CubeResult<Window> {
    let (min_x, max_x) = (selection.x - selection.radius, selection.x + selection.radius);
    let (min_y, max_y) = (selection.y - selection.radius, selection.y + selection.radius);

    let cols = array.easting().range_overlapping(min_x, max_x);
    let rows = array.northing().range_overlapping(min_y, max_y);
    match (rows, cols) {
        (Some((r0, r1)), Some((c0, c1))) => Ok(Window::new(r0, c0, r1 - r0, c1 - c0)),
        _ => Err(CubeError::EmptySelection {
            min_x,
            max_x,
            min_y,
            max_y,
        }),
    }
}

/// Average the index over the selection window and resample in calendar buckets.
///
/// Each time step is first averaged over its valid cells; each bucket is the
/// mean of its time steps that had any. Every bucket between the first and
/// last time step is reported, empty ones with a `None` value.
pub fn reduce(
    array: &DerivedIndexArray,
    selection: &PointSelection,
    bucket: TemporalBucket,
    executor: &Executor,
) -> CubeResult<ReducedSeries> {
    let window = selection_window(array, selection)?;
    log::info!(
        "Reducing {} time steps over {}x{} cells around ({}, {})",
        array.times().len(),
        window.rows,
        window.cols,
        selection.x,
        selection.y
    );

    let mut step_means = Vec::with_capacity(array.times().len());
    for (t, time) in array.times().iter().enumerate() {
        let chunk = array.materialize(t, window, executor)?;
        step_means.push((bucket.start_of(time), valid_mean(&chunk)));
    }

    let (Some(first), Some(last)) = (step_means.first(), step_means.last()) else {
        return Ok(ReducedSeries {
            bucket,
            points: Vec::new(),
        });
    };
    let (first, last) = (first.0, last.0);

    let mut points = Vec::new();
    let mut start = first;
    while start <= last {
        let in_bucket: Vec<Option<f64>> = step_means
            .iter()
            .filter(|(b, _)| *b == start)
            .map(|(_, m)| *m)
            .collect();
        let valid: Vec<f64> = in_bucket.iter().flatten().copied().collect();
        let value = if valid.is_empty() {
            None
        } else {
            Some(valid.iter().sum::<f64>() / valid.len() as f64)
        };
        points.push(SeriesPoint {
            start,
            value,
            steps: in_bucket.len(),
        });
        start = bucket.next(start)?;
    }

    Ok(ReducedSeries { bucket, points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::Array2;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 18, 30, 0).unwrap()
    }

    #[test]
    fn test_bucket_starts() {
        let t = at(2019, 12, 17);
        assert_eq!(TemporalBucket::Day.start_of(&t), NaiveDate::from_ymd_opt(2019, 12, 17).unwrap());
        assert_eq!(TemporalBucket::Month.start_of(&t), NaiveDate::from_ymd_opt(2019, 12, 1).unwrap());
        assert_eq!(TemporalBucket::Year.start_of(&t), NaiveDate::from_ymd_opt(2019, 1, 1).unwrap());
        assert_eq!(
            TemporalBucket::Month.next(NaiveDate::from_ymd_opt(2019, 12, 1).unwrap()).unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_valid_mean_skips_missing_and_nan() {
        let chunk = Chunk {
            values: Array2::from_shape_vec((1, 4), vec![0.2, f32::NAN, 0.4, 9.0]).unwrap(),
            valid: Array2::from_shape_vec((1, 4), vec![true, true, true, false]).unwrap(),
        };
        let mean = valid_mean(&chunk).unwrap();
        assert!((mean - 0.3).abs() < 1e-6);
        assert_eq!(valid_mean(&Chunk::missing(2, 2)), None);
    }

    #[test]
    fn test_selection_validation() {
        assert!(PointSelection::new(0.0, 0.0, -1.0).is_err());
        assert!(PointSelection::new(f64::NAN, 0.0, 1.0).is_err());
        assert!(PointSelection::new(1.0, 2.0, 0.0).is_ok());
    }
}
