mod common;

use approx::assert_relative_eq;
use chrono::NaiveDate;
use common::*;
use landsat_cube::core::index::{compute_index, ndvi, DerivedIndexArray};
use landsat_cube::core::lazy::{CancelToken, ChunkConfig, Executor, Window};
use landsat_cube::core::merge::build_dataset;
use landsat_cube::core::reduce::{reduce, PointSelection, TemporalBucket};
use landsat_cube::io::memory::{MemoryBackend, MemoryRaster};
use landsat_cube::io::retry::RetryPolicy;
use landsat_cube::types::CubeError;

const NODATA: f64 = -9999.0;

fn chunks() -> ChunkConfig {
    ChunkConfig { chunk_rows: 3, chunk_cols: 3 }
}

fn index_over(ids: &[&str], make: impl Fn(usize, &str) -> MemoryRaster) -> DerivedIndexArray {
    let backend = MemoryBackend::new();
    let locations = register(&backend, ids, make);
    let (_, backend) = shared(backend);
    let unification = build_dataset(backend, &locations, chunks(), &RetryPolicy::none()).unwrap();
    assert!(unification.diagnostics.is_empty());
    ndvi(&unification.dataset, "B4", "B5").unwrap()
}

/// Red/NIR pair with reflectances `red` and `nir` over x, y in [0, 4]
fn pair(band: &str, red: f32, nir: f32) -> MemoryRaster {
    let value = if band == "B4" { red } else { nir };
    raster(0.0, 4.0, 0.0, 4.0, 1.0, value).with_nodata(NODATA)
}

#[test]
fn test_ndvi_values_stay_in_range() {
    init_logging();
    let reflectances = [(0.1, 0.5), (0.5, 0.1), (0.3, 0.3), (0.0, 0.7), (0.25, 0.0)];
    let ids = [ID_APRIL, ID_MAY, ID_JUNE];
    for &(red, nir) in &reflectances {
        let index = index_over(&ids[..1], |_, band| pair(band, red, nir));
        let exec = Executor::new(chunks());
        let chunk = exec.materialize_all(index.plane(0).unwrap().as_ref()).unwrap();
        assert_eq!(chunk.valid_count(), 25);
        for v in chunk.values.iter() {
            assert!((-1.0..=1.0).contains(v), "{} out of range", v);
            assert_relative_eq!(*v, (nir - red) / (nir + red), epsilon = 1e-6);
        }
    }
}

#[test]
fn test_zero_sum_is_nan_and_missing_propagates() {
    let index = index_over(&[ID_APRIL], |_, band| {
        let mut r = pair(band, 0.0, 0.0);
        // raster row 0 is the top (y = 4); column 0 is x = 0
        r.data[[0, 0]] = 0.2;
        if band == "B5" {
            r.data[[0, 0]] = 0.6;
            r.data[[4, 4]] = NODATA as f32;
        }
        r
    });

    let exec = Executor::new(chunks());
    let chunk = exec.materialize_all(index.plane(0).unwrap().as_ref()).unwrap();
    let at = |x: f64, y: f64| {
        let row = index.northing().index_of(y).unwrap();
        let col = index.easting().index_of(x).unwrap();
        chunk.get(row, col)
    };

    assert_relative_eq!(at(0.0, 4.0).unwrap(), 0.5, epsilon = 1e-6);
    // present but undefined
    assert!(at(1.0, 1.0).unwrap().is_nan());
    // missing in one input
    assert_eq!(at(4.0, 0.0), None);
    assert_eq!(chunk.valid_count(), 24);
}

#[test]
fn test_index_keeps_dataset_axes() {
    let backend = MemoryBackend::new();
    let locations = register(&backend, &[ID_APRIL, ID_MAY], |i, band| {
        if i == 0 {
            pair(band, 0.1, 0.3)
        } else {
            raster(2.0, 9.0, 1.0, 3.0, 1.0, 0.4)
        }
    });
    let (_, backend) = shared(backend);
    let dataset = build_dataset(backend, &locations, chunks(), &RetryPolicy::none())
        .unwrap()
        .dataset;

    let index = compute_index(&dataset, "B4", "B5").unwrap();
    assert_eq!(index.shape(), dataset.shape());
    assert_eq!(index.times(), dataset.times());
    assert_eq!(index.northing(), dataset.northing());
    assert_eq!(index.easting(), dataset.easting());

    assert!(matches!(compute_index(&dataset, "B4", "B7"), Err(CubeError::UnknownBand(_))));
}

#[test]
fn test_materialization_is_idempotent() {
    let index = index_over(&[ID_APRIL, ID_MAY], |i, band| {
        let mut r = pair(band, 0.1 + i as f32 * 0.1, 0.6);
        r.data.indexed_iter_mut().for_each(|((row, col), v)| *v += (row * 5 + col) as f32 * 0.01);
        r
    });

    let window = Window::new(1, 1, 4, 3);
    let serial = Executor::new(ChunkConfig { chunk_rows: 1, chunk_cols: 1 });
    let coarse = Executor::new(ChunkConfig { chunk_rows: 64, chunk_cols: 64 });
    for t in 0..index.times().len() {
        let a = index.materialize(t, window, &serial).unwrap();
        let b = index.materialize(t, window, &coarse).unwrap();
        let c = index.materialize(t, window, &serial).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }
}

#[test]
fn test_cancelled_executor_stops() {
    let index = index_over(&[ID_APRIL], |_, band| pair(band, 0.1, 0.5));
    let cancel = CancelToken::new();
    let exec = Executor::new(chunks()).with_cancel_token(cancel.clone());
    assert!(index.materialize(0, Window::new(0, 0, 5, 5), &exec).is_ok());

    cancel.cancel();
    assert!(matches!(
        index.materialize(0, Window::new(0, 0, 5, 5), &exec),
        Err(CubeError::Cancelled)
    ));
}

#[test]
fn test_monthly_series_reports_gap_month() {
    let late_june = "LC08_L1TP_047027_20130630_20170310_01_T1";
    let index = index_over(&[ID_APRIL, ID_JUNE, late_june], |i, band| match i {
        0 => pair(band, 0.1, 0.3),
        1 => pair(band, 0.2, 0.6),
        _ => pair(band, 0.3, 0.3),
    });

    let selection = PointSelection::new(2.0, 2.0, 1.0).unwrap();
    let series = reduce(&index, &selection, TemporalBucket::Month, &Executor::new(chunks())).unwrap();

    let starts: Vec<NaiveDate> = series.points.iter().map(|p| p.start).collect();
    assert_eq!(
        starts,
        vec![
            NaiveDate::from_ymd_opt(2013, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2013, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2013, 6, 1).unwrap(),
        ]
    );
    assert_relative_eq!(series.points[0].value.unwrap(), 0.5, epsilon = 1e-6);
    assert_eq!(series.points[1].value, None);
    assert_eq!(series.points[1].steps, 0);
    // June averages 0.5 and 0.0
    assert_relative_eq!(series.points[2].value.unwrap(), 0.25, epsilon = 1e-6);
    assert_eq!(series.points[2].steps, 2);
}

#[test]
fn test_bucket_with_only_missing_cells_is_kept() {
    let index = index_over(&[ID_APRIL, ID_MAY], |i, band| {
        if i == 1 {
            // May has nothing near the selection
            let mut r = pair(band, 0.1, 0.3);
            r.data.fill(NODATA as f32);
            r.data[[4, 4]] = 0.2;
            r
        } else {
            pair(band, 0.1, 0.3)
        }
    });

    let selection = PointSelection::new(1.0, 3.0, 1.0).unwrap();
    let series = reduce(&index, &selection, TemporalBucket::Month, &Executor::new(chunks())).unwrap();
    assert_eq!(series.points.len(), 2);
    assert!(series.points[0].value.is_some());
    assert_eq!(series.points[1].value, None);
    assert_eq!(series.points[1].steps, 1);
}

#[test]
fn test_selection_outside_extent_is_empty() {
    let index = index_over(&[ID_APRIL], |_, band| pair(band, 0.1, 0.3));
    let selection = PointSelection::new(100.0, 100.0, 5.0).unwrap();
    let err = reduce(&index, &selection, TemporalBucket::Year, &Executor::new(chunks())).unwrap_err();
    match err {
        CubeError::EmptySelection { min_x, max_x, .. } => {
            assert_eq!(min_x, 95.0);
            assert_eq!(max_x, 105.0);
        }
        other => panic!("expected EmptySelection, got {:?}", other),
    }
}

#[test]
fn test_yearly_series_averages_step_means() {
    let index = index_over(&[ID_APRIL, ID_MAY, ID_JUNE], |i, band| match i {
        0 => pair(band, 0.1, 0.3),
        1 => pair(band, 0.3, 0.1),
        _ => pair(band, 0.0, 0.4),
    });
    let selection = PointSelection::new(2.0, 2.0, 10.0).unwrap();
    let series = reduce(&index, &selection, TemporalBucket::Year, &Executor::new(chunks())).unwrap();
    assert_eq!(series.points.len(), 1);
    assert_eq!(series.points[0].steps, 3);
    assert_relative_eq!(series.values()[0].unwrap(), 1.0 / 3.0, epsilon = 1e-6);
}

#[test]
fn test_sub_pixel_selection_between_centres() {
    let index = index_over(&[ID_APRIL], |_, band| {
        let mut r = pair(band, 0.1, 0.3);
        if band == "B5" {
            // x = 2, y = 2 and x = 3, y = 3 (raster row 0 is y = 4)
            r.data[[2, 2]] = 0.1;
            r.data[[1, 3]] = 0.1;
        }
        r
    });
    let exec = Executor::new(chunks());

    // window [2.3, 2.7] holds no cell centre but overlaps four cells
    let selection = PointSelection::new(2.5, 2.5, 0.2).unwrap();
    let series = reduce(&index, &selection, TemporalBucket::Day, &exec).unwrap();
    assert_eq!(series.points.len(), 1);
    // two cells at 0.5, two at 0.0
    assert_relative_eq!(series.points[0].value.unwrap(), 0.25, epsilon = 1e-6);

    // inside one cell
    let selection = PointSelection::new(2.1, 1.9, 0.05).unwrap();
    let series = reduce(&index, &selection, TemporalBucket::Day, &exec).unwrap();
    assert_relative_eq!(series.points[0].value.unwrap(), 0.0, epsilon = 1e-6);

    // zero radius inside the outermost half cell
    let selection = PointSelection::new(4.4, -0.4, 0.0).unwrap();
    assert!(reduce(&index, &selection, TemporalBucket::Day, &exec).is_ok());

    let selection = PointSelection::new(4.6, 2.0, 0.05).unwrap();
    assert!(matches!(
        reduce(&index, &selection, TemporalBucket::Day, &exec),
        Err(CubeError::EmptySelection { .. })
    ));
}
