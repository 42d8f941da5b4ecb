//! In-process raster backend for offline use and tests

use crate::core::lazy::Window;
use crate::io::raster::{RasterBackend, RasterHeader};
use crate::types::{CubeError, CubeResult, GeoTransform};
use ndarray::{s, Array2};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// A raster held in memory
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    pub data: Array2<f32>,
    pub transform: GeoTransform,
    pub block_shape: (usize, usize),
    pub nodata: Option<f64>,
}

impl MemoryRaster {
    /// North-up raster whose top-left pixel centre is at (`x0`, `y0`)
    pub fn north_up(data: Array2<f32>, x0: f64, y0: f64, resolution: f64) -> Self {
        Self {
            data,
            transform: GeoTransform {
                top_left_x: x0 - 0.5 * resolution,
                pixel_width: resolution,
                rotation_x: 0.0,
                top_left_y: y0 + 0.5 * resolution,
                rotation_y: 0.0,
                pixel_height: -resolution,
            },
            block_shape: (256, 256),
            nodata: None,
        }
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn with_block_shape(mut self, rows: usize, cols: usize) -> Self {
        self.block_shape = (rows, cols);
        self
    }
}

/// Injected failure for a URI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Every access fails with a network error
    Unreachable,
    /// The next `n` accesses fail with a network error, then succeed
    Flaky(usize),
}

/// Backend serving [`MemoryRaster`]s keyed by URI, with read accounting
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rasters: RwLock<HashMap<String, MemoryRaster>>,
    failures: Mutex<HashMap<String, Failure>>,
    header_reads: AtomicUsize,
    window_reads: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, raster: MemoryRaster) {
        if let Ok(mut rasters) = self.rasters.write() {
            rasters.insert(uri.into(), raster);
        }
    }

    pub fn fail(&self, uri: impl Into<String>, failure: Failure) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(uri.into(), failure);
        }
    }

    pub fn header_reads(&self) -> usize {
        self.header_reads.load(Ordering::SeqCst)
    }

    pub fn window_reads(&self) -> usize {
        self.window_reads.load(Ordering::SeqCst)
    }

    fn check_failure(&self, uri: &str) -> CubeResult<()> {
        let mut failures = self
            .failures
            .lock()
            .map_err(|_| CubeError::Processing("failure table poisoned".to_string()))?;
        match failures.get_mut(uri) {
            Some(Failure::Unreachable) => Err(CubeError::Network(format!("{} is unreachable", uri))),
            Some(Failure::Flaky(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(CubeError::Network(format!("{} timed out", uri)))
            }
            _ => Ok(()),
        }
    }

    fn with_raster<T>(&self, uri: &str, f: impl FnOnce(&MemoryRaster) -> CubeResult<T>) -> CubeResult<T> {
        self.check_failure(uri)?;
        let rasters = self
            .rasters
            .read()
            .map_err(|_| CubeError::Processing("raster table poisoned".to_string()))?;
        let raster = rasters.get(uri).ok_or_else(|| {
            CubeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no raster at {}", uri),
            ))
        })?;
        f(raster)
    }
}

impl RasterBackend for MemoryBackend {
    fn header(&self, uri: &str) -> CubeResult<RasterHeader> {
        self.header_reads.fetch_add(1, Ordering::SeqCst);
        self.with_raster(uri, |r| {
            let (rows, cols) = r.data.dim();
            Ok(RasterHeader {
                rows,
                cols,
                transform: r.transform,
                block_shape: r.block_shape,
                nodata: r.nodata,
            })
        })
    }

    fn read_window(&self, uri: &str, window: Window) -> CubeResult<Array2<f32>> {
        self.window_reads.fetch_add(1, Ordering::SeqCst);
        self.with_raster(uri, |r| {
            if !window.fits(r.data.dim()) {
                return Err(CubeError::InvalidParameter(format!(
                    "window {:?} outside {} ({:?})",
                    window,
                    uri,
                    r.data.dim()
                )));
            }
            Ok(r
                .data
                .slice(s![window.row..window.row_end(), window.col..window.col_end()])
                .to_owned())
        })
    }
}
