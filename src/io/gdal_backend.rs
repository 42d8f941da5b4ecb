//! GDAL-backed raster access; remote files are read through `/vsicurl/`

use crate::core::lazy::Window;
use crate::io::raster::{RasterBackend, RasterHeader};
use crate::types::{CubeError, CubeResult, GeoTransform};
use gdal::Dataset;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::Once;

/// Process-wide GDAL read tuning. These only affect remote-read efficiency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GdalOptions {
    /// `GDAL_DISABLE_READDIR_ON_OPEN`
    pub disable_readdir_on_open: String,
    /// `CPL_VSIL_CURL_ALLOWED_EXTENSIONS`
    pub allowed_extensions: String,
}

impl Default for GdalOptions {
    fn default() -> Self {
        Self {
            disable_readdir_on_open: "EMPTY_DIR".to_string(),
            allowed_extensions: "TIF".to_string(),
        }
    }
}

static CONFIGURE: Once = Once::new();

/// Raster backend reading band 1 of any GDAL-readable dataset
#[derive(Debug, Clone, Default)]
pub struct GdalBackend;

impl GdalBackend {
    /// Create the backend, applying `options` the first time any backend is created
    pub fn new(options: &GdalOptions) -> Self {
        CONFIGURE.call_once(|| {
            for (key, value) in [
                ("GDAL_DISABLE_READDIR_ON_OPEN", options.disable_readdir_on_open.as_str()),
                ("CPL_VSIL_CURL_ALLOWED_EXTENSIONS", options.allowed_extensions.as_str()),
            ] {
                if let Err(e) = gdal::config::set_config_option(key, value) {
                    log::warn!("Failed to set {}={}: {}", key, value, e);
                }
            }
        });
        GdalBackend
    }

    /// GDAL path for a URI
    pub fn gdal_path(uri: &str) -> String {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            format!("/vsicurl/{}", uri)
        } else {
            uri.to_string()
        }
    }

    fn open(uri: &str) -> CubeResult<Dataset> {
        let path = Self::gdal_path(uri);
        Dataset::open(&path).map_err(|e| {
            if path.starts_with("/vsicurl/") && is_transport_failure(&e.to_string()) {
                CubeError::Network(format!("Failed to open {}: {}", uri, e))
            } else {
                CubeError::Gdal(e)
            }
        })
    }
}

/// Whether a curl-backed GDAL error message describes a transport failure
/// (worth retrying) rather than a missing or unreadable object.
fn is_transport_failure(message: &str) -> bool {
    const MARKERS: [&str; 9] = [
        "timed out",
        "timeout",
        "couldn't resolve",
        "could not resolve",
        "couldn't connect",
        "failed to connect",
        "connection reset",
        "http response code: 5",
        "http response code: 429",
    ];
    let message = message.to_ascii_lowercase();
    MARKERS.iter().any(|m| message.contains(m))
}

impl RasterBackend for GdalBackend {
    fn header(&self, uri: &str) -> CubeResult<RasterHeader> {
        let dataset = Self::open(uri)?;
        let (width, height) = dataset.raster_size();
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let band = dataset.rasterband(1)?;
        let (block_x, block_y) = band.block_size();

        Ok(RasterHeader {
            rows: height,
            cols: width,
            transform,
            block_shape: (block_y, block_x),
            nodata: band.no_data_value(),
        })
    }

    fn read_window(&self, uri: &str, window: Window) -> CubeResult<Array2<f32>> {
        let dataset = Self::open(uri)?;
        let band = dataset.rasterband(1)?;
        let buffer = band.read_as::<f32>(
            (window.col as isize, window.row as isize),
            (window.cols, window.rows),
            (window.cols, window.rows),
            None,
        )?;
        Array2::from_shape_vec((window.rows, window.cols), buffer.data)
            .map_err(|e| CubeError::Processing(format!("Failed to reshape pixels of {}: {}", uri, e)))
    }
}
