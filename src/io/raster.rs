use crate::core::axis::CoordinateAxis;
use crate::core::lazy::{Chunk, ChunkConfig, ChunkSource, Window};
use crate::io::retry::RetryPolicy;
use crate::types::{CubeError, CubeResult, GeoTransform};
use ndarray::Array2;
use std::fmt;
use std::sync::Arc;

/// Header-level facts about a single-band raster, readable without pixel I/O
#[derive(Debug, Clone, PartialEq)]
pub struct RasterHeader {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    /// Native storage block (tile) shape as (rows, cols)
    pub block_shape: (usize, usize),
    pub nodata: Option<f64>,
}

impl RasterHeader {
    /// Easting axis of pixel centres
    pub fn easting(&self) -> CubeResult<CoordinateAxis> {
        let t = &self.transform;
        CoordinateAxis::new(t.top_left_x + 0.5 * t.pixel_width, t.pixel_width, self.cols)
    }

    /// Northing axis of pixel centres
    pub fn northing(&self) -> CubeResult<CoordinateAxis> {
        let t = &self.transform;
        CoordinateAxis::new(t.top_left_y + 0.5 * t.pixel_height, t.pixel_height, self.rows)
    }
}

/// Access to remote or local single-band rasters
pub trait RasterBackend: Send + Sync {
    /// Read only the header of the raster at `uri`
    fn header(&self, uri: &str) -> CubeResult<RasterHeader>;

    /// Read raw pixel values of `window` (rows x cols)
    fn read_window(&self, uri: &str, window: Window) -> CubeResult<Array2<f32>>;
}

/// A lazily-read single-band raster with georeferenced axes.
///
/// Opening reads the header only; pixels are fetched when a window is computed.
#[derive(Clone)]
pub struct RasterGrid {
    backend: Arc<dyn RasterBackend>,
    uri: String,
    header: RasterHeader,
    northing: CoordinateAxis,
    easting: CoordinateAxis,
    chunks: ChunkConfig,
    retry: RetryPolicy,
}

impl fmt::Debug for RasterGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterGrid")
            .field("uri", &self.uri)
            .field("shape", &(self.header.rows, self.header.cols))
            .field("northing", &self.northing)
            .field("easting", &self.easting)
            .finish()
    }
}

impl RasterGrid {
    pub fn open(
        backend: Arc<dyn RasterBackend>,
        uri: &str,
        chunks: ChunkConfig,
        retry: RetryPolicy,
    ) -> CubeResult<Self> {
        let header = retry.run(&format!("header read of {}", uri), || backend.header(uri))?;

        if !header.transform.is_north_up() {
            return Err(CubeError::InvalidFormat(format!(
                "{} has a rotated geotransform {:?}",
                uri, header.transform
            )));
        }
        let northing = header.northing()?;
        let easting = header.easting()?;

        if !chunks.is_multiple_of(header.block_shape) {
            log::warn!(
                "Chunk shape {}x{} is not a multiple of the {}x{} storage blocks of {}; reads will re-fetch blocks",
                chunks.chunk_rows,
                chunks.chunk_cols,
                header.block_shape.0,
                header.block_shape.1,
                uri
            );
        }

        log::debug!("Opened {} ({}x{}, blocks {:?})", uri, header.rows, header.cols, header.block_shape);

        Ok(Self {
            backend,
            uri: uri.to_string(),
            header,
            northing,
            easting,
            chunks,
            retry,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn header(&self) -> &RasterHeader {
        &self.header
    }

    pub fn northing(&self) -> &CoordinateAxis {
        &self.northing
    }

    pub fn easting(&self) -> &CoordinateAxis {
        &self.easting
    }

    pub fn chunks(&self) -> ChunkConfig {
        self.chunks
    }

    /// Whether both axes match another grid's
    pub fn same_axes(&self, other: &RasterGrid) -> bool {
        self.northing.approx_eq(&other.northing) && self.easting.approx_eq(&other.easting)
    }
}

impl ChunkSource for RasterGrid {
    fn shape(&self) -> (usize, usize) {
        (self.header.rows, self.header.cols)
    }

    fn compute(&self, window: Window) -> CubeResult<Chunk> {
        if window.is_empty() {
            return Ok(Chunk::missing(window.rows, window.cols));
        }
        let values = self
            .retry
            .run(&format!("window read of {}", self.uri), || self.backend.read_window(&self.uri, window))?;
        if values.dim() != (window.rows, window.cols) {
            return Err(CubeError::InvalidFormat(format!(
                "{} returned {:?} pixels for a {}x{} window",
                self.uri,
                values.dim(),
                window.rows,
                window.cols
            )));
        }
        Ok(Chunk::from_values(values, self.header.nodata))
    }
}
