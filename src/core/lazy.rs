//! Deferred chunk evaluation.
//!
//! Arrays are graphs of [`ChunkSource`] nodes. A node computes any rectangular
//! window of itself from its inputs without touching shared mutable state, so
//! the [`Executor`] may evaluate chunks in any order and on any thread.

use crate::types::{CubeError, CubeResult};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Rectangular pixel window `(row, col)` .. `(row + rows, col + cols)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Window {
    pub fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self { row, col, rows, cols }
    }

    pub fn full(shape: (usize, usize)) -> Self {
        Self::new(0, 0, shape.0, shape.1)
    }

    pub fn row_end(&self) -> usize {
        self.row + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col + self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    pub fn fits(&self, shape: (usize, usize)) -> bool {
        self.row_end() <= shape.0 && self.col_end() <= shape.1
    }
}

/// Materialized window of a lazy plane. `valid == false` marks missing cells;
/// a valid cell may still hold NaN (an undefined result such as 0/0).
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub values: Array2<f32>,
    pub valid: Array2<bool>,
}

impl Chunk {
    pub fn missing(rows: usize, cols: usize) -> Self {
        Self {
            values: Array2::from_elem((rows, cols), f32::NAN),
            valid: Array2::from_elem((rows, cols), false),
        }
    }

    /// Wrap raw pixel values, flagging cells equal to `nodata` as missing
    pub fn from_values(values: Array2<f32>, nodata: Option<f64>) -> Self {
        let valid = match nodata {
            Some(nd) if nd.is_nan() => values.mapv(|v| !v.is_nan()),
            Some(nd) => {
                let nd = nd as f32;
                values.mapv(|v| v != nd)
            }
            None => Array2::from_elem(values.dim(), true),
        };
        let values = ndarray::Zip::from(&values)
            .and(&valid)
            .map_collect(|&v, &ok| if ok { v } else { f32::NAN });
        Self { values, valid }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Cell value, `None` when missing
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if self.valid[[row, col]] {
            Some(self.values[[row, col]])
        } else {
            None
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }
}

/// A lazily evaluated 2D plane
pub trait ChunkSource: Send + Sync + fmt::Debug {
    /// (rows, cols)
    fn shape(&self) -> (usize, usize);

    /// Compute one window. Must be pure: equal windows give bit-identical chunks.
    fn compute(&self, window: Window) -> CubeResult<Chunk>;
}

pub type LazyPlane = Arc<dyn ChunkSource>;

/// Cooperative cancellation flag checked between chunks
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Chunk granularity of evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub chunk_rows: usize,
    pub chunk_cols: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_rows: 2048,
            chunk_cols: 2048,
        }
    }
}

impl ChunkConfig {
    /// Whether this chunking is a whole multiple of a storage block shape
    pub fn is_multiple_of(&self, block: (usize, usize)) -> bool {
        block.0 > 0 && block.1 > 0 && self.chunk_rows % block.0 == 0 && self.chunk_cols % block.1 == 0
    }
}

/// Evaluates windows of lazy planes chunk by chunk
#[derive(Debug, Clone)]
pub struct Executor {
    chunks: ChunkConfig,
    cancel: CancelToken,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ChunkConfig::default())
    }
}

impl Executor {
    pub fn new(chunks: ChunkConfig) -> Self {
        Self {
            chunks,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        self.chunks
    }

    /// Split `window` along the global chunk grid
    pub fn tiles(&self, window: Window) -> Vec<Window> {
        let cr = self.chunks.chunk_rows.max(1);
        let cc = self.chunks.chunk_cols.max(1);
        let mut tiles = Vec::new();

        let mut r = window.row;
        while r < window.row_end() {
            let r_end = ((r / cr + 1) * cr).min(window.row_end());
            let mut c = window.col;
            while c < window.col_end() {
                let c_end = ((c / cc + 1) * cc).min(window.col_end());
                tiles.push(Window::new(r, c, r_end - r, c_end - c));
                c = c_end;
            }
            r = r_end;
        }
        tiles
    }

    fn compute_tile(&self, source: &dyn ChunkSource, tile: Window) -> CubeResult<(Window, Chunk)> {
        if self.cancel.is_cancelled() {
            return Err(CubeError::Cancelled);
        }
        let chunk = source.compute(tile)?;
        if chunk.dim() != (tile.rows, tile.cols) || chunk.valid.dim() != (tile.rows, tile.cols) {
            return Err(CubeError::Processing(format!(
                "chunk source returned {:?} for a {}x{} window",
                chunk.dim(),
                tile.rows,
                tile.cols
            )));
        }
        Ok((tile, chunk))
    }

    /// Materialize `window` of `source`
    pub fn materialize(&self, source: &dyn ChunkSource, window: Window) -> CubeResult<Chunk> {
        if !window.fits(source.shape()) {
            return Err(CubeError::InvalidParameter(format!(
                "window {:?} exceeds array shape {:?}",
                window,
                source.shape()
            )));
        }

        let tiles = self.tiles(window);
        log::debug!("Materializing {:?} as {} chunks", window, tiles.len());

        #[cfg(feature = "parallel")]
        let computed: CubeResult<Vec<(Window, Chunk)>> =
            tiles.into_par_iter().map(|t| self.compute_tile(source, t)).collect();
        #[cfg(not(feature = "parallel"))]
        let computed: CubeResult<Vec<(Window, Chunk)>> =
            tiles.into_iter().map(|t| self.compute_tile(source, t)).collect();

        let mut out = Chunk::missing(window.rows, window.cols);
        for (tile, chunk) in computed? {
            let r0 = tile.row - window.row;
            let c0 = tile.col - window.col;
            let region = s![r0..r0 + tile.rows, c0..c0 + tile.cols];
            out.values.slice_mut(region).assign(&chunk.values);
            out.valid.slice_mut(region).assign(&chunk.valid);
        }
        Ok(out)
    }

    /// Materialize the whole plane
    pub fn materialize_all(&self, source: &dyn ChunkSource) -> CubeResult<Chunk> {
        self.materialize(source, Window::full(source.shape()))
    }
}
