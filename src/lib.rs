//! landsat-cube: lazy Landsat time-series cubes
//!
//! Queries a metadata catalog for the acquisitions of one WRS-2 tile, derives
//! the cloud archive locations of their bands, aligns them onto one
//! outer-joined (time, northing, easting) grid without reading pixels, and
//! computes vegetation indices and point time series chunk by chunk.

pub mod types;
pub mod io;
pub mod core;
pub mod pipeline;
#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BandLocation, BoundingBox, CatalogItem, CubeError, CubeResult, Footprint, GeoPoint, GeoTransform,
    ItemLocations, TileId,
};

pub use crate::io::{ArchiveResolver, Catalog, CatalogClient, MemoryBackend, RasterBackend, RasterGrid, RetryPolicy};
pub use crate::core::{
    build_dataset, compute_index, ndvi, reduce, unify, DerivedIndexArray, Executor, PointSelection,
    ReducedSeries, TemporalBucket, UnifiedDataset,
};
pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineOutput};
