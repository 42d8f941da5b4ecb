//! I/O modules: catalog queries, archive locations and raster access

pub mod archive;
pub mod catalog;
pub mod memory;
pub mod raster;
pub mod retry;
#[cfg(feature = "gdal")]
pub mod gdal_backend;

pub use archive::{parse_identifier, ArchiveConfig, ArchiveResolver, ProductId};
pub use catalog::{parse_catalog_response, Catalog, CatalogClient, CatalogConfig};
pub use memory::{Failure, MemoryBackend, MemoryRaster};
pub use raster::{RasterBackend, RasterGrid, RasterHeader};
pub use retry::RetryPolicy;
#[cfg(feature = "gdal")]
pub use gdal_backend::{GdalBackend, GdalOptions};
