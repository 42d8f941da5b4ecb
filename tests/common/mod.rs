#![allow(dead_code)]

use landsat_cube::io::archive::{ArchiveConfig, ArchiveResolver};
use landsat_cube::io::memory::{MemoryBackend, MemoryRaster};
use landsat_cube::types::ItemLocations;
use ndarray::Array2;
use std::sync::Arc;

pub const ID_APRIL: &str = "LC08_L1TP_047027_20130421_20170310_01_T1";
pub const ID_MAY: &str = "LC08_L1TP_047027_20130507_20170310_01_T1";
pub const ID_JUNE: &str = "LC08_L1TP_047027_20130624_20170310_01_T1";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn resolver() -> ArchiveResolver {
    ArchiveResolver::new(ArchiveConfig {
        base_template: "mem://landsat/{path}/{row}".to_string(),
    })
}

/// Constant raster with pixel centres on x0..=x1, y0..=y1
pub fn raster(x0: f64, x1: f64, y0: f64, y1: f64, resolution: f64, value: f32) -> MemoryRaster {
    let cols = ((x1 - x0) / resolution).round() as usize + 1;
    let rows = ((y1 - y0) / resolution).round() as usize + 1;
    MemoryRaster::north_up(Array2::from_elem((rows, cols), value), x0, y1, resolution)
}

/// Resolve `ids` for bands B4/B5 and register one raster per band
pub fn register(
    backend: &MemoryBackend,
    ids: &[&str],
    make: impl Fn(usize, &str) -> MemoryRaster,
) -> Vec<ItemLocations> {
    let locations = resolver().resolve(ids, &["B4", "B5"]).unwrap();
    for (i, loc) in locations.iter().enumerate() {
        for (band, uri) in &loc.bands {
            backend.insert(uri.clone(), make(i, band));
        }
    }
    locations
}

pub fn shared(backend: MemoryBackend) -> (Arc<MemoryBackend>, Arc<dyn landsat_cube::io::raster::RasterBackend>) {
    let backend = Arc::new(backend);
    let dynamic: Arc<dyn landsat_cube::io::raster::RasterBackend> = backend.clone();
    (backend, dynamic)
}
