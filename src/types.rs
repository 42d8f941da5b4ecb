use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// WRS-2 tile (path/row) identifying a Landsat repeat ground track cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub path: u16,
    pub row: u16,
}

impl TileId {
    pub fn new(path: u16, row: u16) -> Self {
        Self { path, row }
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}{:03}", self.path, self.row)
    }
}

/// Geographic point (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

/// Geospatial bounding box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// One footprint ring of a catalog item, in geographic coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub vertices: Vec<GeoPoint>,
}

impl Footprint {
    /// Bounding box of the ring, `None` for an empty ring
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.vertices.first()?;
        let mut bbox = BoundingBox {
            min_lon: first.lon,
            max_lon: first.lon,
            min_lat: first.lat,
            max_lat: first.lat,
        };
        for p in &self.vertices[1..] {
            bbox.min_lon = bbox.min_lon.min(p.lon);
            bbox.max_lon = bbox.max_lon.max(p.lon);
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.max_lat = bbox.max_lat.max(p.lat);
        }
        Some(bbox)
    }
}

/// Affine geotransform of a north-up raster (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0
    }
}

/// Metadata catalog entry for one acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub identifier: String,
    pub acquired: DateTime<Utc>,
    pub footprints: Vec<Footprint>,
}

impl CatalogItem {
    /// Union bounding box of all footprint rings
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.footprints
            .iter()
            .filter_map(|f| f.bounding_box())
            .reduce(|a, b| BoundingBox {
                min_lon: a.min_lon.min(b.min_lon),
                max_lon: a.max_lon.max(b.max_lon),
                min_lat: a.min_lat.min(b.min_lat),
                max_lat: a.max_lat.max(b.max_lat),
            })
    }
}

/// Remote location of one band of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandLocation {
    pub identifier: String,
    pub band: String,
    pub uri: String,
}

/// All band locations of one item, as produced by the archive resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemLocations {
    pub identifier: String,
    pub date: NaiveDate,
    /// Acquisition instant; midnight UTC of `date` unless the catalog said otherwise
    pub acquired: DateTime<Utc>,
    pub bands: BTreeMap<String, String>,
}

impl ItemLocations {
    pub fn band_locations(&self) -> impl Iterator<Item = BandLocation> + '_ {
        self.bands.iter().map(move |(band, uri)| BandLocation {
            identifier: self.identifier.clone(),
            band: band.clone(),
            uri: uri.clone(),
        })
    }
}

/// Error types for cube construction and analysis
#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Catalog returned no items for tile {tile} (tier {tier})")]
    CatalogEmpty { tile: TileId, tier: String },

    #[error("Malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Band {band} of {identifier} is not aligned with band {reference}")]
    BandMisalignment {
        identifier: String,
        band: String,
        reference: String,
    },

    #[error("Failed to load item {identifier}: {source}")]
    ItemLoadFailure {
        identifier: String,
        #[source]
        source: Box<CubeError>,
    },

    #[error("Selection x=[{min_x}, {max_x}] y=[{min_y}, {max_y}] does not intersect the data extent")]
    EmptySelection {
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
    },

    #[error("None of the {attempted} items could be loaded ({skipped} skipped)")]
    NoUsableItems { attempted: usize, skipped: usize },

    #[error("Unknown band: {0}")]
    UnknownBand(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Evaluation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl CubeError {
    /// Whether retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CubeError::Network(_) | CubeError::CatalogUnavailable(_))
    }
}

/// Result type for cube operations
pub type CubeResult<T> = Result<T, CubeError>;
