use crate::io::archive::parse_identifier;
use crate::io::retry::RetryPolicy;
use crate::types::{CatalogItem, CubeError, CubeResult, Footprint, GeoPoint, TileId};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CMR_ENDPOINT: &str = "https://cmr.earthdata.nasa.gov/search/granules.json";

/// Catalog query parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub endpoint: String,
    pub collection: String,
    pub tier: String,
    pub page_size: u32,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CMR_ENDPOINT.to_string(),
            collection: "Landsat_8_OLI_TIRS_C1".to_string(),
            tier: "T1".to_string(),
            page_size: 2000,
            timeout_secs: 100,
            retry: RetryPolicy::default(),
        }
    }
}

/// Source of catalog items for a tile
pub trait Catalog: Send + Sync {
    fn query(
        &self,
        tile: TileId,
        tier: &str,
        collection: &str,
        page_size: u32,
    ) -> CubeResult<Vec<CatalogItem>>;
}

#[derive(Debug, Deserialize)]
struct CmrResponse {
    feed: CmrFeed,
}

#[derive(Debug, Deserialize)]
struct CmrFeed {
    #[serde(default)]
    entry: Vec<CmrEntry>,
}

#[derive(Debug, Deserialize)]
struct CmrEntry {
    title: String,
    #[serde(default)]
    time_start: Option<String>,
    #[serde(default)]
    polygons: Vec<Vec<String>>,
}

/// Parse a `lat lon lat lon ...` ring
fn parse_ring(ring: &str) -> CubeResult<Footprint> {
    let values = ring
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f64>()
                .map_err(|_| CubeError::InvalidFormat(format!("non-numeric polygon coordinate '{}'", tok)))
        })
        .collect::<CubeResult<Vec<f64>>>()?;

    if values.len() % 2 != 0 {
        return Err(CubeError::InvalidFormat(format!(
            "polygon has an odd number of coordinates ({})",
            values.len()
        )));
    }

    Ok(Footprint {
        vertices: values
            .chunks_exact(2)
            .map(|pair| GeoPoint { lat: pair[0], lon: pair[1] })
            .collect(),
    })
}

fn parse_entry(entry: CmrEntry) -> CubeResult<CatalogItem> {
    let product = parse_identifier(&entry.title)?;

    let acquired = match entry.time_start.as_deref() {
        Some(ts) => DateTime::parse_from_rfc3339(ts)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| CubeError::InvalidFormat(format!("{}: bad time_start '{}': {}", entry.title, ts, e)))?,
        None => Utc.from_utc_datetime(&product.acquired.and_time(chrono::NaiveTime::MIN)),
    };

    let footprints = entry
        .polygons
        .iter()
        .flatten()
        .map(|ring| parse_ring(ring))
        .collect::<CubeResult<Vec<_>>>()?;

    Ok(CatalogItem {
        identifier: entry.title,
        acquired,
        footprints,
    })
}

/// Parse a CMR granule search document.
///
/// Entries with a malformed identifier, time or footprint are skipped with a
/// warning; a document that is not a CMR feed is an error.
pub fn parse_catalog_response(body: &str) -> CubeResult<Vec<CatalogItem>> {
    let response: CmrResponse = serde_json::from_str(body)?;
    let mut items = Vec::with_capacity(response.feed.entry.len());
    for entry in response.feed.entry {
        let title = entry.title.clone();
        match parse_entry(entry) {
            Ok(item) => items.push(item),
            Err(e @ (CubeError::MalformedIdentifier(_) | CubeError::InvalidFormat(_))) => {
                log::warn!("Skipping catalog entry {}: {}", title, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(items)
}

/// Blocking client for the CMR granule search endpoint
pub struct CatalogClient {
    client: reqwest::blocking::Client,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> CubeResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CubeError::CatalogUnavailable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Query with the configured tier, collection and page size
    pub fn query_tile(&self, tile: TileId) -> CubeResult<Vec<CatalogItem>> {
        self.query(tile, &self.config.tier, &self.config.collection, self.config.page_size)
    }

    /// Query parameters in request order
    pub fn query_params(tile: TileId, tier: &str, collection: &str, page_size: u32) -> Vec<(String, String)> {
        vec![
            ("short_name".to_string(), collection.to_string()),
            ("page_size".to_string(), page_size.to_string()),
            ("attribute[]".to_string(), format!("string,CollectionCategory,{}", tier)),
            ("attribute[]".to_string(), format!("int,WRSPath,{}", tile.path)),
            ("attribute[]".to_string(), format!("int,WRSRow,{}", tile.row)),
        ]
    }

    fn fetch(&self, params: &[(String, String)]) -> CubeResult<String> {
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(params)
            .send()
            .map_err(|e| CubeError::Network(format!("Catalog request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CubeError::Network(format!("Catalog returned status {}", status)));
        }
        if !status.is_success() {
            return Err(CubeError::Processing(format!("Catalog rejected query with status {}", status)));
        }

        response
            .text()
            .map_err(|e| CubeError::Network(format!("Failed to read catalog response: {}", e)))
    }
}

impl Catalog for CatalogClient {
    fn query(
        &self,
        tile: TileId,
        tier: &str,
        collection: &str,
        page_size: u32,
    ) -> CubeResult<Vec<CatalogItem>> {
        log::info!(
            "Querying catalog {} for {} tile {} tier {}",
            self.config.endpoint,
            collection,
            tile,
            tier
        );
        let params = Self::query_params(tile, tier, collection, page_size);

        let body = self
            .config
            .retry
            .run("catalog query", || self.fetch(&params))
            .map_err(|e| match e {
                CubeError::CatalogUnavailable(_) => e,
                other => CubeError::CatalogUnavailable(other.to_string()),
            })?;

        let items = parse_catalog_response(&body)?;
        log::info!("Catalog returned {} items for tile {}", items.len(), tile);

        if items.is_empty() {
            return Err(CubeError::CatalogEmpty {
                tile,
                tier: tier.to_string(),
            });
        }
        Ok(items)
    }
}
