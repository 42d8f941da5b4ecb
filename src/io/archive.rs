use crate::types::{CubeError, CubeResult, ItemLocations, TileId};
use chrono::{NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Public Landsat Collection 1 archive on Google Cloud Storage
pub const DEFAULT_BASE_TEMPLATE: &str =
    "https://storage.googleapis.com/gcp-public-data-landsat/LC08/01/{path}/{row}";

/// `<sensor prefix><path:3><row:3>`
const TILE_FIELD_PATTERN: &str = r"^([A-Za-z]*)(\d{3})(\d{3})$";

fn tile_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TILE_FIELD_PATTERN).expect("tile field pattern compiles"))
}

/// Structural components of a product identifier such as
/// `LC08_L1TP_047027_20130421_20170310_01_T1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductId {
    pub sensor: String,
    pub tile: TileId,
    pub acquired: NaiveDate,
}

/// Parse an underscore-delimited product identifier.
///
/// Field 2 holds an optional alphabetic sensor prefix followed by the 3-digit
/// path and 3-digit row, field 3 the acquisition date as `YYYYMMDD`.
pub fn parse_identifier(identifier: &str) -> CubeResult<ProductId> {
    let malformed = |why: &str| CubeError::MalformedIdentifier(format!("{}: {}", identifier, why));

    let fields: Vec<&str> = identifier.split('_').collect();
    if fields.len() < 4 || fields[0].is_empty() {
        return Err(malformed("expected at least 4 underscore-delimited fields"));
    }

    let caps = tile_field_regex()
        .captures(fields[2])
        .ok_or_else(|| malformed("field 2 is not <sensor><path:3><row:3>"))?;
    let prefix = &caps[1];
    let path: u16 = caps[2].parse().map_err(|_| malformed("bad path"))?;
    let row: u16 = caps[3].parse().map_err(|_| malformed("bad row"))?;

    if fields[3].len() != 8 {
        return Err(malformed("field 3 is not a YYYYMMDD date"));
    }
    let acquired = NaiveDate::parse_from_str(fields[3], "%Y%m%d")
        .map_err(|_| malformed("field 3 is not a YYYYMMDD date"))?;

    let sensor = if prefix.is_empty() { fields[0] } else { prefix };

    Ok(ProductId {
        sensor: sensor.to_string(),
        tile: TileId::new(path, row),
        acquired,
    })
}

/// Archive layout parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Base location with `{path}` and `{row}` placeholders (3-digit, zero padded)
    pub base_template: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_template: DEFAULT_BASE_TEMPLATE.to_string(),
        }
    }
}

impl ArchiveConfig {
    pub fn base_url(&self, tile: TileId) -> String {
        self.base_template
            .replace("{path}", &format!("{:03}", tile.path))
            .replace("{row}", &format!("{:03}", tile.row))
            .trim_end_matches('/')
            .to_string()
    }
}

/// Derives per-band raster URIs from product identifiers. Pure, no network access.
#[derive(Debug, Clone, Default)]
pub struct ArchiveResolver {
    config: ArchiveConfig,
}

impl ArchiveResolver {
    pub fn new(config: ArchiveConfig) -> Self {
        Self { config }
    }

    /// URI of one band file below an item's base location
    pub fn band_uri(base: &str, identifier: &str, band: &str) -> String {
        format!("{}/{}/{}_{}.TIF", base, identifier, identifier, band)
    }

    /// Resolve every identifier; any malformed identifier fails the whole call.
    ///
    /// Path and row come from the first identifier, matching the archive's
    /// one-tile-per-query layout.
    pub fn resolve<S: AsRef<str>, B: AsRef<str>>(
        &self,
        identifiers: &[S],
        bands: &[B],
    ) -> CubeResult<Vec<ItemLocations>> {
        if bands.is_empty() {
            return Err(CubeError::InvalidParameter("no bands requested".to_string()));
        }
        let parsed = identifiers
            .iter()
            .map(|id| parse_identifier(id.as_ref()).map(|p| (id.as_ref(), p)))
            .collect::<CubeResult<Vec<_>>>()?;
        Ok(self.build(&parsed, bands))
    }

    /// Resolve the well-formed identifiers and hand back the rejected ones
    pub fn resolve_lenient<S: AsRef<str>, B: AsRef<str>>(
        &self,
        identifiers: &[S],
        bands: &[B],
    ) -> CubeResult<(Vec<ItemLocations>, Vec<(String, CubeError)>)> {
        if bands.is_empty() {
            return Err(CubeError::InvalidParameter("no bands requested".to_string()));
        }
        let mut parsed = Vec::with_capacity(identifiers.len());
        let mut rejected = Vec::new();
        for id in identifiers {
            match parse_identifier(id.as_ref()) {
                Ok(p) => parsed.push((id.as_ref(), p)),
                Err(e) => {
                    log::warn!("Skipping identifier {}: {}", id.as_ref(), e);
                    rejected.push((id.as_ref().to_string(), e));
                }
            }
        }
        Ok((self.build(&parsed, bands), rejected))
    }

    fn build<B: AsRef<str>>(&self, parsed: &[(&str, ProductId)], bands: &[B]) -> Vec<ItemLocations> {
        let Some((_, first)) = parsed.first() else {
            return Vec::new();
        };
        let base = self.config.base_url(first.tile);
        log::debug!("Archive base location for tile {}: {}", first.tile, base);

        parsed
            .iter()
            .map(|(identifier, product)| {
                if product.tile != first.tile {
                    log::warn!(
                        "{} belongs to tile {} but is resolved under tile {}",
                        identifier,
                        product.tile,
                        first.tile
                    );
                }
                let bands: BTreeMap<String, String> = bands
                    .iter()
                    .map(|b| {
                        let band = b.as_ref();
                        (band.to_string(), Self::band_uri(&base, identifier, band))
                    })
                    .collect();
                ItemLocations {
                    identifier: identifier.to_string(),
                    date: product.acquired,
                    acquired: Utc.from_utc_datetime(&product.acquired.and_time(chrono::NaiveTime::MIN)),
                    bands,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_field_pattern_is_shared_across_threads() {
        assert!(Regex::new(TILE_FIELD_PATTERN).is_ok());
        let ids = [
            "LC08_L1TP_047027_20130421_20170310_01_T1",
            "LE07_L1TP_123045_20010102_20170201_01_T1",
            "LC08_L1TP_X001002_20200229",
        ];
        std::thread::scope(|scope| {
            for id in ids {
                scope.spawn(move || {
                    for _ in 0..50 {
                        assert!(parse_identifier(id).is_ok(), "{}", id);
                    }
                });
            }
        });
        assert!(std::ptr::eq(tile_field_regex(), tile_field_regex()));
        let p = parse_identifier("LE07_L1TP_123045_20010102_20170201_01_T1").unwrap();
        assert_eq!(p.tile, TileId::new(123, 45));
    }

    #[test]
    fn test_parse_collection1_identifier() {
        let p = parse_identifier("LC08_L1TP_047027_20130421_20170310_01_T1").unwrap();
        assert_eq!(p.sensor, "LC08");
        assert_eq!(p.tile, TileId::new(47, 27));
        assert_eq!(p.acquired, NaiveDate::from_ymd_opt(2013, 4, 21).unwrap());
    }

    #[test]
    fn test_parse_prefixed_tile_field() {
        let p = parse_identifier("LC08_L1TP_X047027_20130421").unwrap();
        assert_eq!(p.sensor, "X");
        assert_eq!(p.tile, TileId::new(47, 27));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "LC08",
            "LC08_L1TP_4727_20130421",
            "LC08_L1TP_047027_2013042",
            "LC08_L1TP_047027_20131341",
            "LC08_L1TP_047A27_20130421",
        ] {
            assert!(
                matches!(parse_identifier(bad), Err(CubeError::MalformedIdentifier(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_base_url_pads_path_and_row() {
        let config = ArchiveConfig::default();
        assert_eq!(
            config.base_url(TileId::new(47, 27)),
            "https://storage.googleapis.com/gcp-public-data-landsat/LC08/01/047/027"
        );
    }
}
