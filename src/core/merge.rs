//! Raster alignment and merge engine.
//!
//! Stage A opens every band of one acquisition and checks that they share
//! axes. Stage B places all acquisitions on one outer-joined grid and stacks
//! them along time. Nothing here reads pixels; the result is a graph of lazy
//! planes.

use crate::core::axis::CoordinateAxis;
use crate::core::lazy::{Chunk, ChunkConfig, ChunkSource, Executor, LazyPlane, Window};
use crate::io::raster::{RasterBackend, RasterGrid};
use crate::io::retry::RetryPolicy;
use crate::types::{CubeError, CubeResult, ItemLocations};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// All requested bands of one acquisition, sharing one pair of axes
#[derive(Debug, Clone)]
pub struct MultiBandGrid {
    pub identifier: String,
    pub acquired: DateTime<Utc>,
    northing: CoordinateAxis,
    easting: CoordinateAxis,
    bands: BTreeMap<String, RasterGrid>,
}

impl MultiBandGrid {
    /// Group already-opened band grids, rejecting bands whose axes differ
    pub fn new(
        identifier: impl Into<String>,
        acquired: DateTime<Utc>,
        bands: BTreeMap<String, RasterGrid>,
    ) -> CubeResult<Self> {
        let identifier = identifier.into();
        let (reference_band, reference) = bands
            .iter()
            .next()
            .ok_or_else(|| CubeError::InvalidParameter(format!("{} has no bands", identifier)))?;

        for (band, grid) in bands.iter().skip(1) {
            if !grid.same_axes(reference) {
                log::debug!(
                    "{}: {} axes {:?}/{:?} differ from {} axes {:?}/{:?}",
                    identifier,
                    band,
                    grid.northing(),
                    grid.easting(),
                    reference_band,
                    reference.northing(),
                    reference.easting()
                );
                return Err(CubeError::BandMisalignment {
                    identifier,
                    band: band.clone(),
                    reference: reference_band.clone(),
                });
            }
        }

        let northing = *reference.northing();
        let easting = *reference.easting();
        Ok(Self {
            identifier,
            acquired,
            northing,
            easting,
            bands,
        })
    }

    pub fn northing(&self) -> &CoordinateAxis {
        &self.northing
    }

    pub fn easting(&self) -> &CoordinateAxis {
        &self.easting
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.keys().cloned().collect()
    }

    pub fn band(&self, name: &str) -> CubeResult<&RasterGrid> {
        self.bands
            .get(name)
            .ok_or_else(|| CubeError::UnknownBand(format!("{} in {}", name, self.identifier)))
    }
}

/// Stage A: open every band of one item (headers only)
pub fn load_item(
    backend: &Arc<dyn RasterBackend>,
    item: &ItemLocations,
    chunks: ChunkConfig,
    retry: &RetryPolicy,
) -> CubeResult<MultiBandGrid> {
    log::debug!("Loading {} ({} bands)", item.identifier, item.bands.len());
    let bands = item
        .bands
        .iter()
        .map(|(band, uri)| {
            RasterGrid::open(Arc::clone(backend), uri, chunks, retry.clone()).map(|g| (band.clone(), g))
        })
        .collect::<CubeResult<BTreeMap<_, _>>>()?;
    MultiBandGrid::new(item.identifier.clone(), item.acquired, bands)
}

/// A plane re-indexed onto other axes; unmapped cells are missing
#[derive(Debug)]
pub struct Aligned {
    source: LazyPlane,
    row_map: Arc<[Option<usize>]>,
    col_map: Arc<[Option<usize>]>,
}

impl Aligned {
    pub fn new(
        source: LazyPlane,
        source_northing: &CoordinateAxis,
        source_easting: &CoordinateAxis,
        northing: &CoordinateAxis,
        easting: &CoordinateAxis,
    ) -> Self {
        Self {
            source,
            row_map: source_northing.mapping_onto(northing).into(),
            col_map: source_easting.mapping_onto(easting).into(),
        }
    }
}

fn mapped_span(map: &[Option<usize>]) -> Option<(usize, usize)> {
    let mut indices = map.iter().flatten();
    let first = *indices.next()?;
    Some(indices.fold((first, first), |(lo, hi), &i| (lo.min(i), hi.max(i))))
}

impl ChunkSource for Aligned {
    fn shape(&self) -> (usize, usize) {
        (self.row_map.len(), self.col_map.len())
    }

    fn compute(&self, window: Window) -> CubeResult<Chunk> {
        let rows = &self.row_map[window.row..window.row_end()];
        let cols = &self.col_map[window.col..window.col_end()];
        let mut out = Chunk::missing(window.rows, window.cols);

        let (Some((r0, r1)), Some((c0, c1))) = (mapped_span(rows), mapped_span(cols)) else {
            return Ok(out);
        };
        let src = self.source.compute(Window::new(r0, c0, r1 - r0 + 1, c1 - c0 + 1))?;

        for (i, sr) in rows.iter().enumerate() {
            let Some(sr) = sr else { continue };
            for (j, sc) in cols.iter().enumerate() {
                let Some(sc) = sc else { continue };
                if let Some(v) = src.get(sr - r0, sc - c0) {
                    out.values[[i, j]] = v;
                    out.valid[[i, j]] = true;
                }
            }
        }
        Ok(out)
    }
}

/// Stack of same-shaped planes; a later layer wins wherever it is valid
#[derive(Debug)]
pub struct Overlay {
    layers: Vec<LazyPlane>,
}

impl Overlay {
    pub fn new(layers: Vec<LazyPlane>) -> CubeResult<Self> {
        let shape = layers
            .first()
            .map(|l| l.shape())
            .ok_or_else(|| CubeError::InvalidParameter("overlay without layers".to_string()))?;
        if layers.iter().any(|l| l.shape() != shape) {
            return Err(CubeError::InvalidParameter("overlay layers differ in shape".to_string()));
        }
        Ok(Self { layers })
    }
}

impl ChunkSource for Overlay {
    fn shape(&self) -> (usize, usize) {
        self.layers[0].shape()
    }

    fn compute(&self, window: Window) -> CubeResult<Chunk> {
        let mut out = Chunk::missing(window.rows, window.cols);
        for layer in &self.layers {
            let chunk = layer.compute(window)?;
            ndarray::Zip::from(&mut out.values)
                .and(&mut out.valid)
                .and(&chunk.values)
                .and(&chunk.valid)
                .for_each(|v, ok, &cv, &cok| {
                    if cok {
                        *v = cv;
                        *ok = true;
                    }
                });
        }
        Ok(out)
    }
}

/// Bands stacked as (time, northing, easting) on outer-joined axes.
/// Immutable once built; derived products are new graphs.
#[derive(Debug, Clone)]
pub struct UnifiedDataset {
    times: Vec<DateTime<Utc>>,
    northing: CoordinateAxis,
    easting: CoordinateAxis,
    bands: BTreeMap<String, Vec<LazyPlane>>,
    items: Vec<Vec<String>>,
}

impl UnifiedDataset {
    /// Assemble from per-band planes (one per time step, all of the given axes' shape)
    pub fn from_planes(
        times: Vec<DateTime<Utc>>,
        northing: CoordinateAxis,
        easting: CoordinateAxis,
        bands: BTreeMap<String, Vec<LazyPlane>>,
        items: Vec<Vec<String>>,
    ) -> CubeResult<Self> {
        let shape = (northing.len, easting.len);
        for (name, planes) in &bands {
            if planes.len() != times.len() {
                return Err(CubeError::InvalidParameter(format!(
                    "band {} has {} planes for {} time steps",
                    name,
                    planes.len(),
                    times.len()
                )));
            }
            if planes.iter().any(|p| p.shape() != shape) {
                return Err(CubeError::InvalidParameter(format!("band {} planes are not {:?}", name, shape)));
            }
        }
        if items.len() != times.len() {
            return Err(CubeError::InvalidParameter("item list does not match time axis".to_string()));
        }
        Ok(Self {
            times,
            northing,
            easting,
            bands,
            items,
        })
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    pub fn northing(&self) -> &CoordinateAxis {
        &self.northing
    }

    pub fn easting(&self) -> &CoordinateAxis {
        &self.easting
    }

    /// (time, northing, easting)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.times.len(), self.northing.len, self.easting.len)
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.keys().cloned().collect()
    }

    /// Lazy planes of a band, one per time step
    pub fn band(&self, name: &str) -> CubeResult<&[LazyPlane]> {
        self.bands
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| CubeError::UnknownBand(name.to_string()))
    }

    /// Identifiers merged into time step `t`
    pub fn item_identifiers(&self, t: usize) -> &[String] {
        self.items.get(t).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Materialize one full time step of a band
    pub fn materialize(&self, band: &str, t: usize, executor: &Executor) -> CubeResult<Chunk> {
        let planes = self.band(band)?;
        let plane = planes.get(t).ok_or_else(|| {
            CubeError::InvalidParameter(format!("time index {} out of {} steps", t, planes.len()))
        })?;
        executor.materialize_all(plane.as_ref())
    }
}

/// A per-item failure recovered during unification
#[derive(Debug)]
pub struct ItemDiagnostic {
    pub identifier: String,
    pub error: CubeError,
}

/// Unified dataset plus the items that were skipped to build it
#[derive(Debug)]
pub struct Unification {
    pub dataset: UnifiedDataset,
    pub diagnostics: Vec<ItemDiagnostic>,
}

/// Stage B: outer-join per-item grids onto common axes and stack along time.
///
/// Items are ordered by acquisition time, then identifier. Items acquired at
/// the same instant share a time step, and where several of them define a
/// cell the one ordered last wins.
pub fn unify(mut items: Vec<MultiBandGrid>) -> CubeResult<UnifiedDataset> {
    if items.is_empty() {
        return Err(CubeError::NoUsableItems { attempted: 0, skipped: 0 });
    }

    let band_names = items[0].band_names();
    if let Some(odd) = items.iter().find(|i| i.band_names() != band_names) {
        return Err(CubeError::Processing(format!(
            "{} has bands {:?}, expected {:?}",
            odd.identifier,
            odd.band_names(),
            band_names
        )));
    }

    let northing = CoordinateAxis::union(items.iter().map(|i| &i.northing))?;
    let easting = CoordinateAxis::union(items.iter().map(|i| &i.easting))?;

    items.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.identifier.cmp(&b.identifier)));

    let mut groups: Vec<Vec<&MultiBandGrid>> = Vec::new();
    for item in &items {
        match groups.last_mut() {
            Some(group) if group[0].acquired == item.acquired => group.push(item),
            _ => groups.push(vec![item]),
        }
    }

    let mut bands: BTreeMap<String, Vec<LazyPlane>> = BTreeMap::new();
    for name in &band_names {
        let mut planes = Vec::with_capacity(groups.len());
        for group in &groups {
            let mut layers = Vec::with_capacity(group.len());
            for item in group {
                let source: LazyPlane = Arc::new(item.band(name)?.clone());
                let aligned: LazyPlane =
                    Arc::new(Aligned::new(source, &item.northing, &item.easting, &northing, &easting));
                layers.push(aligned);
            }
            let plane: LazyPlane = if layers.len() == 1 {
                layers.remove(0)
            } else {
                Arc::new(Overlay::new(layers)?)
            };
            planes.push(plane);
        }
        bands.insert(name.clone(), planes);
    }

    let times = groups.iter().map(|g| g[0].acquired).collect();
    let identifiers = groups
        .iter()
        .map(|g| g.iter().map(|i| i.identifier.clone()).collect())
        .collect();

    log::info!(
        "Unified {} items into {} time steps on a {}x{} grid",
        items.len(),
        groups.len(),
        northing.len,
        easting.len
    );

    UnifiedDataset::from_planes(times, northing, easting, bands, identifiers)
}

/// Fails on the first band of `expected` that `item` has no location for
fn check_band_set(item: &ItemLocations, expected: &BTreeSet<&str>) -> CubeResult<()> {
    match expected.iter().find(|band| !item.bands.contains_key(**band)) {
        Some(band) => Err(CubeError::UnknownBand(format!("{} has no {} band", item.identifier, band))),
        None => Ok(()),
    }
}

/// Run Stage A for every item, skip the ones that fail, then Stage B.
///
/// Every item must carry the union of all items' bands; an item missing one
/// is skipped before any of its headers are read.
pub fn build_dataset(
    backend: Arc<dyn RasterBackend>,
    items: &[ItemLocations],
    chunks: ChunkConfig,
    retry: &RetryPolicy,
) -> CubeResult<Unification> {
    let expected: BTreeSet<&str> = items.iter().flat_map(|i| i.bands.keys().map(String::as_str)).collect();
    let load = |item: &ItemLocations| {
        check_band_set(item, &expected).and_then(|_| load_item(&backend, item, chunks, retry))
    };

    #[cfg(feature = "parallel")]
    let loaded: Vec<CubeResult<MultiBandGrid>> = items.par_iter().map(load).collect();
    #[cfg(not(feature = "parallel"))]
    let loaded: Vec<CubeResult<MultiBandGrid>> = items.iter().map(load).collect();

    let mut grids = Vec::with_capacity(items.len());
    let mut diagnostics = Vec::new();
    for (item, result) in items.iter().zip(loaded) {
        match result {
            Ok(grid) => grids.push(grid),
            Err(e) => {
                log::warn!("Skipping {}: {}", item.identifier, e);
                diagnostics.push(ItemDiagnostic {
                    identifier: item.identifier.clone(),
                    error: CubeError::ItemLoadFailure {
                        identifier: item.identifier.clone(),
                        source: Box::new(e),
                    },
                });
            }
        }
    }

    if grids.is_empty() {
        log::error!("All {} items failed to load", items.len());
        return Err(CubeError::NoUsableItems {
            attempted: items.len(),
            skipped: diagnostics.len(),
        });
    }

    let dataset = unify(grids)?;
    Ok(Unification { dataset, diagnostics })
}
