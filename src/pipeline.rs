//! End-to-end orchestration: catalog → archive locations → unified cube → index → series

use crate::core::index::{ndvi, DerivedIndexArray};
use crate::core::lazy::{CancelToken, ChunkConfig, Executor};
use crate::core::merge::{build_dataset, ItemDiagnostic, UnifiedDataset};
use crate::core::reduce::{reduce, PointSelection, ReducedSeries, TemporalBucket};
use crate::io::archive::{ArchiveConfig, ArchiveResolver};
use crate::io::catalog::{Catalog, CatalogConfig};
use crate::io::raster::RasterBackend;
use crate::io::retry::RetryPolicy;
use crate::types::{CatalogItem, CubeError, CubeResult, ItemLocations, TileId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Settings for a full analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub catalog: CatalogConfig,
    pub archive: ArchiveConfig,
    pub chunks: ChunkConfig,
    /// Retry policy for raster header and window reads
    pub retry: RetryPolicy,
    pub bands: Vec<String>,
    pub red_band: String,
    pub nir_band: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            archive: ArchiveConfig::default(),
            chunks: ChunkConfig::default(),
            retry: RetryPolicy::default(),
            bands: vec!["B4".to_string(), "B5".to_string()],
            red_band: "B4".to_string(),
            nir_band: "B5".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> CubeResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CubeResult<()> {
        for band in [&self.red_band, &self.nir_band] {
            if !self.bands.contains(band) {
                return Err(CubeError::InvalidParameter(format!(
                    "index band {} is not among the requested bands {:?}",
                    band, self.bands
                )));
            }
        }
        if self.chunks.chunk_rows == 0 || self.chunks.chunk_cols == 0 {
            return Err(CubeError::InvalidParameter("chunk shape must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Everything produced by [`Pipeline::run`]
#[derive(Debug)]
pub struct PipelineOutput {
    pub items: Vec<CatalogItem>,
    pub dataset: UnifiedDataset,
    pub diagnostics: Vec<ItemDiagnostic>,
    pub index: DerivedIndexArray,
    pub series: ReducedSeries,
}

pub struct Pipeline {
    config: PipelineConfig,
    catalog: Box<dyn Catalog>,
    backend: Arc<dyn RasterBackend>,
    executor: Executor,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, catalog: Box<dyn Catalog>, backend: Arc<dyn RasterBackend>) -> CubeResult<Self> {
        config.validate()?;
        let executor = Executor::new(config.chunks);
        Ok(Self {
            config,
            catalog,
            backend,
            executor,
        })
    }

    /// Abort in-flight materializations when `cancel` fires
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.executor = self.executor.with_cancel_token(cancel);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn query_catalog(&self, tile: TileId) -> CubeResult<Vec<CatalogItem>> {
        let c = &self.config.catalog;
        let items = self.catalog.query(tile, &c.tier, &c.collection, c.page_size)?;
        if items.is_empty() {
            return Err(CubeError::CatalogEmpty {
                tile,
                tier: c.tier.clone(),
            });
        }
        Ok(items)
    }

    /// Resolve band locations, carrying the catalog's acquisition instants over
    pub fn locate(&self, items: &[CatalogItem]) -> CubeResult<(Vec<ItemLocations>, Vec<ItemDiagnostic>)> {
        let resolver = ArchiveResolver::new(self.config.archive.clone());
        let ids: Vec<&str> = items.iter().map(|i| i.identifier.as_str()).collect();
        let (mut locations, rejected) = resolver.resolve_lenient(&ids, &self.config.bands)?;

        let acquired: HashMap<&str, _> = items.iter().map(|i| (i.identifier.as_str(), i.acquired)).collect();
        for loc in &mut locations {
            if let Some(t) = acquired.get(loc.identifier.as_str()) {
                loc.acquired = *t;
            }
        }

        let diagnostics = rejected
            .into_iter()
            .map(|(identifier, error)| ItemDiagnostic { identifier, error })
            .collect();
        Ok((locations, diagnostics))
    }

    /// Catalog query through unification, tolerating per-item failures
    pub fn build(&self, tile: TileId) -> CubeResult<(Vec<CatalogItem>, UnifiedDataset, Vec<ItemDiagnostic>)> {
        let items = self.query_catalog(tile)?;
        let (locations, mut diagnostics) = self.locate(&items)?;

        if locations.is_empty() {
            return Err(CubeError::NoUsableItems {
                attempted: items.len(),
                skipped: diagnostics.len(),
            });
        }

        let unification =
            build_dataset(Arc::clone(&self.backend), &locations, self.config.chunks, &self.config.retry).map_err(
                |e| match e {
                    CubeError::NoUsableItems { skipped, .. } => CubeError::NoUsableItems {
                        attempted: items.len(),
                        skipped: skipped + diagnostics.len(),
                    },
                    other => other,
                },
            )?;
        diagnostics.extend(unification.diagnostics);

        if !diagnostics.is_empty() {
            log::warn!(
                "{} of {} catalog items were skipped",
                diagnostics.len(),
                items.len()
            );
        }
        Ok((items, unification.dataset, diagnostics))
    }

    pub fn index(&self, dataset: &UnifiedDataset) -> CubeResult<DerivedIndexArray> {
        ndvi(dataset, &self.config.red_band, &self.config.nir_band)
    }

    pub fn series(
        &self,
        index: &DerivedIndexArray,
        selection: &PointSelection,
        bucket: TemporalBucket,
    ) -> CubeResult<ReducedSeries> {
        reduce(index, selection, bucket, &self.executor)
    }

    pub fn run(&self, tile: TileId, selection: &PointSelection, bucket: TemporalBucket) -> CubeResult<PipelineOutput> {
        let (items, dataset, diagnostics) = self.build(tile)?;
        let index = self.index(&dataset)?;
        let series = self.series(&index, selection, bucket)?;
        Ok(PipelineOutput {
            items,
            dataset,
            diagnostics,
            index,
            series,
        })
    }
}
