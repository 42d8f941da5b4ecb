//! Core cube modules: axes, lazy evaluation, merging, indices and reductions

pub mod axis;
pub mod lazy;
pub mod merge;
pub mod index;
pub mod reduce;

// Re-export main types
pub use axis::CoordinateAxis;
pub use lazy::{CancelToken, Chunk, ChunkConfig, ChunkSource, Executor, LazyPlane, Window};
pub use merge::{
    build_dataset, load_item, unify, Aligned, ItemDiagnostic, MultiBandGrid, Overlay, Unification,
    UnifiedDataset,
};
pub use index::{compute_index, ndvi, normalized_difference, DerivedIndexArray, NormalizedDifference};
pub use reduce::{reduce, PointSelection, ReducedSeries, SeriesPoint, TemporalBucket};
