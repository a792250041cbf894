//! Grid-to-region spatial index.
//!
//! Maps every cell of a fixed source grid to the administrative region whose
//! polygon contains it. The mapping is expensive to compute, so it is built
//! once and persisted next to the data it describes.

pub mod builder;
pub mod error;
pub mod grid;
pub mod matrix;
pub mod polygon;

pub use builder::{build_region_matrix, default_worker_count, SpatialIndexBuilder};
pub use error::{IndexError, Result};
pub use grid::Grid;
pub use matrix::RegionMatrix;
pub use polygon::{load_polygons, DetailLevels, PolygonRecord, RegionPolygon};
