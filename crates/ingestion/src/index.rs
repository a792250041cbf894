//! Region matrix setup from [`IndexConfig`].

use region_index::{default_worker_count, load_polygons, Grid, RegionMatrix, SpatialIndexBuilder};
use tracing::info;

use crate::config::IndexConfig;
use crate::error::Result;

/// Build the region matrix, or reuse the persisted one unless `force` is set.
pub fn build_region_index(config: &IndexConfig, force: bool) -> Result<RegionMatrix> {
    let grid = Grid::load(&config.grid_path)?;
    let polygons = load_polygons(&config.polygons_path, &config.detail_levels)?;

    let workers = config.workers.unwrap_or_else(default_worker_count);
    info!(
        grid = %config.grid_path.display(),
        polygons = polygons.len(),
        workers,
        force,
        "Preparing region index"
    );

    let matrix = SpatialIndexBuilder::new(workers)
        .with_overlap_report(config.report_overlaps)
        .build_or_load(&config.matrix_path, &grid, &polygons, force)?;
    Ok(matrix)
}

/// Load the persisted region matrix.
///
/// When the grid file is present the matrix is checked against its shape.
pub fn load_region_index(config: &IndexConfig) -> Result<RegionMatrix> {
    let matrix = RegionMatrix::load(&config.matrix_path)?;
    if config.grid_path.exists() {
        let (rows, cols) = Grid::load(&config.grid_path)?.shape();
        matrix.check_shape(rows, cols)?;
    }
    info!(
        path = %config.matrix_path.display(),
        regions = matrix.regions().len(),
        "Loaded region index"
    );
    Ok(matrix)
}
