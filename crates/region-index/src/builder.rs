//! Parallel point-in-polygon assignment of grid cells to regions.

use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::{IndexError, Result};
use crate::grid::Grid;
use crate::matrix::RegionMatrix;
use crate::polygon::RegionPolygon;

/// Available CPUs minus one, never below one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Builds the [`RegionMatrix`] for a grid.
///
/// Cells are split into `worker_count` contiguous chunks processed on a
/// dedicated thread pool that lives only for the duration of one build.
/// Each cell takes the first polygon (in slice order) whose interior contains
/// it, so the output does not depend on the worker count.
#[derive(Debug, Clone)]
pub struct SpatialIndexBuilder {
    worker_count: usize,
    report_overlaps: bool,
}

impl Default for SpatialIndexBuilder {
    fn default() -> Self {
        Self::new(default_worker_count())
    }
}

/// Per-chunk scan result: polygon index per cell plus overlapping cell count.
struct ChunkResult {
    matches: Vec<Option<usize>>,
    overlaps: usize,
}

impl SpatialIndexBuilder {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            report_overlaps: false,
        }
    }

    /// Also count cells contained in more than one polygon.
    ///
    /// Results are unchanged; each cell keeps its first match.
    pub fn with_overlap_report(mut self, enabled: bool) -> Self {
        self.report_overlaps = enabled;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Compute the region matrix.
    #[instrument(skip_all, fields(workers = self.worker_count, polygons = polygons.len()))]
    pub fn build(&self, grid: &Grid, polygons: &[RegionPolygon]) -> Result<RegionMatrix> {
        let start = Instant::now();
        let (rows, cols) = grid.shape();
        let total = grid.len();
        let chunk_size = total.div_ceil(self.worker_count).max(1);

        info!(rows, cols, chunk_size, "Building region matrix");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.worker_count)
            .thread_name(|i| format!("region-index-{i}"))
            .build()
            .map_err(|e| IndexError::WorkerPool(e.to_string()))?;

        let report_overlaps = self.report_overlaps;
        let chunks: Vec<Result<ChunkResult>> = pool.install(|| {
            (0..total)
                .step_by(chunk_size)
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|begin| {
                    let end = (begin + chunk_size).min(total);
                    scan_chunk(grid, polygons, begin..end, report_overlaps)
                })
                .collect()
        });

        let mut cells: Vec<Option<&str>> = Vec::with_capacity(total);
        let mut overlaps = 0;
        for chunk in chunks {
            let chunk = chunk?;
            overlaps += chunk.overlaps;
            cells.extend(chunk.matches.into_iter().map(|m| m.map(|i| polygons[i].id())));
        }

        let matrix = RegionMatrix::from_cells(rows, cols, &cells)?;

        if report_overlaps && overlaps > 0 {
            warn!(overlaps, "Cells contained in more than one region polygon");
        }
        info!(
            mapped = matrix.mapped_cells(),
            unmapped = total - matrix.mapped_cells(),
            regions = matrix.regions().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Region matrix built"
        );
        Ok(matrix)
    }

    /// Load the persisted matrix at `path`, or build and persist it.
    ///
    /// `force` rebuilds even if the file exists. A loaded matrix must match
    /// the grid shape.
    pub fn build_or_load(
        &self,
        path: &Path,
        grid: &Grid,
        polygons: &[RegionPolygon],
        force: bool,
    ) -> Result<RegionMatrix> {
        let (rows, cols) = grid.shape();

        if !force && path.exists() {
            let matrix = RegionMatrix::load(path)?;
            matrix.check_shape(rows, cols)?;
            return Ok(matrix);
        }

        let matrix = self.build(grid, polygons)?;
        matrix.save(path)?;
        Ok(matrix)
    }
}

fn scan_chunk(
    grid: &Grid,
    polygons: &[RegionPolygon],
    range: std::ops::Range<usize>,
    report_overlaps: bool,
) -> Result<ChunkResult> {
    let mut matches = Vec::with_capacity(range.len());
    let mut overlaps = 0;

    for index in range {
        let (lat, lon) = grid.coordinate(index);
        if !lat.is_finite() || !lon.is_finite() {
            return Err(IndexError::InvalidCoordinate { index, lat, lon });
        }

        let mut candidates = polygons
            .iter()
            .enumerate()
            .filter(|(_, p)| p.contains(lat, lon))
            .map(|(i, _)| i);

        let first = candidates.next();
        if report_overlaps && first.is_some() && candidates.next().is_some() {
            overlaps += 1;
        }
        matches.push(first);
    }

    Ok(ChunkResult { matches, overlaps })
}

/// Convenience wrapper around [`SpatialIndexBuilder::build`].
pub fn build_region_matrix(
    grid: &Grid,
    polygons: &[RegionPolygon],
    worker_count: usize,
) -> Result<RegionMatrix> {
    SpatialIndexBuilder::new(worker_count).build(grid, polygons)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(id: &str, lat0: f64, lon0: f64, size: f64) -> RegionPolygon {
        let wkt = format!(
            "POLYGON(({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))",
            x0 = lon0,
            y0 = lat0,
            x1 = lon0 + size,
            y1 = lat0 + size
        );
        RegionPolygon::from_wkt(id, &id[..2], 0, &wkt).unwrap()
    }

    #[test]
    fn test_default_worker_count_is_positive() {
        assert!(default_worker_count() >= 1);
        assert_eq!(SpatialIndexBuilder::new(0).worker_count(), 1);
    }

    #[test]
    fn test_two_by_two_assignment() {
        // Row 0 at lat 0.5, row 1 at lat 1.5
        let grid = Grid::regular(2, 2, 0.5, 0.5, 1.0, 1.0).unwrap();
        let polygons = vec![square("AA1", 0.0, 0.0, 1.0), square("AA2", 1.0, 0.0, 1.0)];

        let matrix = build_region_matrix(&grid, &polygons, 2).unwrap();
        assert_eq!(matrix.get(0, 0), Some("AA1"));
        assert_eq!(matrix.get(0, 1), None);
        assert_eq!(matrix.get(1, 0), Some("AA2"));
        assert_eq!(matrix.get(1, 1), None);
    }

    #[test]
    fn test_overlap_first_polygon_wins() {
        let grid = Grid::regular(1, 1, 0.5, 0.5, 1.0, 1.0).unwrap();
        let a = square("AA1", 0.0, 0.0, 1.0);
        let b = square("BB1", 0.0, 0.0, 2.0);

        let ab = SpatialIndexBuilder::new(1)
            .with_overlap_report(true)
            .build(&grid, &[a.clone(), b.clone()])
            .unwrap();
        assert_eq!(ab.get(0, 0), Some("AA1"));

        let ba = build_region_matrix(&grid, &[b, a], 1).unwrap();
        assert_eq!(ba.get(0, 0), Some("BB1"));
    }

    #[test]
    fn test_non_finite_coordinate_is_fatal() {
        let grid = Grid::new(1, 2, vec![0.5, f64::NAN], vec![0.5, 0.5]).unwrap();
        let err = build_region_matrix(&grid, &[square("AA1", 0.0, 0.0, 1.0)], 2).unwrap_err();
        assert!(matches!(err, IndexError::InvalidCoordinate { index: 1, .. }));
    }

    #[test]
    fn test_failed_build_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.json");
        let grid = Grid::new(1, 1, vec![f64::INFINITY], vec![0.0]).unwrap();

        let result = SpatialIndexBuilder::new(1).build_or_load(&path, &grid, &[], false);
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
