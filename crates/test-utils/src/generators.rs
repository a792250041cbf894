//! Generators for synthetic grids, polygons and field values.
//!
//! Everything here is deterministic so expected region means can be computed
//! by hand in the tests that use them.

use region_index::{Grid, RegionPolygon};

/// Regular grid whose cell centres sit at half-integer coordinates.
///
/// Cell (row, col) is centred at `lat = row + 0.5`, `lon = col + 0.5`, so a
/// unit square polygon with corner (row, col) contains exactly that cell.
///
/// # Example
///
/// ```
/// use test_utils::unit_grid;
///
/// let grid = unit_grid(2, 3);
/// assert_eq!(grid.shape(), (2, 3));
/// assert_eq!(grid.coordinate(4), (1.5, 1.5));
/// ```
pub fn unit_grid(rows: usize, cols: usize) -> Grid {
    Grid::regular(rows, cols, 0.5, 0.5, 1.0, 1.0).expect("unit grid must be valid")
}

/// Axis-aligned square polygon with its lower-left corner at (`lat`, `lon`).
pub fn square_polygon(id: &str, lat: f64, lon: f64, size: f64) -> RegionPolygon {
    let wkt = format!(
        "POLYGON(({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))",
        x0 = lon,
        y0 = lat,
        x1 = lon + size,
        y1 = lat + size
    );
    let country: String = id.chars().take(2).collect();
    RegionPolygon::from_wkt(id, country, 0, &wkt).expect("square polygon must be valid")
}

/// Rectangle covering rows `row0..row1` and columns `col0..col1` of a unit grid.
pub fn block_polygon(id: &str, row0: usize, row1: usize, col0: usize, col1: usize) -> RegionPolygon {
    let wkt = format!(
        "POLYGON(({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))",
        x0 = col0,
        y0 = row0,
        x1 = col1,
        y1 = row1
    );
    let country: String = id.chars().take(2).collect();
    RegionPolygon::from_wkt(id, country, 0, &wkt).expect("block polygon must be valid")
}

/// One polygon per horizontal band of `band_rows` rows on a unit grid.
///
/// Ids are `{prefix}{n}` with n starting at 1.
pub fn band_polygons(prefix: &str, rows: usize, cols: usize, band_rows: usize) -> Vec<RegionPolygon> {
    (0..rows)
        .step_by(band_rows.max(1))
        .enumerate()
        .map(|(n, row0)| {
            let row1 = (row0 + band_rows).min(rows);
            block_polygon(&format!("{}{}", prefix, n + 1), row0, row1, 0, cols)
        })
        .collect()
}

/// Field values for `instants` snapshots of a grid with `cells` cells.
///
/// Value at (instant, cell) is `base + instant * 100 + cell`.
pub fn ramp_snapshots(instants: usize, cells: usize, base: f32) -> Vec<Vec<f32>> {
    (0..instants)
        .map(|t| {
            (0..cells)
                .map(|c| base + (t * 100) as f32 + c as f32)
                .collect()
        })
        .collect()
}

/// The same snapshot repeated `instants` times.
pub fn constant_snapshots(values: &[f32], instants: usize) -> Vec<Vec<f32>> {
    vec![values.to_vec(); instants]
}
