//! Region matrix construction against synthetic grids.

use region_index::{build_region_matrix, Grid, IndexError, RegionMatrix, SpatialIndexBuilder};
use test_utils::{band_polygons, block_polygon, square_polygon, two_by_two, unit_grid};

fn cells(matrix: &RegionMatrix) -> Vec<Option<String>> {
    let (rows, cols) = matrix.shape();
    (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (r, c)))
        .map(|(r, c)| matrix.get(r, c).map(str::to_string))
        .collect()
}

#[test]
fn test_output_independent_of_worker_count() {
    let grid = unit_grid(37, 23);
    let mut polygons = band_polygons("DE", 37, 23, 5);
    // Overlaps the first bands, must never change any cell already taken
    polygons.push(block_polygon("FR1", 0, 20, 0, 10));

    let reference = build_region_matrix(&grid, &polygons, 1).unwrap();
    for workers in [2, 3, 4, 7, 64] {
        let matrix = build_region_matrix(&grid, &polygons, workers).unwrap();
        assert_eq!(cells(&matrix), cells(&reference), "workers = {workers}");
    }
    assert_eq!(reference.mapped_cells(), 37 * 23);
    assert!(!reference.regions().iter().any(|r| r == "FR1"));
}

#[test]
fn test_more_workers_than_cells() {
    let grid = unit_grid(1, 3);
    let polygons = vec![square_polygon("AA1", 0.0, 1.0, 1.0)];
    let matrix = build_region_matrix(&grid, &polygons, 16).unwrap();
    assert_eq!(cells(&matrix), vec![None, Some("AA1".to_string()), None]);
}

#[test]
fn test_unmapped_iff_no_polygon_contains_cell() {
    let grid = unit_grid(4, 4);
    let polygons = vec![
        square_polygon("AA1", 0.0, 0.0, 1.0),
        square_polygon("BB1", 3.0, 3.0, 1.0),
    ];
    let matrix = build_region_matrix(&grid, &polygons, 3).unwrap();

    for index in 0..grid.len() {
        let (lat, lon) = grid.coordinate(index);
        let contained = polygons.iter().any(|p| p.contains(lat, lon));
        let (row, col) = (index / 4, index % 4);
        assert_eq!(matrix.get(row, col).is_some(), contained, "cell {index}");
    }
    assert_eq!(matrix.mapped_cells(), 2);
}

#[test]
fn test_two_by_two_scenario() {
    let matrix = two_by_two::matrix();
    assert_eq!(matrix.regions(), &["AA1", "BB1"]);
    assert_eq!(matrix.region_slot(0), matrix.region_slot(1));
    assert_eq!(matrix.region_slot(2), matrix.region_slot(3));
    assert_ne!(matrix.region_slot(0), matrix.region_slot(2));
}

#[test]
fn test_build_or_load_reuses_persisted_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("region_matrix.json");
    let grid = two_by_two::grid();
    let builder = SpatialIndexBuilder::new(2);

    let built = builder
        .build_or_load(&path, &grid, &two_by_two::polygons(), false)
        .unwrap();
    assert!(path.exists());

    // Different polygons are ignored while the file exists
    let other = vec![square_polygon("ZZ1", 0.0, 0.0, 2.0)];
    let loaded = builder.build_or_load(&path, &grid, &other, false).unwrap();
    assert_eq!(loaded, built);

    let rebuilt = builder.build_or_load(&path, &grid, &other, true).unwrap();
    assert_eq!(rebuilt.regions(), &["ZZ1"]);
    assert_eq!(RegionMatrix::load(&path).unwrap(), rebuilt);
}

#[test]
fn test_persisted_matrix_shape_checked_against_grid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("region_matrix.json");
    two_by_two::matrix().save(&path).unwrap();

    let grid = Grid::regular(3, 2, 0.5, 0.5, 1.0, 1.0).unwrap();
    let err = SpatialIndexBuilder::new(1)
        .build_or_load(&path, &grid, &[], false)
        .unwrap_err();
    assert!(matches!(err, IndexError::ShapeMismatch { .. }));
}
