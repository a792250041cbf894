//! Common test fixtures for the region aggregation tests.

use region_index::{Grid, RegionMatrix, RegionPolygon, SpatialIndexBuilder};
use weather_common::{Variable, VariableSet, YearMonth};

use crate::generators::{block_polygon, unit_grid};

/// The 2x2 end-to-end scenario.
///
/// Region `AA1` covers cells 0 and 1 (row 0), region `BB1` covers cells 2
/// and 3 (row 1). The snapshot `[10, 20, 30, 40]` averages to 15 and 35.
pub mod two_by_two {
    use super::*;

    pub const VALUES: [f32; 4] = [10.0, 20.0, 30.0, 40.0];
    pub const MEAN_A: f64 = 15.0;
    pub const MEAN_B: f64 = 35.0;

    pub fn grid() -> Grid {
        unit_grid(2, 2)
    }

    pub fn polygons() -> Vec<RegionPolygon> {
        vec![block_polygon("AA1", 0, 1, 0, 2), block_polygon("BB1", 1, 2, 0, 2)]
    }

    pub fn matrix() -> RegionMatrix {
        SpatialIndexBuilder::new(1)
            .build(&grid(), &polygons())
            .expect("2x2 matrix must build")
    }
}

/// Two small variables with synthetic archive codes.
pub fn test_variables() -> VariableSet {
    VariableSet::new(vec![
        Variable::new("temp_air", "T_2M/T_2M.2D."),
        Variable::new("cloud_cover", "CLCT/CLCT.2D."),
    ])
    .expect("test variables must be valid")
}

/// Shorthand for a valid month.
pub fn month(year: i32, month: u32) -> YearMonth {
    YearMonth::new(year, month).expect("valid month")
}
