//! Source model grid coordinates.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{IndexError, Result};

/// Immutable R x C array of (latitude, longitude) sample points, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
}

/// On-disk layout of a grid coordinate file.
#[derive(Debug, Serialize, Deserialize)]
struct GridFile {
    rows: usize,
    cols: usize,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
}

impl Grid {
    /// Create a grid from flattened coordinate arrays.
    pub fn new(rows: usize, cols: usize, latitudes: Vec<f64>, longitudes: Vec<f64>) -> Result<Self> {
        let expected = rows * cols;
        if expected == 0 {
            return Err(IndexError::InvalidGrid(format!("empty grid {rows}x{cols}")));
        }
        if latitudes.len() != expected || longitudes.len() != expected {
            return Err(IndexError::InvalidGrid(format!(
                "expected {} coordinates for {}x{}, got {} latitudes and {} longitudes",
                expected,
                rows,
                cols,
                latitudes.len(),
                longitudes.len()
            )));
        }

        Ok(Self {
            rows,
            cols,
            latitudes,
            longitudes,
        })
    }

    /// Regular lat/lon lattice starting at (`lat0`, `lon0`).
    pub fn regular(rows: usize, cols: usize, lat0: f64, lon0: f64, dlat: f64, dlon: f64) -> Result<Self> {
        let mut latitudes = Vec::with_capacity(rows * cols);
        let mut longitudes = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                latitudes.push(lat0 + row as f64 * dlat);
                longitudes.push(lon0 + col as f64 * dlon);
            }
        }
        Self::new(rows, cols, latitudes, longitudes)
    }

    /// Load a grid coordinate file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path).map_err(|e| IndexError::io(path, e))?;
        let file: GridFile =
            serde_json::from_slice(&content).map_err(|e| IndexError::parse(path, e))?;
        let grid = Self::new(file.rows, file.cols, file.latitudes, file.longitudes)?;

        info!(
            path = %path.display(),
            rows = grid.rows,
            cols = grid.cols,
            "Loaded grid coordinates"
        );
        Ok(grid)
    }

    /// Write the grid to a coordinate file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = GridFile {
            rows: self.rows,
            cols: self.cols,
            latitudes: self.latitudes.clone(),
            longitudes: self.longitudes.clone(),
        };
        let json = serde_json::to_vec(&file).map_err(|e| IndexError::parse(path, e))?;
        std::fs::write(path, json).map_err(|e| IndexError::io(path, e))
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.latitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latitudes.is_empty()
    }

    /// (latitude, longitude) of a flattened cell index.
    pub fn coordinate(&self, index: usize) -> (f64, f64) {
        (self.latitudes[index], self.longitudes[index])
    }
}
