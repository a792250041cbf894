//! Grid-shaped region assignment and its side-file persistence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{IndexError, Result};

/// Slot value for cells outside every candidate polygon.
const UNMAPPED: u32 = u32::MAX;

/// R x C array mapping each grid cell to a region id or "unmapped".
///
/// Region ids are interned: `regions` holds the sorted distinct ids and each
/// cell stores an index into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMatrix {
    rows: usize,
    cols: usize,
    regions: Vec<String>,
    cells: Vec<u32>,
}

/// Persisted layout: one region id (or null) per cell, row-major.
#[derive(Debug, Serialize, Deserialize)]
struct MatrixFile {
    rows: usize,
    cols: usize,
    cells: Vec<Option<String>>,
}

impl RegionMatrix {
    /// Build from one optional region id per cell.
    pub fn from_cells<S: AsRef<str>>(rows: usize, cols: usize, cells: &[Option<S>]) -> Result<Self> {
        if cells.len() != rows * cols {
            return Err(IndexError::InvalidMatrix(format!(
                "expected {} cells for {}x{}, got {}",
                rows * cols,
                rows,
                cols,
                cells.len()
            )));
        }

        let regions: Vec<String> = cells
            .iter()
            .flatten()
            .map(|s| s.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let slots = cells
            .iter()
            .map(|cell| match cell {
                Some(id) => regions
                    .binary_search_by(|r| r.as_str().cmp(id.as_ref()))
                    .map(|i| i as u32)
                    .unwrap_or(UNMAPPED),
                None => UNMAPPED,
            })
            .collect();

        Ok(Self {
            rows,
            cols,
            regions,
            cells: slots,
        })
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of cells (mapped or not).
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Sorted distinct region ids.
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// Region id at (row, col), `None` when unmapped.
    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.region_slot(row * self.cols + col)
            .map(|slot| self.regions[slot].as_str())
    }

    /// Index into [`regions`](Self::regions) for a flattened cell.
    #[inline]
    pub fn region_slot(&self, index: usize) -> Option<usize> {
        match self.cells[index] {
            UNMAPPED => None,
            slot => Some(slot as usize),
        }
    }

    /// Number of cells assigned to some region.
    pub fn mapped_cells(&self) -> usize {
        self.cells.iter().filter(|&&c| c != UNMAPPED).count()
    }

    /// Verify the matrix lines up with a grid of the given shape.
    pub fn check_shape(&self, rows: usize, cols: usize) -> Result<()> {
        if (self.rows, self.cols) != (rows, cols) {
            return Err(IndexError::ShapeMismatch {
                rows: self.rows,
                cols: self.cols,
                expected_rows: rows,
                expected_cols: cols,
            });
        }
        Ok(())
    }

    /// Persist the matrix.
    ///
    /// Writes a sibling temp file and renames it into place so an interrupted
    /// write never leaves a truncated matrix behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
            }
        }

        let file = MatrixFile {
            rows: self.rows,
            cols: self.cols,
            cells: (0..self.cells.len())
                .map(|i| self.region_slot(i).map(|slot| self.regions[slot].clone()))
                .collect(),
        };
        let json = serde_json::to_vec(&file).map_err(|e| IndexError::parse(path, e))?;

        let tmp = temp_path(path);
        std::fs::write(&tmp, json).map_err(|e| IndexError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| IndexError::io(path, e))?;

        info!(
            path = %path.display(),
            rows = self.rows,
            cols = self.cols,
            regions = self.regions.len(),
            "Saved region matrix"
        );
        Ok(())
    }

    /// Load a persisted matrix.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path).map_err(|e| IndexError::io(path, e))?;
        let file: MatrixFile =
            serde_json::from_slice(&content).map_err(|e| IndexError::parse(path, e))?;
        let matrix = Self::from_cells(file.rows, file.cols, &file.cells)?;

        info!(
            path = %path.display(),
            rows = matrix.rows,
            cols = matrix.cols,
            regions = matrix.regions.len(),
            mapped = matrix.mapped_cells(),
            "Loaded region matrix"
        );
        Ok(matrix)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
