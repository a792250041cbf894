//! Region means of one archive, produced lazily instant by instant.

use chrono::NaiveDateTime;
use region_index::RegionMatrix;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{info, instrument, warn};
use weather_common::{AggregatedRow, Variable, YearMonth};

use crate::decoder::{FieldDecoder, SnapshotReader};
use crate::error::{AggregateError, Result};
use crate::source::ArchiveSource;
use crate::staging::{stage, Compression};

/// Where and how archives are staged locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub compression: Compression,
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("weather-regions")
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
            compression: Compression::default(),
        }
    }
}

/// Turns one (variable, month) archive into region-mean rows.
///
/// Holds the region matrix and collaborators explicitly; cheap to clone.
#[derive(Clone)]
pub struct FieldAggregator {
    source: Arc<dyn ArchiveSource>,
    decoder: Arc<dyn FieldDecoder>,
    matrix: Arc<RegionMatrix>,
    staging: StagingConfig,
}

impl FieldAggregator {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        decoder: Arc<dyn FieldDecoder>,
        matrix: Arc<RegionMatrix>,
        staging: StagingConfig,
    ) -> Self {
        Self {
            source,
            decoder,
            matrix,
            staging,
        }
    }

    /// Fetch, stage and open the archive for `variable` in `month`.
    ///
    /// The returned sequence decodes one instant per step and owns the staged
    /// file, which is deleted when the sequence is dropped.
    #[instrument(skip(self, variable), fields(variable = %variable.name, month = %month))]
    pub async fn aggregate(&self, variable: &Variable, month: YearMonth) -> Result<AggregatedRows> {
        let url = self.source.locate(variable, month);
        let data = self.source.fetch(variable, month).await?;

        let decoder = self.decoder.clone();
        let compression = self.staging.compression;
        let dir = self.staging.dir.clone();
        let opened = tokio::task::spawn_blocking(move || -> Result<(NamedTempFile, Box<dyn SnapshotReader>)> {
            let staged = stage(&data, compression, &dir)?;
            let reader = decoder.open(staged.path())?;
            Ok((staged, reader))
        })
        .await
        .map_err(|e| AggregateError::Task(e.to_string()))?;

        let (staged, reader) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to open archive");
                return Err(e);
            }
        };

        let instants = reader.instants();
        if instants == 0 {
            warn!(url = %url, "Archive has no instants");
            return Err(AggregateError::decode(format!("{} contains no instants", url)));
        }
        if instants < month.hours_in_month() {
            info!(
                url = %url,
                instants,
                expected = month.hours_in_month(),
                "Archive shorter than a full month"
            );
        }

        Ok(AggregatedRows {
            reader,
            staged,
            matrix: self.matrix.clone(),
            variable: variable.name.clone(),
            month,
            next_instant: 0,
            pending: Vec::new().into_iter(),
            finished: false,
        })
    }
}

/// Lazy, finite, non-restartable sequence of rows for one archive.
///
/// Yields the rows of instant 0 in region order, then instant 1, and so on.
/// After the first error the sequence ends.
pub struct AggregatedRows {
    // Declared before `staged` so the reader closes before the file is removed.
    reader: Box<dyn SnapshotReader>,
    staged: NamedTempFile,
    matrix: Arc<RegionMatrix>,
    variable: String,
    month: YearMonth,
    next_instant: usize,
    pending: std::vec::IntoIter<AggregatedRow>,
    finished: bool,
}

impl AggregatedRows {
    /// Instants discovered in the archive.
    pub fn instants(&self) -> usize {
        self.reader.instants()
    }

    pub fn staged_path(&self) -> &Path {
        self.staged.path()
    }

    /// Drain the sequence, stopping at the first error.
    pub fn collect_rows(self) -> Result<Vec<AggregatedRow>> {
        self.collect()
    }
}

impl Iterator for AggregatedRows {
    type Item = Result<AggregatedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.next() {
                return Some(Ok(row));
            }
            if self.finished || self.next_instant >= self.reader.instants() {
                self.finished = true;
                return None;
            }

            let index = self.next_instant;
            self.next_instant += 1;

            let rows = self.reader.snapshot(index).and_then(|values| {
                aggregate_snapshot(
                    &values,
                    &self.matrix,
                    self.month.hour_offset(index),
                    &self.variable,
                )
            });
            match rows {
                Ok(rows) => self.pending = rows.into_iter(),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Mean of each region's finite values in one snapshot.
///
/// Unmapped cells and non-finite values never contribute; a region without
/// any finite value yields no row. Rows come out in region id order.
pub fn aggregate_snapshot(
    values: &[f32],
    matrix: &RegionMatrix,
    timestamp: NaiveDateTime,
    variable: &str,
) -> Result<Vec<AggregatedRow>> {
    if values.len() != matrix.len() {
        let (rows, cols) = matrix.shape();
        return Err(AggregateError::decode(format!(
            "snapshot at {} has {} cells, grid is {}x{}",
            timestamp,
            values.len(),
            rows,
            cols
        )));
    }

    let regions = matrix.regions();
    let mut sums = vec![0.0f64; regions.len()];
    let mut counts = vec![0usize; regions.len()];

    for (index, value) in values.iter().enumerate() {
        if let Some(slot) = matrix.region_slot(index) {
            if value.is_finite() {
                sums[slot] += *value as f64;
                counts[slot] += 1;
            }
        }
    }

    Ok(regions
        .iter()
        .zip(sums.iter().zip(counts.iter()))
        .filter(|(_, (_, &count))| count > 0)
        .map(|(region, (&sum, &count))| {
            AggregatedRow::single(timestamp, region.clone(), variable, sum / count as f64)
        })
        .collect())
}
