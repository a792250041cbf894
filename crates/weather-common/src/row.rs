//! Region-aggregated rows, the unit persisted to the destination.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// One (timestamp, region) record with the mean of each variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    pub timestamp: NaiveDateTime,
    pub region_id: String,
    pub country_code: String,
    pub values: BTreeMap<String, f64>,
}

impl AggregatedRow {
    /// Build a single-variable row; the country code is derived from the region id.
    pub fn single(
        timestamp: NaiveDateTime,
        region_id: impl Into<String>,
        variable: &str,
        value: f64,
    ) -> Self {
        let region_id = region_id.into();
        let mut values = BTreeMap::new();
        values.insert(variable.to_string(), value);
        Self {
            timestamp,
            country_code: country_code(&region_id),
            region_id,
            values,
        }
    }

    /// Destination key.
    pub fn key(&self) -> RowKey {
        (self.timestamp, self.region_id.clone())
    }
}

/// Uniqueness key of the destination table.
pub type RowKey = (NaiveDateTime, String);

/// First two characters of a region id (NUTS ids start with the ISO country).
pub fn country_code(region_id: &str) -> String {
    region_id.chars().take(2).collect()
}

/// Wide rows for one month, merged on `(timestamp, region_id)`.
///
/// Variables arrive from independent units that may disagree on which
/// instants exist, so rows are merged by key rather than appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedRows {
    rows: BTreeMap<RowKey, AggregatedRow>,
}

impl MergedRows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one row; values for the same variable overwrite.
    pub fn merge(&mut self, row: AggregatedRow) {
        match self.rows.entry(row.key()) {
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
            Entry::Occupied(mut slot) => {
                slot.get_mut().values.extend(row.values);
            }
        }
    }

    pub fn merge_all(&mut self, rows: impl IntoIterator<Item = AggregatedRow>) {
        for row in rows {
            self.merge(row);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregatedRow> {
        self.rows.values()
    }

    /// Rows ordered by (timestamp, region_id).
    pub fn into_rows(self) -> Vec<AggregatedRow> {
        self.rows.into_values().collect()
    }
}
