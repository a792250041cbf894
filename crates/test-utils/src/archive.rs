//! In-memory archive service and a minimal archive codec.
//!
//! The codec stands in for GRIB so pipeline tests can build archives from
//! plain `Vec<f32>` snapshots:
//!
//! ```text
//! magic "SYNF" | u32 LE instants | u32 LE cells | instants * cells f32 LE
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use field_aggregator::{AggregateError, ArchiveSource, FieldDecoder, SnapshotReader};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use weather_common::{Variable, YearMonth};

const MAGIC: &[u8; 4] = b"SYNF";
const HEADER_LEN: usize = 12;

/// Encode snapshots in the synthetic archive format.
///
/// All snapshots must have the same length.
pub fn encode_synthetic(snapshots: &[Vec<f32>]) -> Vec<u8> {
    let cells = snapshots.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(HEADER_LEN + snapshots.len() * cells * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(snapshots.len() as u32).to_le_bytes());
    out.extend_from_slice(&(cells as u32).to_le_bytes());
    for snapshot in snapshots {
        assert_eq!(snapshot.len(), cells, "ragged snapshots");
        for value in snapshot {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Bzip2-compress bytes the way the upstream service publishes archives.
pub fn bzip2_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::fast());
    encoder.write_all(data).expect("in-memory write");
    encoder.finish().expect("in-memory bzip2")
}

/// [`FieldDecoder`] for the synthetic format.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticDecoder;

struct SyntheticReader {
    instants: usize,
    cells: usize,
    data: Vec<u8>,
}

impl FieldDecoder for SyntheticDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn SnapshotReader>, AggregateError> {
        let data = std::fs::read(path).map_err(|e| AggregateError::Decode(e.to_string()))?;
        if data.len() < HEADER_LEN || &data[..4] != MAGIC {
            return Err(AggregateError::Decode("not a synthetic archive".into()));
        }
        let instants = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let cells = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
        if data.len() != HEADER_LEN + instants * cells * 4 {
            return Err(AggregateError::Decode(format!(
                "truncated archive: {} bytes for {} x {}",
                data.len(),
                instants,
                cells
            )));
        }
        Ok(Box::new(SyntheticReader {
            instants,
            cells,
            data,
        }))
    }
}

impl SnapshotReader for SyntheticReader {
    fn instants(&self) -> usize {
        self.instants
    }

    fn snapshot(&mut self, index: usize) -> Result<Vec<f32>, AggregateError> {
        if index >= self.instants {
            return Err(AggregateError::Decode(format!("no instant {}", index)));
        }
        let start = HEADER_LEN + index * self.cells * 4;
        let bytes = &self.data[start..start + self.cells * 4];
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

type ArchiveKey = (String, YearMonth);

/// [`ArchiveSource`] serving archives from memory.
///
/// Missing archives fail like an HTTP 404. Each archive can be configured to
/// fail transiently a number of times before it is served.
#[derive(Default)]
pub struct InMemoryArchiveSource {
    archives: Mutex<HashMap<ArchiveKey, Bytes>>,
    failures: Mutex<HashMap<ArchiveKey, u32>>,
    fetches: Mutex<HashMap<ArchiveKey, u32>>,
}

impl InMemoryArchiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` for (`variable`, `month`).
    pub fn insert(&self, variable: &str, month: YearMonth, data: impl Into<Bytes>) {
        self.archives
            .lock()
            .unwrap()
            .insert((variable.to_string(), month), data.into());
    }

    /// Serve uncompressed synthetic snapshots.
    pub fn insert_snapshots(&self, variable: &str, month: YearMonth, snapshots: &[Vec<f32>]) {
        self.insert(variable, month, encode_synthetic(snapshots));
    }

    /// Fail the next `times` fetches of (`variable`, `month`) transiently.
    pub fn fail_times(&self, variable: &str, month: YearMonth, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert((variable.to_string(), month), times);
    }

    /// Number of fetch attempts seen for (`variable`, `month`).
    pub fn fetch_count(&self, variable: &str, month: YearMonth) -> u32 {
        self.fetches
            .lock()
            .unwrap()
            .get(&(variable.to_string(), month))
            .copied()
            .unwrap_or(0)
    }

    /// Total fetch attempts across all archives.
    pub fn total_fetches(&self) -> u32 {
        self.fetches.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ArchiveSource for InMemoryArchiveSource {
    fn locate(&self, variable: &Variable, month: YearMonth) -> String {
        format!("memory://{}/{}", variable.name, month)
    }

    async fn fetch(&self, variable: &Variable, month: YearMonth) -> Result<Bytes, AggregateError> {
        let key = (variable.name.clone(), month);
        *self.fetches.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        let url = self.locate(variable, month);
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AggregateError::TransientFetch {
                        url,
                        message: "HTTP 503 Service Unavailable".into(),
                    });
                }
            }
        }

        self.archives
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(AggregateError::TransientFetch {
                url,
                message: "HTTP 404 Not Found".into(),
            })
    }
}
