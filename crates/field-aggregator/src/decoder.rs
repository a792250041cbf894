//! Decoding staged archives into per-instant field snapshots.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

use crate::error::{AggregateError, Result};

/// Opens a staged archive.
pub trait FieldDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn SnapshotReader>>;
}

/// Random access to the instants of one opened archive.
pub trait SnapshotReader: Send {
    /// Number of instants in the archive, discovered from its time index.
    fn instants(&self) -> usize;

    /// Decode the flattened row-major field for instant `index`.
    fn snapshot(&mut self, index: usize) -> Result<Vec<f32>>;
}

/// Decodes GRIB2 archives with the `grib` crate.
///
/// Each message carrying the same parameter (category, number) as the first
/// message is one instant, in file order.
#[derive(Debug, Default, Clone, Copy)]
pub struct GribDecoder;

type GribFile = grib::Grib2<grib::SeekableGrib2Reader<BufReader<File>>>;

struct GribReader {
    grib: GribFile,
    messages: Vec<(usize, usize)>,
}

impl FieldDecoder for GribDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn SnapshotReader>> {
        let file = File::open(path)
            .map_err(|e| AggregateError::decode(format!("{}: {}", path.display(), e)))?;
        let grib = grib::from_reader(BufReader::new(file))
            .map_err(|e| AggregateError::decode(format!("invalid GRIB archive: {}", e)))?;

        let mut selector = None;
        let mut messages = Vec::new();
        for (index, submessage) in grib.iter() {
            let prod_def = submessage.prod_def();
            let parameter = (prod_def.parameter_category(), prod_def.parameter_number());
            let selected = *selector.get_or_insert(parameter);
            if parameter == selected {
                messages.push(index);
            }
        }

        if messages.is_empty() {
            return Err(AggregateError::decode("archive contains no messages"));
        }

        debug!(
            path = %path.display(),
            instants = messages.len(),
            category = ?selector.and_then(|s| s.0),
            number = ?selector.and_then(|s| s.1),
            "Indexed GRIB archive"
        );
        Ok(Box::new(GribReader { grib, messages }))
    }
}

impl SnapshotReader for GribReader {
    fn instants(&self) -> usize {
        self.messages.len()
    }

    fn snapshot(&mut self, index: usize) -> Result<Vec<f32>> {
        let wanted = *self
            .messages
            .get(index)
            .ok_or_else(|| AggregateError::decode(format!("no instant {}", index)))?;

        let (_, submessage) = self
            .grib
            .iter()
            .find(|(i, _)| *i == wanted)
            .ok_or_else(|| AggregateError::decode(format!("message {:?} vanished", wanted)))?;

        let decoder = grib::Grib2SubmessageDecoder::from(submessage)
            .map_err(|e| AggregateError::decode(format!("message {:?}: {}", wanted, e)))?;
        let values = decoder
            .dispatch()
            .map_err(|e| AggregateError::decode(format!("message {:?}: {}", wanted, e)))?;
        Ok(values.collect())
    }
}
