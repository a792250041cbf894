//! Decompression of downloaded archives into local temporary files.

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{AggregateError, Result};

/// Compression applied to upstream archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Bzip2,
    Gzip,
    None,
}

/// Decompress `data` into a new temporary file inside `dir`.
///
/// The file is removed when the returned handle is dropped. Read errors from
/// the decompressor mean a corrupt archive; write errors are disk failures.
pub fn stage(data: &[u8], compression: Compression, dir: &Path) -> Result<NamedTempFile> {
    std::fs::create_dir_all(dir).map_err(AggregateError::Staging)?;
    let mut staged = tempfile::Builder::new()
        .prefix("archive-")
        .suffix(".grb")
        .tempfile_in(dir)
        .map_err(AggregateError::Staging)?;

    let mut reader: Box<dyn Read + '_> = match compression {
        Compression::Bzip2 => Box::new(BzDecoder::new(data)),
        Compression::Gzip => Box::new(GzDecoder::new(data)),
        Compression::None => Box::new(data),
    };

    let mut buf = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| AggregateError::decode(format!("decompression failed: {}", e)))?;
        if n == 0 {
            break;
        }
        staged
            .write_all(&buf[..n])
            .map_err(AggregateError::Staging)?;
        written += n as u64;
    }
    staged.flush().map_err(AggregateError::Staging)?;

    if written == 0 {
        return Err(AggregateError::decode("archive is empty"));
    }

    debug!(
        path = %staged.path().display(),
        compressed = data.len(),
        bytes = written,
        "Staged archive"
    );
    Ok(staged)
}
