//! Region aggregation of gridded archives.
//!
//! One call handles one (variable, month): the compressed archive is fetched,
//! decompressed to a temporary file, decoded instant by instant and reduced to
//! the mean value of every region in the [`RegionMatrix`](region_index::RegionMatrix).

pub mod aggregate;
pub mod decoder;
pub mod error;
pub mod source;
pub mod staging;

pub use aggregate::{aggregate_snapshot, AggregatedRows, FieldAggregator, StagingConfig};
pub use decoder::{FieldDecoder, GribDecoder, SnapshotReader};
pub use error::{AggregateError, Result};
pub use source::{ArchiveSource, HttpArchiveSource, SourceConfig, DEFAULT_BASE_URL, DEFAULT_URL_TEMPLATE};
pub use staging::{stage, Compression};
