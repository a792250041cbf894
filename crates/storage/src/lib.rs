//! Destination stores for region-aggregated time series.
//!
//! Provides one interface over:
//! - PostgreSQL / TimescaleDB for production tables
//! - SQLite for local runs and tests

pub mod destination;
pub mod error;
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use destination::{connect, ConflictPolicy, Destination, PrepareOutcome, SchemaPolicy};
pub use error::{Result, StorageError};
pub use postgres::PgDestination;
pub use sqlite::SqliteDestination;
