//! Common types shared by the region-aggregation crates.

pub mod error;
pub mod row;
pub mod time;
pub mod variable;

pub use error::CommonError;
pub use row::{country_code, AggregatedRow, MergedRows, RowKey};
pub use time::{MonthRange, YearMonth};
pub use variable::{Variable, VariableSet};
