//! Error types shared by the weather crates.

use thiserror::Error;

/// Errors raised while constructing shared value types.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Invalid month: {0} (expected YYYYMM or YYYY-MM)")]
    InvalidMonth(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Variable set is empty")]
    EmptyVariableSet,

    #[error("Duplicate variable name: {0}")]
    DuplicateVariable(String),
}
