//! Shared test utilities for the weather-regions workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic grid and polygon generators
//! - An in-memory archive service with injectable failures
//! - A minimal archive codec implementing `FieldDecoder`
//! - A GRIB2 message writer for exercising the real decoder
//! - Common fixtures such as the 2x2 scenario
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{two_by_two, InMemoryArchiveSource, SyntheticDecoder};
//! ```

pub mod archive;
pub mod fixtures;
pub mod generators;
pub mod grib;

// Re-export commonly used items at the crate root
pub use archive::*;
pub use fixtures::*;
pub use generators::*;
pub use grib::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}
