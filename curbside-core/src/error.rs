//! Error taxonomy for the estimation core.
//!
//! Only unrecoverable input problems surface here. Unknown states, degenerate
//! probabilities, dropped weeks and optimizer non-convergence are recoverable
//! and travel as counters or flags on the values that produced them.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the estimation core.
#[derive(Debug, Error, PartialEq)]
pub enum CurbsideError {
    #[error("table `{table}` is missing required column `{column}`")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
    #[error("table `{table}` has no rows")]
    EmptyTable { table: &'static str },
    #[error("unparsable date `{value}` (expected YYYY-MM-DD)")]
    InvalidDate { value: String },
    #[error("malformed state tuple `{value}`")]
    InvalidState { value: String },
    #[error("state has {actual} entries but the layout defines {expected}")]
    StateLength { expected: usize, actual: usize },
    #[error("truck `{truck}` appears more than once in the truck types table")]
    DuplicateTruck { truck: String },
    #[error("truck `{truck}` is not listed in the truck types table")]
    UnknownTruck { truck: String },
    #[error("location `{location}` is not part of the location set")]
    UnknownLocation { location: String },
    #[error("fleet has {trucks} trucks; at most {max} are supported")]
    FleetTooLarge { trucks: usize, max: usize },
    #[error("{locations} locations configured; at most {max} are supported")]
    TooManyLocations { locations: usize, max: usize },
    #[error("state variable `{name}` is defined more than once")]
    DuplicateFeature { name: String },
    #[error("state variable `{name}` does not match the fleet and location set")]
    UnknownFeature { name: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias used throughout the core.
pub type Result<T, E = CurbsideError> = std::result::Result<T, E>;
