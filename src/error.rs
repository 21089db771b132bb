use crate::types::NumericKind;
use thiserror::Error;

/// Custom error type for the storage and query core.
///
/// Invariant violations (out-of-range dictionary ids, column row-count
/// mismatches, bitmap entries beyond a segment's row count) are programming
/// errors, not data errors; they panic rather than appear here.
#[derive(Error, Debug)]
pub enum Error {
    /// A metric name was reused with an incompatible numeric kind within one
    /// mutable segment. The offending row is rejected; ingestion continues.
    #[error("Schema conflict for metric '{metric}': column is {expected}, row carries {actual}")]
    SchemaConflict {
        metric: String,
        expected: NumericKind,
        actual: NumericKind,
    },

    /// Segments with differing dimension/metric name sets (or metric kinds)
    /// cannot be merged.
    #[error("Cannot merge segments: {details}")]
    MergeIncompatibility { details: String },

    /// A post-aggregator dependency cycle, detected before execution.
    #[error("Cyclic post-aggregator dependency involving '{name}'")]
    CyclicPostAggregator { name: String },

    /// A post-aggregator references a field that is neither an aggregator
    /// output nor another post-aggregator.
    #[error("Post-aggregator '{post_aggregator}' references unknown field '{field}'")]
    UnknownField {
        post_aggregator: String,
        field: String,
    },

    #[error("Invalid time range: start={start}, end={end}")]
    InvalidTimeRange { start: u64, end: u64 },

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {details}")]
    Corruption { details: String },

    #[error("Lock acquisition failed: {0}")]
    LockPoisoned(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned(format!("Mutex/RwLock poisoned: {}", err))
    }
}
