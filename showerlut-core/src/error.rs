//! Error types for showerlut-core.

use thiserror::Error;

/// Result type alias for showerlut operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for showerlut operations.
///
/// Everything here is fatal for a batch run. Missing statistics for a bin,
/// telescope or event are not errors and travel as `None` instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Axis values differ between table instances of one telescope type.
    #[error("inconsistent table axes for telescope type {telescope_type}: {detail}")]
    AxisMismatch { telescope_type: u64, detail: String },

    /// Two table sets of one quantity disagree on their value scale.
    #[error("inconsistent value scale for quantity {quantity}: {detail}")]
    ScaleMismatch { quantity: String, detail: String },

    /// A table key appears twice while building or merging a hierarchy.
    #[error("duplicate table: {0}")]
    DuplicateTable(String),

    /// A hierarchical table key could not be parsed.
    #[error("invalid table key: {0}")]
    InvalidKey(String),

    /// Configuration JSON could not be parsed.
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
