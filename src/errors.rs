use thiserror::Error;

/// Error type for invalid operations.
///
/// Configuration errors are raised before any heavy computation starts;
/// data errors abort the current chunk and always name the offending cell
/// or field so the underlying input can be fixed and the chunk rerun.
#[derive(Error, Debug)]
pub enum IcegridError {
    #[error("{0}")]
    Error(String),
    #[error("Fine grid {fine} must be an exact integer multiple of coarse grid {coarse}")]
    GridMismatch { fine: String, coarse: String },
    #[error("Malformed elevation classes: {0}")]
    BadElevationClasses(String),
    #[error("Malformed chunk descriptor: {0}")]
    BadChunkDescriptor(String),
    #[error("Unknown grid name: {0}")]
    UnknownGrid(String),
    #[error("Cell ({j}, {i}): {reason}")]
    BadCell { j: usize, i: usize, reason: String },
    #[error("Missing field {field} in {path}")]
    MissingField { field: String, path: String },
    #[error("Field {field} has shape {found:?}, expected {expected:?}")]
    FieldShape {
        field: String,
        found: Vec<usize>,
        expected: Vec<usize>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Convenience type for `Result<T, IcegridError>`.
pub type IcegridResult<T> = Result<T, IcegridError>;
