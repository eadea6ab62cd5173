use std::io::Error as IoError;

use thiserror::Error;

// --- Error Type ---
#[derive(Error, Debug)]
pub enum BlendError {
    #[error("Missing asset: {0}")]
    MissingAsset(String),
    #[error("Topology mismatch between '{source_name}' and '{dest_name}': {reason}")]
    TopologyMismatch {
        source_name: String,
        dest_name: String,
        reason: String,
    },
    #[error("Invalid interpolator query: {0}")]
    InvalidInterpolatorQuery(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Sequence '{0}' is already active")]
    AlreadyActive(String),
    #[error("IO Error: {0}")]
    Io(#[from] IoError),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
}

// Define a crate-wide Result type alias
pub type Result<T> = std::result::Result<T, BlendError>;
