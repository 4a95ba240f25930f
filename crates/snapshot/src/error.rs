use std::path::PathBuf;
use thiserror::Error;

/// Snapshot persistence errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Decoding error: {0}")]
    Decode(String),

    /// Written by an incompatible format version
    #[error("Unsupported format version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    /// The file holds a different kind of snapshot than requested
    #[error("Expected a '{expected}' snapshot, found '{found}'")]
    Kind { expected: String, found: String },
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnapshotError::Io {
            path: path.into(),
            source,
        }
    }
}
