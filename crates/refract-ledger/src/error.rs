//! Ledger errors

use std::path::PathBuf;

/// Persistence error
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// File system failure
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// CSV encoding failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Write-once document already exists
    #[error("{0} already written")]
    AlreadyWritten(PathBuf),

    /// Winner has no artifact to promote
    #[error("winning candidate has no artifact")]
    NoArtifact,
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
