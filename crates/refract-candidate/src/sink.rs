//! Score sinks
//!
//! Branches report every scored candidate to a [`ScoreSink`]. Sinks are
//! shared between concurrently running branches, so implementations must
//! serialize their own writes. A failing sink never stops a search.

use crate::branch::BranchId;
use crate::candidate::Candidate;

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Underlying I/O failed
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded
    #[error("sink encoding failed: {0}")]
    Encode(String),
}

/// Append-only destination for scored candidates
pub trait ScoreSink: Send + Sync {
    /// Append one record
    ///
    /// # Errors
    /// Returns `SinkError` when the record could not be persisted.
    fn record(&self, branch: BranchId, candidate: &Candidate) -> Result<(), SinkError>;
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ScoreSink for NullSink {
    fn record(&self, _branch: BranchId, _candidate: &Candidate) -> Result<(), SinkError> {
        Ok(())
    }
}
