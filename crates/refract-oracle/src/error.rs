//! Error types for oracle adapters
//!
//! Every adapter failure is recoverable from the search's point of view:
//! callers degrade to "no artifact", "neutral score" or "no suggestion".
//! The classification here only decides whether a retry is worthwhile.

use std::time::Duration;

/// Oracle adapter error
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Network or protocol failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Remote side answered with a non-success status
    #[error("rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// Response could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Operation exceeded its time box
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Retry budget used up
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Last failure seen
        last: Box<OracleError>,
    },

    /// Local I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External process failed
    #[error("process exited with {status}: {stderr}")]
    Process {
        /// Exit status description
        status: String,
        /// Captured stderr (truncated)
        stderr: String,
    },

    /// Endpoint URL could not be parsed or joined
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Background task panicked or was cancelled
    #[error("background task failed: {0}")]
    Join(String),
}

impl OracleError {
    /// Whether retrying the same call may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::Io(_) | Self::Process { .. } => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) | Self::Exhausted { .. } | Self::InvalidEndpoint(_) | Self::Join(_) => {
                false
            }
        }
    }

    /// Build a rejection from a status and body, keeping the body short
    #[must_use]
    pub fn rejected(status: u16, body: &str) -> Self {
        Self::Rejected {
            status,
            body: truncate(body, 200),
        }
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
