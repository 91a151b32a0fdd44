//! Search errors
//!
//! Oracle failures never surface here: branches degrade them locally.
//! Only a run with no usable winner (or no run at all) is an error.

use crate::config::ConfigError;

/// Search-level error
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// No branch produced a scored candidate with an artifact
    #[error("no usable candidate across {branches} branches")]
    NoWinner {
        /// Branches that ran
        branches: usize,
    },

    /// Run was cancelled before a winner was found
    #[error("search cancelled")]
    Cancelled,

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl SearchError {
    /// The run completed but found nothing
    #[inline]
    #[must_use]
    pub fn is_no_winner(&self) -> bool {
        matches!(self, Self::NoWinner { .. })
    }

    /// Process exit status for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoWinner { .. } => 2,
            Self::Cancelled => 130,
            Self::InvalidConfig(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(SearchError::NoWinner { branches: 3 }.exit_code(), 2);
        assert_eq!(SearchError::Cancelled.exit_code(), 130);
        let invalid = SearchError::from(ConfigError::InvalidPrefix(String::new()));
        assert_eq!(invalid.exit_code(), 1);
        assert!(!invalid.is_no_winner());
    }
}
