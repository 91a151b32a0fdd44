//! Finalized search results

use crate::branch::{BranchId, StopReason};
use crate::candidate::{Candidate, JobIdentity};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Short lowercase tag taken from the random part of the ULID
    ///
    /// Used to keep file names from different runs apart.
    #[must_use]
    pub fn tag(&self) -> String {
        let text = self.0.to_string().to_ascii_lowercase();
        text[text.len() - 10..].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSummary {
    /// Branch identifier
    pub branch_id: BranchId,
    /// Best candidate (placeholder if nothing usable was produced)
    pub best: Candidate,
    /// Every variant in attempt order
    pub history: Vec<Candidate>,
    /// Attempts run
    pub attempts: u32,
    /// Why the branch stopped
    pub stop_reason: StopReason,
}

impl BranchSummary {
    /// Eligible for global reduction
    #[inline]
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.best.is_usable()
    }
}

/// One exploitation render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploitDispatch {
    /// Job identity used
    pub job: JobIdentity,
    /// Backend accepted the job
    pub accepted: bool,
}

/// Outcome of the exploitation phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploitationReport {
    /// One entry per requested render, in dispatch order
    pub dispatches: Vec<ExploitDispatch>,
}

impl ExploitationReport {
    /// Renders the backend accepted
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.dispatches.iter().filter(|d| d.accepted).count()
    }
}

/// Result of a whole search run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSummary {
    /// Run identifier
    pub run_id: RunId,
    /// Branch that produced the winner
    pub winning_branch: BranchId,
    /// Global best candidate
    pub best: Candidate,
    /// All branch summaries in branch order
    pub branches: Vec<BranchSummary>,
    /// Confidence renders of the winner
    pub exploitation: ExploitationReport,
}

impl GlobalSummary {
    /// Every scored candidate across all branches, in branch then attempt order
    pub fn scored_candidates(&self) -> impl Iterator<Item = (BranchId, &Candidate)> {
        self.branches.iter().flat_map(|b| {
            b.history
                .iter()
                .filter(|c| c.is_usable())
                .map(move |c| (b.branch_id, c))
        })
    }
}
