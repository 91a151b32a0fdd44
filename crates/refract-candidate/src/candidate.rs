//! Candidates
//!
//! A [`Candidate`] is built once per rendered variant and never mutated:
//! attaching an artifact or a score consumes the value and returns a new
//! one.

use crate::prompt::PromptPair;
use crate::score::Score;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Handle to a discovered artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(PathBuf);

impl ArtifactRef {
    /// Create new artifact reference
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Filesystem location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Identity under which a synthesis job was dispatched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    /// Output filename prefix; discovery matches on it
    pub prefix: String,
    /// Sampler seed
    pub seed: u64,
}

impl JobIdentity {
    /// Create new job identity
    #[inline]
    #[must_use]
    pub fn new(prefix: impl Into<String>, seed: u64) -> Self {
        Self {
            prefix: prefix.into(),
            seed,
        }
    }
}

/// One prompt pair and its generation/score outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    prompt: PromptPair,
    round_index: u32,
    variant_index: u32,
    job: Option<JobIdentity>,
    artifact: Option<ArtifactRef>,
    score: Option<Score>,
    recorded_at: DateTime<Utc>,
}

impl Candidate {
    /// Zero-score placeholder holding a branch's seed prompt
    #[must_use]
    pub fn placeholder(prompt: PromptPair) -> Self {
        Self {
            prompt,
            round_index: 1,
            variant_index: 1,
            job: None,
            artifact: None,
            score: Some(Score::ZERO),
            recorded_at: Utc::now(),
        }
    }

    /// New candidate for a dispatched job
    ///
    /// Indices are 1-based; zero is clamped to one.
    #[must_use]
    pub fn dispatched(prompt: PromptPair, round_index: u32, variant_index: u32, job: JobIdentity) -> Self {
        Self {
            prompt,
            round_index: round_index.max(1),
            variant_index: variant_index.max(1),
            job: Some(job),
            artifact: None,
            score: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attach the discovered artifact
    #[inline]
    #[must_use]
    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifact = Some(artifact);
        self.recorded_at = Utc::now();
        self
    }

    /// Attach the score
    #[inline]
    #[must_use]
    pub fn scored(mut self, score: Score) -> Self {
        self.score = Some(score);
        self.recorded_at = Utc::now();
        self
    }

    /// Prompt pair under test
    #[inline]
    #[must_use]
    pub fn prompt(&self) -> &PromptPair {
        &self.prompt
    }

    /// 1-based round (attempt) index
    #[inline]
    #[must_use]
    pub fn round_index(&self) -> u32 {
        self.round_index
    }

    /// 1-based variant index within the round
    #[inline]
    #[must_use]
    pub fn variant_index(&self) -> u32 {
        self.variant_index
    }

    /// Job identity, absent for placeholders
    #[inline]
    #[must_use]
    pub fn job(&self) -> Option<&JobIdentity> {
        self.job.as_ref()
    }

    /// Discovered artifact
    #[inline]
    #[must_use]
    pub fn artifact(&self) -> Option<&ArtifactRef> {
        self.artifact.as_ref()
    }

    /// Score, if scoring ran
    #[inline]
    #[must_use]
    pub fn score(&self) -> Option<&Score> {
        self.score.as_ref()
    }

    /// When the candidate last changed state
    #[inline]
    #[must_use]
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Total used for comparisons; absent scores rank lowest
    #[inline]
    #[must_use]
    pub fn effective_total(&self) -> f64 {
        self.score.map_or(f64::NEG_INFINITY, |s| s.total)
    }

    /// Has both an artifact and a score
    #[inline]
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.artifact.is_some() && self.score.is_some()
    }

    /// Strictly better than another candidate
    #[inline]
    #[must_use]
    pub fn improves_on(&self, other: &Candidate) -> bool {
        self.effective_total() > other.effective_total()
    }
}
