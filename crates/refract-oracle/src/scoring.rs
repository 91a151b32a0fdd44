//! Scoring oracle
//!
//! Rates an artifact against the prompt that produced it. The oracle
//! reports raw components; combination into a total lives in
//! `refract_candidate::Score`.

use crate::error::{truncate, OracleError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use refract_candidate::{ArtifactRef, RawScore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;

/// Which components to compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    /// Prompt alignment only
    Alignment,
    /// Aesthetic only
    Aesthetic,
    /// Both components
    #[default]
    Both,
}

impl ScoreMode {
    /// Command-line spelling
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Alignment => "clip",
            Self::Aesthetic => "aesthetic",
            Self::Both => "both",
        }
    }
}

/// Artifact quality oracle
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Score one artifact
    ///
    /// # Errors
    /// Returns `OracleError` when no score could be obtained. Callers
    /// treat that as the neutral zero score.
    async fn score(&self, artifact: &ArtifactRef, prompt: &str, mode: ScoreMode) -> Result<RawScore, OracleError>;
}

#[derive(Debug, Deserialize)]
struct ScoreReport {
    #[serde(default)]
    clip_score: f64,
    #[serde(default)]
    aesthetic_score: f64,
}

/// Parse a scorer report from command output
///
/// Accepts either a bare JSON object or output whose last non-empty line
/// is the JSON object (scorers often log before printing the result).
///
/// # Errors
/// Returns `Malformed` if no JSON object can be found.
pub fn parse_score_report(stdout: &str) -> Result<RawScore, OracleError> {
    let trimmed = stdout.trim();
    let report: ScoreReport = serde_json::from_str(trimmed)
        .or_else(|_| {
            let last = trimmed.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or_default();
            serde_json::from_str(last.trim())
        })
        .map_err(|e| OracleError::Malformed(format!("score report: {e}: {}", truncate(trimmed, 120))))?;
    Ok(RawScore::new(report.clip_score, report.aesthetic_score))
}

/// Scorer that runs an external program
///
/// Invoked as `<program> [args..] --image <path> --prompt <text> --mode <mode>`.
#[derive(Debug, Clone)]
pub struct CommandScorer {
    program: PathBuf,
    args: Vec<String>,
    retry: RetryPolicy,
}

impl CommandScorer {
    /// Create new scorer
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            retry: RetryPolicy::once(),
        }
    }

    /// Arguments placed before the scoring flags (e.g. an interpreter script)
    #[inline]
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn run_once(&self, artifact: &ArtifactRef, prompt: &str, mode: ScoreMode) -> Result<RawScore, OracleError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--image")
            .arg(artifact.path())
            .arg("--prompt")
            .arg(prompt)
            .arg("--mode")
            .arg(mode.as_arg())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(OracleError::Process {
                status: output.status.to_string(),
                stderr: truncate(&String::from_utf8_lossy(&output.stderr), 200),
            });
        }

        parse_score_report(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ScoringOracle for CommandScorer {
    async fn score(&self, artifact: &ArtifactRef, prompt: &str, mode: ScoreMode) -> Result<RawScore, OracleError> {
        self.retry
            .run("scoring", |_| self.run_once(artifact, prompt, mode))
            .await
    }
}
