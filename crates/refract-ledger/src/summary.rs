//! Run summary, manifest and winner promotion

use crate::error::LedgerError;
use crate::layout::AssetLayout;
use crate::score_log::ScoreRow;
use chrono::{DateTime, Utc};
use refract_candidate::{Candidate, ExploitationReport, GlobalSummary, StopReason};
use refract_search::SearchConfig;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Per-branch line of the run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    /// Branch index
    pub branch: u32,
    /// Best total (zero for a branch that produced nothing)
    pub best_score: f64,
    /// Best positive prompt
    pub best_prompt: String,
    /// Best artifact, if any
    pub best_image: Option<PathBuf>,
    /// Attempts run
    pub attempts: u32,
    /// Why it stopped
    pub stop_reason: StopReason,
}

/// Structured result of one run, written once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummaryDocument {
    /// Run identifier
    pub run_id: String,
    /// Project name
    pub project: String,
    /// Part name
    pub part: String,
    /// Write time
    pub generated_at: DateTime<Utc>,
    /// Winning branch
    pub winning_branch: u32,
    /// Winning total
    pub best_score: f64,
    /// Winning positive prompt
    pub best_prompt: String,
    /// Winning negative prompt
    pub best_negative_prompt: String,
    /// Winning artifact
    pub best_image: Option<PathBuf>,
    /// Every branch in order
    pub branches: Vec<BranchRecord>,
    /// Confidence renders of the winner
    pub exploitation: ExploitationReport,
    /// Parameters the run used
    pub config: SearchConfig,
}

impl RunSummaryDocument {
    /// Build from a finished search
    #[must_use]
    pub fn new(summary: &GlobalSummary, project: &str, part: &str, config: &SearchConfig) -> Self {
        let branches = summary
            .branches
            .iter()
            .map(|b| BranchRecord {
                branch: b.branch_id.0,
                best_score: b.best.score().map_or(0.0, |s| s.total),
                best_prompt: b.best.prompt().positive.clone(),
                best_image: b.best.artifact().map(|a| a.path().to_path_buf()),
                attempts: b.attempts,
                stop_reason: b.stop_reason,
            })
            .collect();

        Self {
            run_id: summary.run_id.to_string(),
            project: project.to_string(),
            part: part.to_string(),
            generated_at: Utc::now(),
            winning_branch: summary.winning_branch.0,
            best_score: summary.best.effective_total(),
            best_prompt: summary.best.prompt().positive.clone(),
            best_negative_prompt: summary.best.prompt().negative.clone(),
            best_image: summary.best.artifact().map(|a| a.path().to_path_buf()),
            branches,
            exploitation: summary.exploitation.clone(),
            config: config.clone(),
        }
    }
}

/// Write the run summary; refuses to overwrite
///
/// # Errors
/// Returns `AlreadyWritten` if the file exists, `Io`/`Json` otherwise.
pub fn write_run_summary(path: impl AsRef<Path>, document: &RunSummaryDocument) -> Result<(), LedgerError> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => LedgerError::AlreadyWritten(path.to_path_buf()),
            _ => LedgerError::io(path, e),
        })?;
    write_json(path, file, document)?;
    tracing::info!(path = %path.display(), "run summary written");
    Ok(())
}

/// Write the manifest of every scored candidate
///
/// # Errors
/// Returns `Io`/`Json` on failure.
pub fn write_manifest(path: impl AsRef<Path>, summary: &GlobalSummary) -> Result<usize, LedgerError> {
    let path = path.as_ref();
    let entries: Vec<ScoreRow> = summary
        .scored_candidates()
        .map(|(branch, candidate)| ScoreRow::new(branch, candidate))
        .collect();
    ensure_parent(path)?;
    let file = File::create(path).map_err(|e| LedgerError::io(path, e))?;
    write_json(path, file, &entries)?;
    tracing::info!(path = %path.display(), entries = entries.len(), "image manifest written");
    Ok(entries.len())
}

/// Copy the winning artifact to each target path
///
/// # Errors
/// Returns `NoArtifact` if the winner has none, or `Io` if a copy fails.
pub fn promote_winner(best: &Candidate, targets: &[PathBuf]) -> Result<(), LedgerError> {
    let source = best.artifact().ok_or(LedgerError::NoArtifact)?.path();
    for target in targets {
        ensure_parent(target)?;
        std::fs::copy(source, target).map_err(|e| LedgerError::io(target, e))?;
        tracing::info!(from = %source.display(), to = %target.display(), "winner promoted");
    }
    Ok(())
}

/// Persist everything a finished run produces
///
/// The run's own summary is written first; the shared manifest and the
/// promoted copies are only replaced once it is on disk. Manifest and
/// promotion failures are logged and skipped.
///
/// # Errors
/// Returns the summary write error, in which case nothing else is touched.
pub fn finalize_run(
    layout: &AssetLayout,
    summary: &GlobalSummary,
    project: &str,
    part: &str,
    config: &SearchConfig,
) -> Result<RunSummaryDocument, LedgerError> {
    let document = RunSummaryDocument::new(summary, project, part, config);
    write_run_summary(layout.summary(summary.run_id), &document)?;

    if let Err(e) = write_manifest(layout.manifest(), summary) {
        tracing::warn!(error = %e, "failed to write image manifest");
    }
    if let Err(e) = promote_winner(&summary.best, &layout.promotion_targets()) {
        tracing::warn!(error = %e, "failed to promote winning artifact");
    }
    Ok(document)
}

fn ensure_parent(path: &Path) -> Result<(), LedgerError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))
        }
        _ => Ok(()),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, file: File, value: &T) -> Result<(), LedgerError> {
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(|e| LedgerError::io(path, e))
}
