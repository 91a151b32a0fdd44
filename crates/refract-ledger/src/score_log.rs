//! Append-only CSV score log
//!
//! One row per scored variant. The header is written only when the file is
//! created, so successive runs keep appending to the same log.

use crate::error::LedgerError;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use refract_candidate::{BranchId, Candidate, ScoreSink, SinkError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// One scored variant, as persisted in the log and the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    /// Branch index
    pub branch: u32,
    /// Attempt (round) index
    pub round: u32,
    /// Variant index within the attempt
    pub variant: u32,
    /// Artifact path, empty when none
    pub filename: String,
    /// Positive prompt
    pub prompt: String,
    /// Negative prompt
    pub negative_prompt: String,
    /// Combined total
    pub score: f64,
    /// Alignment component
    pub clip: f64,
    /// Aesthetic component
    pub aesthetic: f64,
    /// RFC 3339 record time
    pub timestamp: String,
}

impl ScoreRow {
    /// Flatten a candidate
    #[must_use]
    pub fn new(branch: BranchId, candidate: &Candidate) -> Self {
        let score = candidate.score().copied().unwrap_or_default();
        Self {
            branch: branch.0,
            round: candidate.round_index(),
            variant: candidate.variant_index(),
            filename: candidate
                .artifact()
                .map(|a| a.path().display().to_string())
                .unwrap_or_default(),
            prompt: candidate.prompt().positive.clone(),
            negative_prompt: candidate.prompt().negative.clone(),
            score: score.total,
            clip: score.alignment,
            aesthetic: score.aesthetic,
            timestamp: candidate.recorded_at().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// CSV-backed [`ScoreSink`]
///
/// Appends are serialized behind a mutex and flushed per row, so
/// concurrently running branches can share one log.
pub struct CsvScoreLog {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvScoreLog {
    /// Open (or create) a log for appending
    ///
    /// # Errors
    /// Returns `Io` if the directory or file cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LedgerError::io(&path, e))?;
        let is_new = file.metadata().map_err(|e| LedgerError::io(&path, e))?.len() == 0;

        let writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        tracing::debug!(path = %path.display(), is_new, "score log opened");
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// Log file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row
    ///
    /// # Errors
    /// Returns `Csv` if the row cannot be encoded or written.
    pub fn append(&self, row: &ScoreRow) -> Result<(), LedgerError> {
        let mut writer = self.writer.lock();
        writer.serialize(row)?;
        writer.flush().map_err(|e| LedgerError::io(&self.path, e))?;
        Ok(())
    }
}

impl ScoreSink for CsvScoreLog {
    fn record(&self, branch: BranchId, candidate: &Candidate) -> Result<(), SinkError> {
        self.append(&ScoreRow::new(branch, candidate)).map_err(|e| match e {
            LedgerError::Io { source, .. } => SinkError::Io(source),
            other => SinkError::Encode(other.to_string()),
        })
    }
}

/// Read every row of a score log
///
/// # Errors
/// Returns `Io` or `Csv` on unreadable input.
pub fn read_score_log(path: impl AsRef<Path>) -> Result<Vec<ScoreRow>, LedgerError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LedgerError::io(path, e))?;
    csv::Reader::from_reader(file)
        .deserialize()
        .collect::<Result<Vec<ScoreRow>, _>>()
        .map_err(LedgerError::from)
}
