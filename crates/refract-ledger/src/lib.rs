//! Refract Ledger - persisted results of a search run
//!
//! - [`CsvScoreLog`]: append-only score log, usable as a [`refract_candidate::ScoreSink`]
//! - [`write_run_summary`]: write-once JSON summary
//! - [`write_manifest`]: JSON list of every scored image
//! - [`promote_winner`]: copies the winning image to well-known names
//!
//! Paths follow [`AssetLayout`].

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod layout;
pub mod score_log;
pub mod summary;

pub use error::LedgerError;
pub use layout::AssetLayout;
pub use score_log::{read_score_log, CsvScoreLog, ScoreRow};
pub use summary::{
    finalize_run, promote_winner, write_manifest, write_run_summary, BranchRecord, RunSummaryDocument,
};
