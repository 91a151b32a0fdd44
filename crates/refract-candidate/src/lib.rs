//! Refract Candidate - data model for prompt search
//!
//! Provides the values that flow through a search run:
//! - [`PromptPair`]: positive/negative prompt under test, plus sanitization
//! - [`Score`]: combined quality score with its raw components
//! - [`Candidate`]: one prompt pair and its synthesis/scoring outcome
//! - [`BranchState`]: the mutable state of one local-search trajectory
//! - [`BranchSummary`] / [`GlobalSummary`]: finalized results
//! - [`ScoreSink`]: append-only destination for scored candidates
//!
//! # Example
//!
//! ```rust
//! use refract_candidate::{BranchId, BranchState, PromptPair};
//!
//! let seed = PromptPair::new("neon control room, wide lens", "blurry");
//! let state = BranchState::new(BranchId::new(1), seed.clone());
//!
//! assert_eq!(state.base_prompt(), &seed);
//! assert!(!state.best().is_usable());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod branch;
pub mod candidate;
pub mod prompt;
pub mod score;
pub mod sink;
pub mod summary;

pub use branch::{AttemptDecision, AttemptOutcome, BranchId, BranchState, StopReason};
pub use candidate::{ArtifactRef, Candidate, JobIdentity};
pub use prompt::{sanitize_text, PromptLimits, PromptPair, Sanitized};
pub use score::{combine_total, RawScore, Score};
pub use sink::{NullSink, ScoreSink, SinkError};
pub use summary::{BranchSummary, ExploitDispatch, ExploitationReport, GlobalSummary, RunId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
