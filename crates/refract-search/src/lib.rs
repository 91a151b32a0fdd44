//! Refract Search - multi-branch hill climbing over prompt space
//!
//! A [`SearchCoordinator`] runs several independent branches from the same
//! seed prompt. Each branch is driven by a [`BranchController`]:
//!
//! 1. dispatch the current prompt pair to the synthesis backend
//! 2. wait (bounded) for the artifact, then score it
//! 3. keep it if it beats the branch best, otherwise count a stale attempt
//! 4. ask the refinement oracle for the next prompt
//!
//! Branches stop on budget, stagnation, target score or cancellation. The
//! coordinator picks the best branch (earliest wins ties) and re-renders
//! its prompt `final_variant_count` times.
//!
//! # Example
//!
//! ```rust,no_run
//! use refract_candidate::{NullSink, PromptPair};
//! use refract_search::{Oracles, SearchConfig, SearchCoordinator};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(oracles: Oracles) -> Result<(), refract_search::SearchError> {
//! let config = SearchConfig::new().with_max_branches(2).with_max_attempts(4);
//! let coordinator = SearchCoordinator::new(config, oracles, Arc::new(NullSink), CancellationToken::new())?;
//! let summary = coordinator.run(PromptPair::new("retro robot workshop", "blurry")).await?;
//! println!("winner: branch {} scored {}", summary.winning_branch, summary.best.effective_total());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;

pub use config::{ConfigError, SearchConfig};
pub use controller::{final_job_prefix, variant_job_prefix, BranchController, Oracles, MAX_SYNTHESIS_SEED};
pub use coordinator::{select_winner, SearchCoordinator};
pub use error::SearchError;
