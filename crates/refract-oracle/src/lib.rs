//! Refract Oracle - external services behind narrow traits
//!
//! The search controller talks to three oracles:
//! - [`SynthesisBackend`]: renders a prompt pair into an artifact
//! - [`ScoringOracle`]: rates an artifact against its prompt
//! - [`RefinementOracle`]: proposes an improved prompt pair
//!
//! Concrete adapters ship for an HTTP node-graph renderer with on-disk
//! discovery ([`HttpSynthesisBackend`] + [`OutputWatcher`]), a scoring
//! command ([`CommandScorer`]) and an Ollama-compatible language model
//! ([`OllamaRefiner`]). All retrying goes through [`RetryPolicy`].
//!
//! Enable the `mocks` feature for `mockall` doubles of each trait.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod discovery;
pub mod error;
pub mod refinement;
pub mod retry;
pub mod scoring;
pub mod synthesis;

pub use discovery::OutputWatcher;
pub use error::OracleError;
pub use refinement::{parse_suggestion, OllamaRefiner, PromptTemplate, RefinementOracle, RefinementRequest};
pub use retry::RetryPolicy;
pub use scoring::{parse_score_report, CommandScorer, ScoreMode, ScoringOracle};
pub use synthesis::{build_job_graph, GraphSettings, HttpSynthesisBackend, SynthesisBackend, SynthesisJob};

#[cfg(any(test, feature = "mocks"))]
pub use refinement::MockRefinementOracle;
#[cfg(any(test, feature = "mocks"))]
pub use scoring::MockScoringOracle;
#[cfg(any(test, feature = "mocks"))]
pub use synthesis::MockSynthesisBackend;
