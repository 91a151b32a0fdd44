//! Search coordinator
//!
//! Runs every branch from the same seed, reduces their bests to a global
//! winner and re-renders the winner's prompt for confidence.

use crate::config::SearchConfig;
use crate::controller::{final_job_prefix, seeded_rng, BranchController, Oracles, MAX_SYNTHESIS_SEED};
use crate::error::SearchError;
use futures::future::join_all;
use rand::Rng;
use refract_candidate::{
    BranchId, BranchSummary, Candidate, ExploitDispatch, ExploitationReport, GlobalSummary, JobIdentity, PromptPair,
    RunId, ScoreSink,
};
use refract_oracle::{RetryPolicy, SynthesisJob};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Seed stream offset reserved for exploitation renders
const EXPLOIT_STREAM: u64 = 0;

/// Pick the global winner
///
/// Only branches whose best candidate has an artifact and a score take
/// part. The strictly highest total wins; ties go to the earliest branch.
#[must_use]
pub fn select_winner(branches: &[BranchSummary]) -> Option<&BranchSummary> {
    branches
        .iter()
        .filter(|b| b.is_usable())
        .fold(None, |winner: Option<&BranchSummary>, branch| match winner {
            Some(w) if !branch.best.improves_on(&w.best) => Some(w),
            _ => Some(branch),
        })
}

/// Orchestrates a whole search run
pub struct SearchCoordinator {
    controller: BranchController,
    config: Arc<SearchConfig>,
    oracles: Oracles,
    cancel: CancellationToken,
    run_id: RunId,
}

impl SearchCoordinator {
    /// Create new coordinator
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration fails validation.
    pub fn new(
        config: SearchConfig,
        oracles: Oracles,
        sink: Arc<dyn ScoreSink>,
        cancel: CancellationToken,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let config = Arc::new(config);
        let controller = BranchController::new(Arc::clone(&config), oracles.clone(), sink, cancel.clone());
        Ok(Self {
            controller,
            config,
            oracles,
            cancel,
            run_id: RunId::new(),
        })
    }

    /// Use a caller-chosen run identifier
    ///
    /// Callers that scope job prefixes or output paths by run pass the same
    /// id here so the summary matches them.
    #[inline]
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Identifier the next run reports
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run all branches, pick the winner and exploit it
    ///
    /// # Arguments
    /// * `seed` - Prompt pair every branch starts from
    ///
    /// # Errors
    /// Returns `NoWinner` when no branch produced a usable candidate, or
    /// `Cancelled` when the run was cancelled before one was found.
    pub async fn run(&self, seed: PromptPair) -> Result<GlobalSummary, SearchError> {
        let run_id = self.run_id;
        let branch_count = self.config.max_branches;
        let max_attempts = self.config.max_attempts_per_branch;

        tracing::info!(
            %run_id,
            branches = branch_count,
            max_attempts,
            variants = self.config.variants_per_attempt,
            concurrent = self.config.concurrent_branches,
            "search started"
        );
        self.clear_queue().await;

        let branches = if self.config.concurrent_branches {
            let runs = (1..=branch_count)
                .map(|b| self.controller.run_branch(BranchId::new(b), seed.clone(), max_attempts));
            join_all(runs).await
        } else {
            let mut done = Vec::with_capacity(branch_count as usize);
            for b in 1..=branch_count {
                if self.cancel.is_cancelled() {
                    tracing::info!(%run_id, skipped_from = b, "cancelled, not starting remaining branches");
                    break;
                }
                done.push(self.controller.run_branch(BranchId::new(b), seed.clone(), max_attempts).await);
            }
            done
        };

        let Some(winner) = select_winner(&branches) else {
            self.clear_queue().await;
            if self.cancel.is_cancelled() {
                tracing::warn!(%run_id, "search cancelled without a winner");
                return Err(SearchError::Cancelled);
            }
            tracing::error!(%run_id, branches = branches.len(), "no branch produced a usable candidate");
            return Err(SearchError::NoWinner {
                branches: branches.len(),
            });
        };
        let winning_branch = winner.branch_id;
        let best = winner.best.clone();

        tracing::info!(
            %run_id,
            branch = %winning_branch,
            total = best.effective_total(),
            prompt = %best.prompt().positive,
            "global winner selected"
        );

        let exploitation = self.exploit(&best).await;
        self.clear_queue().await;

        Ok(GlobalSummary {
            run_id,
            winning_branch,
            best,
            branches,
            exploitation,
        })
    }

    /// Re-dispatch the winner's exact prompt pair `final_variant_count` times
    ///
    /// Outcomes are reported only; nothing feeds back into the search.
    pub async fn exploit(&self, winner: &Candidate) -> ExploitationReport {
        let mut report = ExploitationReport::default();
        let mut rng = seeded_rng(self.config.rng_seed, EXPLOIT_STREAM);
        let retry = RetryPolicy::new(self.config.retry_bound, self.config.retry_backoff);
        let prompt = winner.prompt().clone();

        for n in 1..=self.config.final_variant_count {
            if n > 1 && !self.controller.pace(self.config.inter_attempt_delay).await {
                tracing::info!(rendered = n - 1, "exploitation cancelled");
                break;
            }

            let identity = JobIdentity::new(
                final_job_prefix(&self.config.job_prefix, n),
                rng.random_range(0..=MAX_SYNTHESIS_SEED),
            );
            let job = SynthesisJob::new(prompt.clone(), identity.clone(), self.config.image_size);
            tracing::info!(n, prefix = job.prefix(), seed = identity.seed, "dispatching final variant");

            let submitted = self
                .controller
                .cancellable(retry.run("final dispatch", |_| self.oracles.synthesis.submit(&job)))
                .await;
            let accepted = match submitted {
                Some(Ok(())) => true,
                Some(Err(e)) => {
                    tracing::warn!(n, error = %e, "final variant dispatch failed");
                    false
                }
                None => {
                    tracing::info!(rendered = n - 1, "exploitation cancelled");
                    report.dispatches.push(ExploitDispatch {
                        job: identity,
                        accepted: false,
                    });
                    break;
                }
            };
            report.dispatches.push(ExploitDispatch {
                job: identity,
                accepted,
            });
        }

        tracing::info!(
            requested = self.config.final_variant_count,
            accepted = report.accepted(),
            "exploitation finished"
        );
        report
    }

    async fn clear_queue(&self) {
        if let Err(e) = self.oracles.synthesis.clear_queue().await {
            tracing::warn!(error = %e, "could not clear synthesis queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refract_candidate::{ArtifactRef, RawScore, Score, StopReason};

    fn summary(branch: u32, total: Option<f64>) -> BranchSummary {
        let prompt = PromptPair::new(format!("p{branch}"), "n");
        let best = match total {
            Some(t) => Candidate::dispatched(prompt, 1, 1, JobIdentity::new(format!("j{branch}"), 0))
                .with_artifact(ArtifactRef::new(format!("/out/j{branch}.png")))
                .scored(Score::combine(RawScore::new(0.0, t * 2.0))),
            None => Candidate::placeholder(prompt),
        };
        BranchSummary {
            branch_id: BranchId::new(branch),
            best,
            history: Vec::new(),
            attempts: 1,
            stop_reason: StopReason::AttemptsExhausted,
        }
    }

    #[test]
    fn tie_goes_to_lowest_branch() {
        let branches = vec![summary(1, Some(6.1)), summary(2, Some(7.4)), summary(3, Some(7.4))];
        assert_eq!(select_winner(&branches).map(|b| b.branch_id), Some(BranchId::new(2)));
    }

    #[test]
    fn placeholders_are_excluded() {
        let branches = vec![summary(1, None), summary(2, Some(0.5)), summary(3, None)];
        assert_eq!(select_winner(&branches).map(|b| b.branch_id), Some(BranchId::new(2)));
        assert!(select_winner(&[summary(1, None), summary(2, None)]).is_none());
        assert!(select_winner(&[]).is_none());
    }
}
