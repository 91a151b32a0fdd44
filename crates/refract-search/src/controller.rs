//! Branch controller
//!
//! Runs one local-search trajectory: propose, synthesize, score, then
//! accept or stagnate, until the attempt budget runs out, the branch
//! stagnates, the target score is reached, or the run is cancelled.
//!
//! The same loop covers single-render "seed" branches and multi-render
//! "round" branches; they differ only in `variants_per_attempt` and
//! `reanchor_on_regression`.

use crate::config::SearchConfig;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use refract_candidate::{
    AttemptDecision, BranchId, BranchState, BranchSummary, Candidate, JobIdentity, PromptPair, Score, ScoreSink,
    StopReason,
};
use refract_oracle::{
    RefinementOracle, RefinementRequest, RetryPolicy, ScoreMode, ScoringOracle, SynthesisBackend, SynthesisJob,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Largest synthesis seed handed to a backend
pub const MAX_SYNTHESIS_SEED: u64 = 999_999;

/// The three external services a search talks to
#[derive(Clone)]
pub struct Oracles {
    /// Renders prompt pairs
    pub synthesis: Arc<dyn SynthesisBackend>,
    /// Rates artifacts
    pub scoring: Arc<dyn ScoringOracle>,
    /// Proposes better prompts
    pub refinement: Arc<dyn RefinementOracle>,
}

impl Oracles {
    /// Bundle oracle handles
    #[must_use]
    pub fn new(
        synthesis: Arc<dyn SynthesisBackend>,
        scoring: Arc<dyn ScoringOracle>,
        refinement: Arc<dyn RefinementOracle>,
    ) -> Self {
        Self {
            synthesis,
            scoring,
            refinement,
        }
    }
}

/// Job prefix for one render of a branch attempt
#[must_use]
pub fn variant_job_prefix(prefix: &str, branch: BranchId, round: u32, variant: u32) -> String {
    format!("{prefix}_b{branch}_r{round}_v{variant}")
}

/// Job prefix for the n-th exploitation render
#[must_use]
pub fn final_job_prefix(prefix: &str, n: u32) -> String {
    format!("{prefix}_final_{n}")
}

/// Deterministic when `rng_seed` is set: stream `offset` uses `rng_seed + offset`
pub(crate) fn seeded_rng(rng_seed: Option<u64>, offset: u64) -> StdRng {
    match rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(offset)),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Runs single branches against shared oracles
pub struct BranchController {
    config: Arc<SearchConfig>,
    oracles: Oracles,
    sink: Arc<dyn ScoreSink>,
    cancel: CancellationToken,
}

impl BranchController {
    /// Create new controller
    ///
    /// The configuration is assumed valid; [`crate::SearchCoordinator`]
    /// validates it before building controllers.
    #[must_use]
    pub fn new(
        config: Arc<SearchConfig>,
        oracles: Oracles,
        sink: Arc<dyn ScoreSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            oracles,
            sink,
            cancel,
        }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run one branch to a terminal state
    ///
    /// Never fails: oracle errors degrade the affected attempt and the
    /// outcome is reported through the summary's history and stop reason.
    ///
    /// # Arguments
    /// * `branch_id` - 1-based branch index, used in job names and seeds
    /// * `seed` - Starting prompt pair; sanitized, then dispatched verbatim on attempt 1
    /// * `max_attempts` - Attempt budget for this branch
    pub async fn run_branch(&self, branch_id: BranchId, seed: PromptPair, max_attempts: u32) -> BranchSummary {
        let limits = self.config.prompt_limits;
        let mut state = BranchState::new(branch_id, seed.sanitized(&limits));
        let mut rng = seeded_rng(self.config.rng_seed, u64::from(branch_id.0));
        let mut stop_reason = StopReason::AttemptsExhausted;

        tracing::info!(branch = %branch_id, max_attempts, "branch started");

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }
            if attempt > 1 && !self.pace(self.config.inter_attempt_delay).await {
                stop_reason = StopReason::Cancelled;
                break;
            }

            tracing::info!(branch = %branch_id, attempt, "attempt started");
            let prompt = self.propose(&mut state, attempt).await;

            let seeds: Vec<u64> = (0..self.config.variants_per_attempt)
                .map(|_| rng.random_range(0..=MAX_SYNTHESIS_SEED))
                .collect();
            let renders = seeds.iter().zip(1..).map(|(&synthesis_seed, variant)| {
                self.run_variant(branch_id, attempt, variant, prompt.clone(), synthesis_seed)
            });
            let variants = join_all(renders).await;

            for candidate in variants.iter().filter(|c| c.is_usable()) {
                if let Err(e) = self.sink.record(branch_id, candidate) {
                    tracing::warn!(branch = %branch_id, attempt, error = %e, "score log append failed");
                }
            }

            match state.conclude_attempt(prompt, variants) {
                AttemptDecision::Improved { previous, current } => {
                    tracing::info!(branch = %branch_id, attempt, previous, current, "new best accepted");
                }
                AttemptDecision::Stale { stale_count } => {
                    tracing::info!(
                        branch = %branch_id,
                        attempt,
                        stale_count,
                        max_stale = self.config.max_stale,
                        best = state.best().effective_total(),
                        "no improvement"
                    );
                }
            }

            if self.cancel.is_cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }
            if let Some(target) = self.config.target_score {
                if state.best().is_usable() && state.best().effective_total() >= target {
                    tracing::info!(branch = %branch_id, attempt, target, "target score reached");
                    stop_reason = StopReason::TargetReached;
                    break;
                }
            }
            if state.stale_count() >= self.config.max_stale {
                tracing::info!(branch = %branch_id, attempt, "branch stagnated");
                stop_reason = StopReason::Stagnated;
                break;
            }
        }

        let summary = state.finish(stop_reason);
        tracing::info!(
            branch = %branch_id,
            attempts = summary.attempts,
            best = summary.best.effective_total(),
            usable = summary.is_usable(),
            stop_reason = %summary.stop_reason,
            "branch finished"
        );
        summary
    }

    /// Choose the prompt pair for an attempt
    async fn propose(&self, state: &mut BranchState, attempt: u32) -> PromptPair {
        let limits = self.config.prompt_limits;
        if attempt == 1 {
            return state.base_prompt().clone();
        }

        let Some(last) = state.last_outcome().cloned() else {
            return state.base_prompt().clone();
        };
        if last.is_empty() {
            tracing::info!(
                branch = %state.branch_id(),
                attempt,
                "previous attempt produced nothing, retrying base prompt"
            );
            return state.base_prompt().clone();
        }

        let (score, artifact) = if self.config.reanchor_on_regression && state.last_regressed() {
            tracing::info!(
                branch = %state.branch_id(),
                attempt,
                best = state.best().effective_total(),
                "previous attempt regressed, re-anchoring to best"
            );
            state.reanchor();
            (state.best().score().copied(), state.best().artifact().cloned())
        } else {
            (last.score, last.artifact)
        };

        let request = RefinementRequest {
            prompt: state.base_prompt().clone(),
            score,
            attempt,
            artifact: if self.config.multimodal_refinement { artifact } else { None },
        };

        let refined = self
            .cancellable(tokio::time::timeout(
                self.config.refinement_timeout,
                self.oracles.refinement.refine(&request),
            ))
            .await;
        let proposal = match refined {
            Some(Ok(Ok(Some(pair)))) => pair,
            Some(Ok(Ok(None))) => {
                tracing::info!(branch = %state.branch_id(), attempt, "no refinement suggestion, keeping prompt");
                request.prompt.clone()
            }
            Some(Ok(Err(e))) => {
                tracing::warn!(branch = %state.branch_id(), attempt, error = %e, "refinement failed, keeping prompt");
                request.prompt.clone()
            }
            Some(Err(_)) => {
                tracing::warn!(
                    branch = %state.branch_id(),
                    attempt,
                    timeout = ?self.config.refinement_timeout,
                    "refinement timed out, keeping prompt"
                );
                request.prompt.clone()
            }
            None => request.prompt.clone(),
        };

        let sanitized = proposal.sanitized(&limits);
        if sanitized.positive.is_empty() {
            tracing::warn!(branch = %state.branch_id(), attempt, "refinement sanitized to nothing, keeping prompt");
            return request.prompt.sanitized(&limits);
        }
        sanitized
    }

    /// Dispatch, discover and score one render
    async fn run_variant(
        &self,
        branch_id: BranchId,
        attempt: u32,
        variant: u32,
        prompt: PromptPair,
        synthesis_seed: u64,
    ) -> Candidate {
        let identity = JobIdentity::new(
            variant_job_prefix(&self.config.job_prefix, branch_id, attempt, variant),
            synthesis_seed,
        );
        let candidate = Candidate::dispatched(prompt.clone(), attempt, variant, identity.clone());
        let job = SynthesisJob::new(prompt, identity, self.config.image_size);

        tracing::info!(
            branch = %branch_id,
            attempt,
            variant,
            prefix = job.prefix(),
            seed = synthesis_seed,
            "dispatching"
        );
        let retry = RetryPolicy::new(self.config.retry_bound, self.config.retry_backoff);
        let submitted = self
            .cancellable(retry.run("dispatch", |_| self.oracles.synthesis.submit(&job)))
            .await;
        match submitted {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::warn!(branch = %branch_id, attempt, variant, error = %e, "dispatch failed");
                return candidate;
            }
            None => return candidate,
        }

        tracing::info!(
            branch = %branch_id,
            attempt,
            variant,
            timeout = ?self.config.discovery_timeout,
            "waiting for artifact"
        );
        let discovered = self
            .cancellable(tokio::time::timeout(
                self.config.discovery_timeout,
                self.oracles.synthesis.await_artifact(&job),
            ))
            .await;
        let artifact = match discovered {
            Some(Ok(Ok(artifact))) => artifact,
            Some(Ok(Err(e))) => {
                tracing::warn!(branch = %branch_id, attempt, variant, error = %e, "artifact discovery failed");
                return candidate;
            }
            Some(Err(_)) => {
                tracing::warn!(branch = %branch_id, attempt, variant, "artifact discovery timed out");
                return candidate;
            }
            None => return candidate,
        };
        let candidate = candidate.with_artifact(artifact.clone());

        let scored = self
            .cancellable(tokio::time::timeout(
                self.config.scoring_timeout,
                self.oracles
                    .scoring
                    .score(&artifact, &job.prompt.positive, ScoreMode::Both),
            ))
            .await;
        let score = match scored {
            Some(Ok(Ok(raw))) => Score::combine(raw),
            Some(Ok(Err(e))) => {
                tracing::warn!(branch = %branch_id, attempt, variant, error = %e, "scoring failed, using zero");
                Score::ZERO
            }
            Some(Err(_)) => {
                tracing::warn!(branch = %branch_id, attempt, variant, "scoring timed out, using zero");
                Score::ZERO
            }
            None => Score::ZERO,
        };

        tracing::info!(
            branch = %branch_id,
            attempt,
            variant,
            total = score.total,
            alignment = score.alignment,
            aesthetic = score.aesthetic,
            artifact = %artifact,
            "scored"
        );
        candidate.scored(score)
    }

    /// Race a future against cancellation
    pub(crate) async fn cancellable<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            output = future => Some(output),
        }
    }

    /// Pause between renders, unless cancelled
    pub(crate) async fn pace(&self, delay: Duration) -> bool {
        delay.is_zero() || self.cancellable(tokio::time::sleep(delay)).await.is_some()
    }
}
