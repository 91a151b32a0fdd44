use proptest::prelude::*;
use refract_candidate::{BranchId, BranchSummary, PromptPair, Score, ScoreSink, StopReason};
use refract_oracle::MockRefinementOracle;
use refract_search::{BranchController, Oracles, SearchConfig};
use refract_test_utils::{MemorySink, RecordingRefiner, ScriptedScorer, ScriptedSynthesis};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config() -> SearchConfig {
    SearchConfig::new()
        .with_inter_attempt_delay(Duration::ZERO)
        .with_retry(3, Duration::from_millis(10))
        .with_discovery_timeout(Duration::from_secs(30))
        .with_rng_seed(42)
        .with_job_prefix("t")
}

fn seed() -> PromptPair {
    PromptPair::new("seed prompt", "blurry")
}

struct Harness {
    synthesis: Arc<ScriptedSynthesis>,
    scorer: Arc<ScriptedScorer>,
    refiner: Arc<RecordingRefiner>,
    sink: Arc<MemorySink>,
}

impl Harness {
    fn new(synthesis: ScriptedSynthesis, scorer: ScriptedScorer, refiner: RecordingRefiner) -> Self {
        Self {
            synthesis: Arc::new(synthesis),
            scorer: Arc::new(scorer),
            refiner: Arc::new(refiner),
            sink: Arc::new(MemorySink::new()),
        }
    }

    fn controller(&self, config: SearchConfig) -> BranchController {
        self.controller_with(config, self.sink.clone(), CancellationToken::new())
    }

    fn controller_with(&self, config: SearchConfig, sink: Arc<dyn ScoreSink>, cancel: CancellationToken) -> BranchController {
        let oracles = Oracles::new(self.synthesis.clone(), self.scorer.clone(), self.refiner.clone());
        BranchController::new(Arc::new(config), oracles, sink, cancel)
    }

    async fn run(&self, config: SearchConfig, max_attempts: u32) -> BranchSummary {
        self.controller(config).run_branch(BranchId::new(1), seed(), max_attempts).await
    }
}

fn totals(summary: &BranchSummary) -> Vec<Option<f64>> {
    summary.history.iter().map(|c| c.score().map(|s| s.total)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_stagnation_stops_after_max_stale() {
    let h = Harness::new(
        ScriptedSynthesis::new(),
        ScriptedScorer::sequence([5.0, 3.0, 3.0, 9.0, 9.0]),
        RecordingRefiner::appending(),
    );

    let summary = h.run(config().with_max_stale(2), 5).await;

    assert_eq!(summary.attempts, 3);
    assert_eq!(summary.stop_reason, StopReason::Stagnated);
    assert_eq!(totals(&summary), vec![Some(5.0), Some(3.0), Some(3.0)]);
    assert!((summary.best.effective_total() - 5.0).abs() < 1e-9);
    assert_eq!(h.synthesis.submit_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_regression_guard_reseeds_from_best() {
    let h = Harness::new(
        ScriptedSynthesis::new(),
        ScriptedScorer::sequence([8.0, 6.0, 7.0]),
        RecordingRefiner::appending(),
    );
    let cfg = config()
        .with_max_stale(5)
        .with_multimodal_refinement(true)
        .with_reanchor_on_regression(true);

    let summary = h.run(cfg, 3).await;
    let requests = h.refiner.requests();
    let best_artifact = h.synthesis.artifact_for("t_b1_r1_v1");

    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].prompt.positive, "seed prompt");
    assert_eq!(requests[0].artifact.as_ref(), Some(&best_artifact));

    // attempt 2 rendered "seed prompt v2" and scored 6.0 < 8.0
    assert_eq!(summary.history[1].prompt().positive, "seed prompt v2");
    assert_eq!(requests[1].attempt, 3);
    assert_eq!(requests[1].prompt.positive, "seed prompt");
    assert_eq!(requests[1].artifact.as_ref(), Some(&best_artifact));
    assert!((requests[1].score.map(|s| s.total).unwrap() - 8.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_without_guard_refines_latest_prompt() {
    let h = Harness::new(
        ScriptedSynthesis::new(),
        ScriptedScorer::sequence([8.0, 6.0, 7.0]),
        RecordingRefiner::appending(),
    );
    let cfg = config()
        .with_max_stale(5)
        .with_multimodal_refinement(true)
        .with_reanchor_on_regression(false);

    h.run(cfg, 3).await;
    let requests = h.refiner.requests();

    assert_eq!(requests[1].prompt.positive, "seed prompt v2");
    assert_eq!(requests[1].artifact, Some(h.synthesis.artifact_for("t_b1_r2_v1")));
    assert!((requests[1].score.map(|s| s.total).unwrap() - 6.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_artifacts_withheld_unless_multimodal() {
    let h = Harness::new(
        ScriptedSynthesis::new(),
        ScriptedScorer::sequence([4.0, 5.0]),
        RecordingRefiner::appending(),
    );

    h.run(config(), 2).await;

    let requests = h.refiner.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].artifact.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_dispatches_sanitized_seed_without_refinement() {
    let mut refiner = MockRefinementOracle::new();
    refiner.expect_refine().times(0);
    let synthesis = Arc::new(ScriptedSynthesis::new());
    let oracles = Oracles::new(synthesis.clone(), Arc::new(ScriptedScorer::constant(5.0)), Arc::new(refiner));
    let controller = BranchController::new(
        Arc::new(config()),
        oracles,
        Arc::new(MemorySink::new()),
        CancellationToken::new(),
    );

    let summary = controller
        .run_branch(BranchId::new(1), PromptPair::new("neon $lab (draft) -- night", "blurry"), 1)
        .await;

    let jobs = synthesis.submitted();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].prompt.positive, "neon lab \u{2014} night");
    assert_eq!(jobs[0].prefix(), "t_b1_r1_v1");
    assert_eq!(summary.stop_reason, StopReason::AttemptsExhausted);
    assert!(summary.is_usable());
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempt_retries_base_prompt_without_refinement() {
    let h = Harness::new(
        ScriptedSynthesis::new().rejecting(1),
        ScriptedScorer::constant(5.0),
        RecordingRefiner::appending(),
    );

    let summary = h.run(config(), 2).await;

    assert!(h.refiner.requests().is_empty());
    let prompts: Vec<String> = h.synthesis.submitted().iter().map(|j| j.prompt.positive.clone()).collect();
    assert_eq!(prompts, vec!["seed prompt", "seed prompt"]);
    assert!(summary.history[0].artifact().is_none());
    assert!(summary.is_usable());
}

#[tokio::test(start_paused = true)]
async fn test_transient_dispatch_failures_are_retried() {
    let h = Harness::new(
        ScriptedSynthesis::new().failing_transiently(2),
        ScriptedScorer::constant(5.0),
        RecordingRefiner::appending(),
    );

    let summary = h.run(config().with_retry(3, Duration::from_secs(1)), 1).await;

    assert_eq!(h.synthesis.submit_count(), 3);
    assert!(summary.is_usable());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_dispatch_degrades_attempt() {
    let h = Harness::new(
        ScriptedSynthesis::new().failing_transiently(2),
        ScriptedScorer::constant(5.0),
        RecordingRefiner::appending(),
    );

    let summary = h.run(config().with_retry(2, Duration::from_secs(1)).with_max_stale(1), 3).await;

    assert_eq!(h.synthesis.submit_count(), 2);
    assert_eq!(summary.attempts, 1);
    assert_eq!(summary.stop_reason, StopReason::Stagnated);
    assert!(!summary.is_usable());
    assert!(h.scorer.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_discovery_timeout_leaves_placeholder() {
    let h = Harness::new(
        ScriptedSynthesis::new().never_delivers(),
        ScriptedScorer::constant(5.0),
        RecordingRefiner::appending(),
    );

    let summary = h.run(config().with_max_stale(5), 2).await;

    assert_eq!(summary.stop_reason, StopReason::AttemptsExhausted);
    assert!(!summary.is_usable());
    assert_eq!(summary.best.prompt(), &seed());
    assert_eq!(summary.best.score(), Some(&Score::ZERO));
    assert!(summary.history.iter().all(|c| c.artifact().is_none()));
    assert!(h.refiner.requests().is_empty());
    assert!(h.sink.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scoring_failure_yields_zero_score() {
    let h = Harness::new(ScriptedSynthesis::new(), ScriptedScorer::failing(), RecordingRefiner::appending());

    let summary = h.run(config(), 1).await;

    assert_eq!(summary.history[0].score(), Some(&Score::ZERO));
    assert!(summary.history[0].artifact().is_some());
    assert!(!summary.is_usable());
}

#[tokio::test(start_paused = true)]
async fn test_refinement_failure_keeps_prompt() {
    let h = Harness::new(
        ScriptedSynthesis::new(),
        ScriptedScorer::sequence([4.0, 5.0]),
        RecordingRefiner::failing(),
    );

    let summary = h.run(config(), 2).await;

    assert_eq!(h.refiner.requests().len(), 1);
    assert_eq!(summary.history[1].prompt().positive, "seed prompt");
}

#[tokio::test(start_paused = true)]
async fn test_target_score_stops_branch() {
    let h = Harness::new(
        ScriptedSynthesis::new(),
        ScriptedScorer::sequence([5.0, 7.5, 9.0]),
        RecordingRefiner::appending(),
    );

    let summary = h.run(config().with_target_score(7.0), 5).await;

    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.stop_reason, StopReason::TargetReached);
}

#[tokio::test(start_paused = true)]
async fn test_variants_share_prompt_and_pick_best() {
    let h = Harness::new(
        ScriptedSynthesis::new(),
        ScriptedScorer::constant(4.0).with_fragment("_v2", 9.0),
        RecordingRefiner::appending(),
    );

    let summary = h.run(config().with_variants_per_attempt(3), 1).await;

    let jobs = h.synthesis.submitted();
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j.prompt == jobs[0].prompt));
    assert_ne!(jobs[0].identity.seed, jobs[1].identity.seed);
    assert_eq!(summary.history.len(), 3);
    assert_eq!(summary.best.variant_index(), 2);
    assert_eq!(h.sink.records().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_sink_receives_only_scored_candidates() {
    let h = Harness::new(
        ScriptedSynthesis::new().undeliverable("_r2_"),
        ScriptedScorer::sequence([4.0, 5.0, 6.0]),
        RecordingRefiner::appending(),
    );

    h.run(config().with_max_stale(5), 3).await;

    let records = h.sink.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|(b, c)| *b == BranchId::new(1) && c.is_usable()));
}

#[tokio::test(start_paused = true)]
async fn test_failing_sink_does_not_stop_branch() {
    let h = Harness::new(
        ScriptedSynthesis::new(),
        ScriptedScorer::sequence([4.0, 5.0]),
        RecordingRefiner::appending(),
    );
    let controller = h.controller_with(config(), Arc::new(MemorySink::failing()), CancellationToken::new());

    let summary = controller.run_branch(BranchId::new(1), seed(), 2).await;

    assert_eq!(summary.attempts, 2);
    assert!((summary.best.effective_total() - 5.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_discovery() {
    let h = Harness::new(
        ScriptedSynthesis::new().never_delivers(),
        ScriptedScorer::constant(5.0),
        RecordingRefiner::appending(),
    );
    let cancel = CancellationToken::new();
    let controller = h.controller_with(
        config().with_discovery_timeout(Duration::from_secs(600)),
        h.sink.clone(),
        cancel.clone(),
    );

    let canceller = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        }
    });
    let summary = controller.run_branch(BranchId::new(1), seed(), 5).await;
    canceller.await.unwrap();

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.attempts, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_best_is_max_of_history(scores in prop::collection::vec(0u32..1000, 1..8)) {
        let totals: Vec<f64> = scores.iter().map(|s| f64::from(*s) / 100.0).collect();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let attempts = u32::try_from(totals.len()).unwrap();
        let summary = runtime.block_on(async {
            let h = Harness::new(
                ScriptedSynthesis::new(),
                ScriptedScorer::sequence(totals.clone()),
                RecordingRefiner::appending(),
            );
            h.run(config().with_max_stale(100), attempts).await
        });

        let max = totals.iter().copied().fold(0.0_f64, f64::max);
        prop_assert_eq!(summary.history.len(), totals.len());
        prop_assert!((summary.best.effective_total() - max).abs() < 1e-9);
        prop_assert!(summary.history.iter().all(|c| c.effective_total() <= summary.best.effective_total()));
        if max > 0.0 {
            let first = totals.iter().position(|t| (*t - max).abs() < 1e-9).unwrap();
            prop_assert_eq!(summary.best.round_index(), u32::try_from(first + 1).unwrap());
        } else {
            prop_assert!(!summary.is_usable());
        }
    }
}
