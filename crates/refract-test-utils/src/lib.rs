//! Testing utilities for the refract workspace
//!
//! Scripted oracles and an in-memory sink. Everything records what it was
//! asked so tests can assert on call patterns.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use refract_candidate::{ArtifactRef, BranchId, Candidate, PromptPair, RawScore, ScoreSink, SinkError};
use refract_oracle::{
    OracleError, RefinementOracle, RefinementRequest, ScoreMode, ScoringOracle, SynthesisBackend, SynthesisJob,
};
use std::collections::VecDeque;
use std::path::PathBuf;

/// Raw components that combine to exactly `total` (for totals with two decimals)
pub fn raw_for_total(total: f64) -> RawScore {
    RawScore::new(0.0, total * 2.0)
}

#[derive(Debug, Default)]
struct SynthesisLog {
    submitted: Vec<SynthesisJob>,
    clears: usize,
    transient_failures: u32,
    rejections: u32,
}

/// Synthesis backend that "renders" to `<root>/<prefix>.png` without touching disk
#[derive(Debug)]
pub struct ScriptedSynthesis {
    root: PathBuf,
    never_deliver: bool,
    undeliverable: Vec<String>,
    log: Mutex<SynthesisLog>,
}

impl Default for ScriptedSynthesis {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSynthesis {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/render"),
            never_deliver: false,
            undeliverable: Vec::new(),
            log: Mutex::new(SynthesisLog::default()),
        }
    }

    /// Accept jobs but never produce artifacts
    #[must_use]
    pub fn never_delivers(mut self) -> Self {
        self.never_deliver = true;
        self
    }

    /// Never produce artifacts for prefixes containing `fragment`
    #[must_use]
    pub fn undeliverable(mut self, fragment: impl Into<String>) -> Self {
        self.undeliverable.push(fragment.into());
        self
    }

    /// Fail the next `n` submissions with a retryable 503
    #[must_use]
    pub fn failing_transiently(self, n: u32) -> Self {
        self.log.lock().transient_failures = n;
        self
    }

    /// Reject the next `n` submissions with a non-retryable 400
    #[must_use]
    pub fn rejecting(self, n: u32) -> Self {
        self.log.lock().rejections = n;
        self
    }

    pub fn artifact_for(&self, prefix: &str) -> ArtifactRef {
        ArtifactRef::new(self.root.join(format!("{prefix}.png")))
    }

    /// Every submission attempt, in order (retries included)
    pub fn submitted(&self) -> Vec<SynthesisJob> {
        self.log.lock().submitted.clone()
    }

    pub fn submitted_prefixes(&self) -> Vec<String> {
        self.log.lock().submitted.iter().map(|j| j.prefix().to_string()).collect()
    }

    pub fn submit_count(&self) -> usize {
        self.log.lock().submitted.len()
    }

    pub fn clear_count(&self) -> usize {
        self.log.lock().clears
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedSynthesis {
    async fn submit(&self, job: &SynthesisJob) -> Result<(), OracleError> {
        let mut log = self.log.lock();
        log.submitted.push(job.clone());
        if log.rejections > 0 {
            log.rejections -= 1;
            return Err(OracleError::rejected(400, "scripted rejection"));
        }
        if log.transient_failures > 0 {
            log.transient_failures -= 1;
            return Err(OracleError::rejected(503, "scripted outage"));
        }
        Ok(())
    }

    async fn await_artifact(&self, job: &SynthesisJob) -> Result<ArtifactRef, OracleError> {
        let blocked = self.never_deliver || self.undeliverable.iter().any(|f| job.prefix().contains(f.as_str()));
        if blocked {
            std::future::pending::<()>().await;
        }
        Ok(self.artifact_for(job.prefix()))
    }

    async fn clear_queue(&self) -> Result<(), OracleError> {
        self.log.lock().clears += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ScorerScript {
    totals: VecDeque<f64>,
    last: f64,
    calls: Vec<(ArtifactRef, String)>,
}

/// Scoring oracle that replays totals
///
/// Artifacts whose path contains a registered fragment get that fragment's
/// total; everything else pops the next total from the sequence, repeating
/// the last one once the sequence runs dry.
#[derive(Debug, Default)]
pub struct ScriptedScorer {
    by_fragment: Vec<(String, f64)>,
    failing: bool,
    script: Mutex<ScorerScript>,
}

impl ScriptedScorer {
    pub fn sequence(totals: impl IntoIterator<Item = f64>) -> Self {
        Self {
            script: Mutex::new(ScorerScript {
                totals: totals.into_iter().collect(),
                ..ScorerScript::default()
            }),
            ..Self::default()
        }
    }

    pub fn constant(total: f64) -> Self {
        Self::sequence([total])
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_fragment(mut self, fragment: impl Into<String>, total: f64) -> Self {
        self.by_fragment.push((fragment.into(), total));
        self
    }

    pub fn calls(&self) -> Vec<(ArtifactRef, String)> {
        self.script.lock().calls.clone()
    }
}

#[async_trait]
impl ScoringOracle for ScriptedScorer {
    async fn score(&self, artifact: &ArtifactRef, prompt: &str, _mode: ScoreMode) -> Result<RawScore, OracleError> {
        let mut script = self.script.lock();
        script.calls.push((artifact.clone(), prompt.to_string()));
        if self.failing {
            return Err(OracleError::Malformed("scripted scorer failure".into()));
        }

        let path = artifact.path().to_string_lossy();
        if let Some((_, total)) = self.by_fragment.iter().find(|(f, _)| path.contains(f.as_str())) {
            return Ok(raw_for_total(*total));
        }
        let total = match script.totals.pop_front() {
            Some(t) => {
                script.last = t;
                t
            }
            None => script.last,
        };
        Ok(raw_for_total(total))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefineBehavior {
    Append,
    Silent,
    Failing,
}

/// Refinement oracle that records every request
#[derive(Debug)]
pub struct RecordingRefiner {
    behavior: RefineBehavior,
    requests: Mutex<Vec<RefinementRequest>>,
}

impl RecordingRefiner {
    /// Suggest `"<positive> v<attempt>"`, keeping the negative prompt
    pub fn appending() -> Self {
        Self::with_behavior(RefineBehavior::Append)
    }

    /// Never suggest anything
    pub fn silent() -> Self {
        Self::with_behavior(RefineBehavior::Silent)
    }

    /// Always fail
    pub fn failing() -> Self {
        Self::with_behavior(RefineBehavior::Failing)
    }

    fn with_behavior(behavior: RefineBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RefinementRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl RefinementOracle for RecordingRefiner {
    async fn refine(&self, request: &RefinementRequest) -> Result<Option<PromptPair>, OracleError> {
        self.requests.lock().push(request.clone());
        match self.behavior {
            RefineBehavior::Append => Ok(Some(PromptPair::new(
                format!("{} v{}", request.prompt.positive, request.attempt),
                request.prompt.negative.clone(),
            ))),
            RefineBehavior::Silent => Ok(None),
            RefineBehavior::Failing => Err(OracleError::Malformed("scripted refiner failure".into())),
        }
    }
}

/// Score sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    failing: bool,
    records: Mutex<Vec<(BranchId, Candidate)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every append fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<(BranchId, Candidate)> {
        self.records.lock().clone()
    }
}

impl ScoreSink for MemorySink {
    fn record(&self, branch: BranchId, candidate: &Candidate) -> Result<(), SinkError> {
        if self.failing {
            return Err(SinkError::Encode("scripted sink failure".into()));
        }
        self.records.lock().push((branch, candidate.clone()));
        Ok(())
    }
}
