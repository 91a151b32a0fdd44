//! Branch state
//!
//! [`BranchState`] is owned by exactly one branch controller. It keeps the
//! working prompt, the best candidate so far, the stagnation counter and
//! the append-only attempt history.

use crate::candidate::{ArtifactRef, Candidate};
use crate::prompt::PromptPair;
use crate::score::Score;
use crate::summary::BranchSummary;
use serde::{Deserialize, Serialize};

/// 1-based branch identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub u32);

impl BranchId {
    /// Create new branch id
    #[inline]
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for BranchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a branch stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Attempt budget used up
    AttemptsExhausted,
    /// Too many consecutive non-improving attempts
    Stagnated,
    /// Best score reached the configured target
    TargetReached,
    /// Run was cancelled
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AttemptsExhausted => "attempts exhausted",
            Self::Stagnated => "stagnated",
            Self::TargetReached => "target reached",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What the previous attempt left behind for the next one
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    /// Prompt dispatched by the attempt
    pub prompt: PromptPair,
    /// Artifact of the attempt's best variant
    pub artifact: Option<ArtifactRef>,
    /// Score of the attempt's best variant
    pub score: Option<Score>,
}

impl AttemptOutcome {
    /// Neither an artifact nor a score came back
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifact.is_none() && self.score.is_none()
    }
}

/// Accept/stagnate verdict for one attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttemptDecision {
    /// New best accepted
    Improved {
        /// Previous best total
        previous: f64,
        /// New best total
        current: f64,
    },
    /// No improvement
    Stale {
        /// Consecutive non-improving attempts, including this one
        stale_count: u32,
    },
}

/// Mutable state of one search trajectory
#[derive(Debug, Clone)]
pub struct BranchState {
    branch_id: BranchId,
    base_prompt: PromptPair,
    best: Candidate,
    stale_count: u32,
    history: Vec<Candidate>,
    attempts: u32,
    last: Option<AttemptOutcome>,
}

impl BranchState {
    /// Fresh state seeded with a prompt
    #[must_use]
    pub fn new(branch_id: BranchId, seed: PromptPair) -> Self {
        Self {
            branch_id,
            best: Candidate::placeholder(seed.clone()),
            base_prompt: seed,
            stale_count: 0,
            history: Vec::new(),
            attempts: 0,
            last: None,
        }
    }

    /// Branch identifier
    #[inline]
    #[must_use]
    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    /// Working prompt; seed for the next refinement
    #[inline]
    #[must_use]
    pub fn base_prompt(&self) -> &PromptPair {
        &self.base_prompt
    }

    /// Best candidate so far
    #[inline]
    #[must_use]
    pub fn best(&self) -> &Candidate {
        &self.best
    }

    /// Consecutive non-improving attempts
    #[inline]
    #[must_use]
    pub fn stale_count(&self) -> u32 {
        self.stale_count
    }

    /// Every variant in attempt order
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[Candidate] {
        &self.history
    }

    /// Attempts concluded so far
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Outcome of the most recent attempt
    #[inline]
    #[must_use]
    pub fn last_outcome(&self) -> Option<&AttemptOutcome> {
        self.last.as_ref()
    }

    /// Previous attempt regressed below the best so far
    #[must_use]
    pub fn last_regressed(&self) -> bool {
        match self.last.as_ref().and_then(|o| o.score.as_ref()) {
            Some(score) => self.best.score().is_some_and(|best| best.beats(score)),
            None => false,
        }
    }

    /// Point the working prompt back at the best candidate
    pub fn reanchor(&mut self) {
        self.base_prompt = self.best.prompt().clone();
    }

    /// Fold one attempt's variants into the state
    ///
    /// All variants are appended to history. The attempt's best variant
    /// (earliest on ties) is compared against the branch best; a strict
    /// improvement replaces it and resets the stale counter, anything else
    /// increments the counter. When any variant produced an artifact the
    /// dispatched prompt becomes the new working prompt.
    pub fn conclude_attempt(&mut self, prompt: PromptPair, variants: Vec<Candidate>) -> AttemptDecision {
        self.attempts += 1;

        let mut attempt_best: Option<&Candidate> = None;
        for candidate in &variants {
            if attempt_best.map_or(true, |b| candidate.improves_on(b)) {
                attempt_best = Some(candidate);
            }
        }

        let outcome = AttemptOutcome {
            prompt: prompt.clone(),
            artifact: attempt_best.and_then(|c| c.artifact().cloned()),
            score: attempt_best.and_then(|c| c.score().copied()),
        };

        let decision = match attempt_best {
            Some(candidate) if candidate.is_usable() && candidate.improves_on(&self.best) => {
                let previous = self.best.effective_total();
                self.best = candidate.clone();
                self.stale_count = 0;
                AttemptDecision::Improved {
                    previous,
                    current: self.best.effective_total(),
                }
            }
            _ => {
                self.stale_count += 1;
                AttemptDecision::Stale {
                    stale_count: self.stale_count,
                }
            }
        };

        if variants.iter().any(|c| c.artifact().is_some()) {
            self.base_prompt = prompt;
        }
        self.history.extend(variants);
        self.last = Some(outcome);
        decision
    }

    /// Finalize into a summary
    #[must_use]
    pub fn finish(self, stop_reason: StopReason) -> BranchSummary {
        BranchSummary {
            branch_id: self.branch_id,
            best: self.best,
            history: self.history,
            attempts: self.attempts,
            stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::JobIdentity;
    use crate::score::RawScore;

    fn seed() -> PromptPair {
        PromptPair::new("seed", "neg")
    }

    fn scored(prompt: &str, round: u32, total_aesthetic: f64) -> Candidate {
        Candidate::dispatched(PromptPair::new(prompt, "neg"), round, 1, JobIdentity::new(format!("j{round}"), 0))
            .with_artifact(ArtifactRef::new(format!("/out/j{round}.png")))
            .scored(Score::combine(RawScore::new(0.0, total_aesthetic * 2.0)))
    }

    fn failed(prompt: &str, round: u32) -> Candidate {
        Candidate::dispatched(PromptPair::new(prompt, "neg"), round, 1, JobIdentity::new(format!("j{round}"), 0))
    }

    #[test]
    fn new_state_holds_placeholder() {
        let state = BranchState::new(BranchId::new(1), seed());
        assert_eq!(state.best().prompt(), &seed());
        assert_eq!(state.stale_count(), 0);
        assert!(state.history().is_empty());
        assert!(state.last_outcome().is_none());
    }

    #[test]
    fn improvement_resets_stale_count() {
        let mut state = BranchState::new(BranchId::new(1), seed());
        let p = PromptPair::new("a", "neg");
        state.conclude_attempt(p.clone(), vec![failed("a", 1)]);
        assert_eq!(state.stale_count(), 1);

        let decision = state.conclude_attempt(p, vec![scored("a", 2, 5.0)]);
        assert!(matches!(decision, AttemptDecision::Improved { .. }));
        assert_eq!(state.stale_count(), 0);
        assert!((state.best().effective_total() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn equal_score_is_stale() {
        let mut state = BranchState::new(BranchId::new(1), seed());
        state.conclude_attempt(PromptPair::new("a", "neg"), vec![scored("a", 1, 5.0)]);
        let decision = state.conclude_attempt(PromptPair::new("b", "neg"), vec![scored("b", 2, 5.0)]);
        assert_eq!(decision, AttemptDecision::Stale { stale_count: 1 });
        assert_eq!(state.best().prompt().positive, "a");
    }

    #[test]
    fn base_prompt_follows_latest_synthesized_prompt() {
        let mut state = BranchState::new(BranchId::new(1), seed());
        state.conclude_attempt(PromptPair::new("a", "neg"), vec![scored("a", 1, 5.0)]);
        state.conclude_attempt(PromptPair::new("b", "neg"), vec![scored("b", 2, 3.0)]);
        assert_eq!(state.base_prompt().positive, "b");
        assert_eq!(state.best().prompt().positive, "a");
        assert!(state.last_regressed());

        state.reanchor();
        assert_eq!(state.base_prompt().positive, "a");
    }

    #[test]
    fn failed_attempt_keeps_base_prompt() {
        let mut state = BranchState::new(BranchId::new(1), seed());
        state.conclude_attempt(PromptPair::new("x", "neg"), vec![failed("x", 1)]);
        assert_eq!(state.base_prompt(), &seed());
        assert!(state.last_outcome().is_some_and(AttemptOutcome::is_empty));
        assert!(!state.last_regressed());
    }

    #[test]
    fn attempt_best_is_earliest_on_ties() {
        let mut state = BranchState::new(BranchId::new(1), seed());
        let p = PromptPair::new("a", "neg");
        let first = scored("a", 1, 4.0);
        let second = Candidate::dispatched(p.clone(), 1, 2, JobIdentity::new("j1v2", 1))
            .with_artifact(ArtifactRef::new("/out/j1v2.png"))
            .scored(Score::combine(RawScore::new(0.0, 8.0)));
        state.conclude_attempt(p, vec![first, second]);
        assert_eq!(state.best().variant_index(), 1);
        assert_eq!(state.history().len(), 2);
    }

    #[test]
    fn finish_carries_history() {
        let mut state = BranchState::new(BranchId::new(3), seed());
        state.conclude_attempt(PromptPair::new("a", "neg"), vec![scored("a", 1, 2.0)]);
        let summary = state.finish(StopReason::AttemptsExhausted);
        assert_eq!(summary.branch_id, BranchId::new(3));
        assert_eq!(summary.history.len(), 1);
        assert_eq!(summary.attempts, 1);
        assert!(summary.is_usable());
    }
}
