//! Pipeline state machine and termination policy.
//!
//! ```text
//! RESEARCH -> GENERATE -> CRITIQUE -> ACCEPT
//!                            ^   |
//!                            |   v
//!                          OPTIMIZE
//! ```
//!
//! Any non-terminal state moves to ABORT on failure or cancellation.

use crate::models::{Finding, RunOutcome, Stage};
use std::collections::HashMap;
use std::fmt;

/// Pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Choosing a framework.
    Research,
    /// Drafting the first prompt.
    Generate,
    /// Scoring the current draft.
    Critique,
    /// Revising the current draft.
    Optimize,
    /// Terminal: a draft was accepted.
    Accept,
    /// Terminal: the run failed or was cancelled.
    Abort,
}

impl PipelineState {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Accept | Self::Abort)
    }

    /// The stage a non-terminal state runs.
    #[must_use]
    pub const fn stage(self) -> Option<Stage> {
        match self {
            Self::Research => Some(Stage::Research),
            Self::Generate => Some(Stage::Generate),
            Self::Critique => Some(Stage::Critique),
            Self::Optimize => Some(Stage::Optimize),
            Self::Accept | Self::Abort => None,
        }
    }

    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Research => "RESEARCH",
            Self::Generate => "GENERATE",
            Self::Critique => "CRITIQUE",
            Self::Optimize => "OPTIMIZE",
            Self::Accept => "ACCEPT",
            Self::Abort => "ABORT",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that move the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// The stage produced its output.
    Completed,
    /// The policy accepted the scored draft.
    Accept,
    /// The policy asked for another revision.
    Refine,
    /// The stage failed.
    Failed,
    /// The run was cancelled.
    Cancelled,
}

/// Every legal transition.
pub const TRANSITIONS: &[(PipelineState, Event, PipelineState)] = {
    use Event::{Accept, Cancelled, Completed, Failed, Refine};
    use PipelineState as S;
    &[
        (S::Research, Completed, S::Generate),
        (S::Research, Failed, S::Abort),
        (S::Research, Cancelled, S::Abort),
        (S::Generate, Completed, S::Critique),
        (S::Generate, Failed, S::Abort),
        (S::Generate, Cancelled, S::Abort),
        (S::Critique, Accept, S::Accept),
        (S::Critique, Refine, S::Optimize),
        (S::Critique, Failed, S::Abort),
        (S::Critique, Cancelled, S::Abort),
        (S::Optimize, Completed, S::Critique),
        (S::Optimize, Failed, S::Abort),
        (S::Optimize, Cancelled, S::Abort),
    ]
};

/// Looks up the state an event leads to.
#[must_use]
pub fn transition(from: PipelineState, event: Event) -> Option<PipelineState> {
    TRANSITIONS
        .iter()
        .find(|(state, ev, _)| *state == from && *ev == event)
        .map(|(_, _, to)| *to)
}

/// Tracks the current state and the path taken.
#[derive(Debug, Clone)]
pub struct Machine {
    state: PipelineState,
    trail: Vec<PipelineState>,
}

impl Machine {
    /// Starts at RESEARCH.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: PipelineState::Research,
            trail: vec![PipelineState::Research],
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// States visited, in order.
    #[must_use]
    pub fn trail(&self) -> &[PipelineState] {
        &self.trail
    }

    /// Applies an event. An event with no transition from the current state
    /// aborts the machine.
    pub fn fire(&mut self, event: Event) -> PipelineState {
        let next = transition(self.state, event).unwrap_or_else(|| {
            tracing::error!(state = %self.state, ?event, "No transition for event, aborting");
            PipelineState::Abort
        });
        tracing::debug!(from = %self.state, to = %next, ?event, "Pipeline transition");
        self.state = next;
        self.trail.push(next);
        next
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

/// What to do with a scored draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The score cleared the threshold.
    Accept,
    /// A high-severity finding stayed unaddressed too long.
    EarlyStop,
    /// The iteration cap was reached.
    BudgetExhausted,
    /// Revise and score again.
    Refine,
}

impl Decision {
    /// The run outcome for terminal decisions.
    #[must_use]
    pub const fn outcome(self) -> Option<RunOutcome> {
        match self {
            Self::Accept => Some(RunOutcome::Accepted),
            Self::EarlyStop => Some(RunOutcome::EarlyStopped),
            Self::BudgetExhausted => Some(RunOutcome::ExhaustedBudget),
            Self::Refine => None,
        }
    }
}

/// When to stop refining.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminationPolicy {
    /// Score at or above which a draft is accepted.
    pub threshold: f64,
    /// Cap on critiques per run (at least 1).
    pub max_iterations: u32,
    /// Consecutive optimizations a high-severity finding may stay
    /// unaddressed before the run stops early.
    pub stagnation_limit: u32,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            threshold: 80.0,
            max_iterations: 3,
            stagnation_limit: 2,
        }
    }
}

impl TerminationPolicy {
    /// Decides what follows the critique of draft `iteration`.
    ///
    /// Precedence: threshold, then early stop, then the cap. With cap `C`
    /// a run scores at most `C` drafts and optimizes at most `C - 1` times.
    #[must_use]
    pub fn decide(&self, score: f64, iteration: u32, stalled: bool) -> Decision {
        if score >= self.threshold {
            Decision::Accept
        } else if stalled {
            Decision::EarlyStop
        } else if iteration >= self.max_iterations.max(1) {
            Decision::BudgetExhausted
        } else {
            Decision::Refine
        }
    }
}

/// Counts, per finding target, how many consecutive optimizations left a
/// high-severity finding unaddressed.
#[derive(Debug, Clone)]
pub struct StagnationTracker {
    limit: u32,
    streaks: HashMap<String, u32>,
}

impl StagnationTracker {
    /// Creates a tracker that stalls after `limit` consecutive misses.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            streaks: HashMap::new(),
        }
    }

    /// Records the findings one optimization left unaddressed.
    ///
    /// Targets missing from `unaddressed` reset their streak.
    pub fn record(&mut self, unaddressed: &[Finding]) {
        let keys: Vec<String> = unaddressed
            .iter()
            .filter(|f| f.is_high())
            .map(Finding::target_key)
            .collect();
        self.streaks.retain(|key, _| keys.contains(key));
        for key in keys {
            let streak = self.streaks.entry(key).or_insert(0);
            *streak = streak.saturating_add(1);
        }
    }

    /// Returns true once some target has missed `limit` times in a row.
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.streaks.values().any(|n| *n >= self.limit)
    }

    /// Targets that have stalled.
    #[must_use]
    pub fn stalled_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self
            .streaks
            .iter()
            .filter(|(_, n)| **n >= self.limit)
            .map(|(k, _)| k.as_str())
            .collect();
        targets.sort_unstable();
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use test_case::test_case;

    fn high(section: &str) -> Finding {
        Finding::new(Severity::High, Some(section), "fix")
    }

    #[test]
    fn test_every_active_state_can_fail_and_cancel() {
        for state in [
            PipelineState::Research,
            PipelineState::Generate,
            PipelineState::Critique,
            PipelineState::Optimize,
        ] {
            assert_eq!(transition(state, Event::Failed), Some(PipelineState::Abort));
            assert_eq!(transition(state, Event::Cancelled), Some(PipelineState::Abort));
            assert!(state.stage().is_some());
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for (from, _, _) in TRANSITIONS {
            assert!(!from.is_terminal());
        }
    }

    #[test]
    fn test_happy_path() {
        let mut machine = Machine::new();
        machine.fire(Event::Completed);
        machine.fire(Event::Completed);
        machine.fire(Event::Refine);
        machine.fire(Event::Completed);
        assert_eq!(machine.fire(Event::Accept), PipelineState::Accept);
        assert_eq!(
            machine.trail(),
            [
                PipelineState::Research,
                PipelineState::Generate,
                PipelineState::Critique,
                PipelineState::Optimize,
                PipelineState::Critique,
                PipelineState::Accept,
            ]
        );
    }

    #[test]
    fn test_illegal_event_aborts() {
        let mut machine = Machine::new();
        assert_eq!(machine.fire(Event::Accept), PipelineState::Abort);
        assert!(machine.state().is_terminal());
    }

    #[test_case(85.0, 1, false => Decision::Accept ; "threshold met")]
    #[test_case(80.0, 3, true => Decision::Accept ; "threshold beats early stop and cap")]
    #[test_case(60.0, 3, true => Decision::EarlyStop ; "early stop beats cap")]
    #[test_case(60.0, 3, false => Decision::BudgetExhausted ; "cap reached")]
    #[test_case(60.0, 2, false => Decision::Refine ; "refine below cap")]
    fn test_decide(score: f64, iteration: u32, stalled: bool) -> Decision {
        TerminationPolicy::default().decide(score, iteration, stalled)
    }

    #[test]
    fn test_cap_of_one_never_refines() {
        let policy = TerminationPolicy {
            max_iterations: 1,
            ..TerminationPolicy::default()
        };
        assert_eq!(policy.decide(10.0, 1, false), Decision::BudgetExhausted);
        let zero = TerminationPolicy {
            max_iterations: 0,
            ..TerminationPolicy::default()
        };
        assert_eq!(zero.decide(10.0, 1, false), Decision::BudgetExhausted);
    }

    #[test]
    fn test_stagnation_needs_consecutive_misses() {
        let mut tracker = StagnationTracker::new(2);
        tracker.record(&[high("Answer")]);
        assert!(!tracker.is_stalled());
        tracker.record(&[high("Situation")]);
        assert!(!tracker.is_stalled());
        tracker.record(&[high("situation"), high("Answer")]);
        assert!(tracker.is_stalled());
        assert_eq!(tracker.stalled_targets(), ["situation"]);
    }

    #[test]
    fn test_stagnation_ignores_lower_severity() {
        let mut tracker = StagnationTracker::new(1);
        tracker.record(&[Finding::new(Severity::Medium, Some("Answer"), "x")]);
        assert!(!tracker.is_stalled());
    }

    #[test]
    fn test_decision_outcomes() {
        assert_eq!(Decision::Accept.outcome(), Some(RunOutcome::Accepted));
        assert_eq!(Decision::Refine.outcome(), None);
    }
}
