use std::time::Duration;

use thiserror::Error;

use crate::space::Action;
use crate::space::Cost;
use crate::space::Plan;
use crate::space::State;
use crate::termination::TerminationChecker;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The open list ran dry before reaching a goal.
    #[error("goal is not reachable from the explored space")]
    GoalNotReachable,
    /// The budget expired before the planner had anything to commit to.
    #[error("budget expired before a single expansion completed")]
    InsufficientBudget,
    /// The caller resumed from somewhere other than the last plan's target.
    #[error("expected to continue from {expected} but got {actual}")]
    InconsistentState { expected: String, actual: String },
}

/// What to do when the caller doesn't continue from the last plan's target.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, derive_more::Display)]
pub enum ContinuationPolicy {
    /// Log it and trust the caller.
    #[default]
    #[display("warn")]
    Warn,
    /// Fail with [`PlanError::InconsistentState`].
    #[display("reject")]
    Reject,
}

/// Work counters accumulated since the last reset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlannerStats {
    pub expanded_nodes: u64,
    pub generated_nodes: u64,
    /// Nodes popped while learning heuristics.
    pub learning_pops: u64,
    /// Nodes popped while searching forward (or backward).
    pub expansion_pops: u64,
    pub learning_time: Duration,
    pub expansion_time: Duration,
}

impl PlannerStats {
    pub fn write_stats<W: std::io::Write>(&self, mut out: W) -> std::io::Result<()> {
        use human_duration::human_duration;
        use thousands::Separable;

        writeln!(
            out,
            "  - Expanded nodes: {}",
            self.expanded_nodes.separate_with_commas()
        )?;
        writeln!(
            out,
            "  - Generated nodes: {}",
            self.generated_nodes.separate_with_commas()
        )?;
        writeln!(
            out,
            "  - Learning: {} pops in {}",
            self.learning_pops.separate_with_commas(),
            human_duration(&self.learning_time)
        )?;
        writeln!(
            out,
            "  - Expansion: {} pops in {}",
            self.expansion_pops.separate_with_commas(),
            human_duration(&self.expansion_time)
        )?;
        Ok(())
    }
}

/// A planner that commits to actions under a budget.
pub trait RealTimePlanner<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    /// Plans from `state` until `checker` fires or a goal is found.
    ///
    /// An empty plan means `state` is a goal already.
    fn select_action<T>(&mut self, state: &St, checker: &mut T) -> Result<Plan<A, C>, PlanError>
    where
        T: TerminationChecker + ?Sized;

    /// Forgets everything learned, ready for an unrelated run.
    fn reset(&mut self);

    fn stats(&self) -> &PlannerStats;
}
