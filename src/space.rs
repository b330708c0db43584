use std::fmt::Debug;
use std::hash::Hash;

pub use crate::cost::Cost;

pub trait Action: Copy + Clone + Debug + PartialEq + Eq {}
pub trait State: Copy + Clone + Debug + PartialEq + Eq + Hash {}

/// A transition out of (or into, when generated backwards) a state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Successor<St, A, C> {
    pub state: St,
    pub action: A,
    pub cost: C,
}

impl<St, A, C> Successor<St, A, C> {
    #[inline(always)]
    pub fn new(state: St, action: A, cost: C) -> Self {
        Self {
            state,
            action,
            cost,
        }
    }
}

/// A planned action together with what it costs to execute it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ActionBundle<A, C> {
    pub action: A,
    pub cost: C,
}

impl<A, C> ActionBundle<A, C> {
    #[inline(always)]
    pub fn new(action: A, cost: C) -> Self {
        Self { action, cost }
    }
}

/// The sequence a planner commits to.
pub type Plan<A, C> = Vec<ActionBundle<A, C>>;

/// A black-box search domain.
///
/// Planners only ever see a domain through this trait, they are generic over
/// it and never over concrete worlds.
pub trait Domain<St, A, C>: Debug
where
    St: State,
    A: Action,
    C: Cost,
{
    /// Expands a State
    fn successors(&self, s: &St) -> Vec<Successor<St, A, C>>;

    /// Estimated cost-to-go.
    ///
    /// Must be non-negative. Admissibility is needed for optimality claims
    /// and consistency for the learning rules to only ever raise estimates.
    fn heuristic(&self, s: &St) -> C;

    fn is_goal(&self, s: &St) -> bool;

    /// Executes an action, if it's applicable.
    fn apply(&self, s: &St, a: &A) -> Option<St>;

    fn valid_path(&self, p: &Path<St, A, C>) -> bool {
        match (p.start, p.end) {
            (Some(start), Some(end)) => {
                let mut state: St = start;
                for a in &p.actions {
                    match self.apply(&state, a) {
                        Some(new_state) => state = new_state,
                        None => return false,
                    }
                }
                end == state
            }
            (None, None) => p.is_empty(),
            _ => false,
        }
    }
}

/// Domains that can also be searched backwards, from the goals.
pub trait BackwardDomain<St, A, C>: Domain<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    /// States that reach `s` through one action.
    ///
    /// `Successor::state` is the predecessor, and `Successor::action` is the
    /// forward action taking it into `s`.
    fn predecessors(&self, s: &St) -> Vec<Successor<St, A, C>>;

    /// Estimated cost between two arbitrary states.
    fn heuristic_between(&self, s: &St, target: &St) -> C;

    /// All the goal states.
    fn goals(&self) -> Vec<St>;
}

/// An executed trajectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path<S, A, C>
where
    S: State,
    A: Action,
    C: Cost,
{
    pub start: Option<S>,
    pub end: Option<S>,
    pub cost: C,
    pub actions: Vec<A>,
}

impl<S, A, C> Path<S, A, C>
where
    S: State,
    A: Action,
    C: Cost,
{
    #[inline(always)]
    pub fn new_from_start(start: S) -> Self {
        Self {
            start: Some(start),
            end: Some(start),
            cost: C::zero(),
            actions: vec![],
        }
    }

    #[inline(always)]
    pub fn empty() -> Self {
        Self {
            start: None,
            end: None,
            cost: C::zero(),
            actions: vec![],
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Runs sanity checks
    #[inline(always)]
    pub fn seems_valid(&self) -> bool {
        self.start.is_some() == self.end.is_some() && self.cost.valid()
    }

    /// Records an executed action that led to `s`.
    #[inline(always)]
    pub fn append(&mut self, a: A, s: S, c: C) {
        self.actions.push(a);
        self.end = Some(s);
        self.cost = self.cost.saturating_add(&c);
    }
}

impl<S, A, C> std::fmt::Display for Path<S, A, C>
where
    S: State,
    A: Action,
    C: Cost,
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match (self.start, self.end) {
            (Some(start), Some(end)) => {
                write!(
                    f,
                    "Path({}, {:?}:{:?}:{:?})",
                    self.cost,
                    start,
                    self.actions.iter().take(20).collect::<Vec<_>>(),
                    end
                )
            }
            (None, None) => write!(f, "Path()"),
            _ => unreachable!("Path::start and Path::end should both be Some or None"),
        }
    }
}

/// Sums the costs of a plan.
pub fn plan_cost<A, C: Cost>(plan: &[ActionBundle<A, C>]) -> C {
    plan.iter()
        .fold(C::zero(), |total, step| total.saturating_add(&step.cost))
}
