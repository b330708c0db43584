//! The agent loop: plan under a budget, act, repeat until a goal.

use std::marker::PhantomData;
use std::time::Duration;

use hrsw::Stopwatch;
use thiserror::Error;

use crate::planner::PlanError;
use crate::planner::RealTimePlanner;
use crate::space::Action;
use crate::space::ActionBundle;
use crate::space::Cost;
use crate::space::Domain;
use crate::space::Path;
use crate::space::Plan;
use crate::space::State;
use crate::termination::TerminationChecker;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),
    #[error("Action {action} can't be applied at {state}")]
    InvalidAction { state: String, action: String },
    #[error("The planner didn't move the agent from {state}")]
    NoProgress { state: String },
    #[error("No goal after {0} planning calls")]
    StepLimitExceeded(usize),
}

/// Asks a planner for actions, one budgeted call at a time.
#[derive(Debug)]
pub struct RtsAgent<P, St, A, C>
where
    P: RealTimePlanner<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    planner: P,
    _phantom: PhantomData<(St, A, C)>,
}

impl<P, St, A, C> RtsAgent<P, St, A, C>
where
    P: RealTimePlanner<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    pub fn new(planner: P) -> Self {
        Self {
            planner,
            _phantom: PhantomData,
        }
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }
    pub fn into_planner(self) -> P {
        self.planner
    }

    #[inline(always)]
    pub fn select_action<T>(&mut self, state: &St, checker: &mut T) -> Result<Plan<A, C>, PlanError>
    where
        T: TerminationChecker + ?Sized,
    {
        self.planner.select_action(state, checker)
    }

    /// Prepares for an unrelated run.
    pub fn reset(&mut self) {
        self.planner.reset()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpisodeConfig {
    /// Planning calls allowed before giving up.
    pub max_planning_calls: usize,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_planning_calls: 100_000,
        }
    }
}

/// What happened during one episode.
#[derive(Clone, Debug)]
pub struct ExperimentResult<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    pub expanded_nodes: u64,
    pub generated_nodes: u64,
    /// Time spent inside the planner.
    pub planning_time: Duration,
    /// The trajectory actually executed, even when the episode failed.
    pub path: Path<St, A, C>,
    pub planning_calls: usize,
    pub error: Option<AgentError>,
}

impl<St, A, C> ExperimentResult<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    pub fn actions(&self) -> &[A] {
        &self.path.actions
    }
    pub fn path_cost(&self) -> C {
        self.path.cost
    }
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn write_report<W: std::io::Write>(&self, mut out: W) -> std::io::Result<()> {
        use human_duration::human_duration;
        use thousands::Separable;

        match &self.error {
            None => writeln!(out, "- Result: Success")?,
            Some(e) => writeln!(out, "- Result: Failure ({e})")?,
        }
        writeln!(
            out,
            "- Expanded nodes: {}",
            self.expanded_nodes.separate_with_commas()
        )?;
        writeln!(
            out,
            "- Generated nodes: {}",
            self.generated_nodes.separate_with_commas()
        )?;
        writeln!(out, "- Planning time: {}", human_duration(&self.planning_time))?;
        writeln!(
            out,
            "- Planning calls: {}",
            self.planning_calls.separate_with_commas()
        )?;
        writeln!(out, "- Path cost: {}", self.path.cost)?;
        writeln!(out, "- Path: {}", self.path)?;
        Ok(())
    }
}

/// Applies a whole plan, recording it in `path`.
fn execute<D, St, A, C>(
    domain: &D,
    path: &mut Path<St, A, C>,
    state: &mut St,
    plan: &[ActionBundle<A, C>],
) -> Result<(), AgentError>
where
    D: Domain<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    for step in plan {
        let Some(next) = domain.apply(state, &step.action) else {
            return Err(AgentError::InvalidAction {
                state: format!("{state:?}"),
                action: format!("{:?}", step.action),
            });
        };
        path.append(step.action, next, step.cost);
        *state = next;
    }
    Ok(())
}

/// Drives `agent` from `start` until it reaches a goal, fails, or runs out of
/// planning calls.
///
/// The checker is re-armed before every planning call. Calls that run out of
/// budget before planning anything are retried and count against
/// [`EpisodeConfig::max_planning_calls`].
pub fn run_episode<D, P, T, St, A, C>(
    domain: &D,
    agent: &mut RtsAgent<P, St, A, C>,
    start: St,
    checker: &mut T,
    config: &EpisodeConfig,
) -> ExperimentResult<St, A, C>
where
    D: Domain<St, A, C>,
    P: RealTimePlanner<St, A, C>,
    T: TerminationChecker + ?Sized,
    St: State,
    A: Action,
    C: Cost,
{
    let mut path = Path::new_from_start(start);
    let mut state = start;
    let mut planning_time = Duration::ZERO;
    let mut planning_calls = 0;

    let error = loop {
        if domain.is_goal(&state) {
            break None;
        }
        if planning_calls >= config.max_planning_calls {
            break Some(AgentError::StepLimitExceeded(planning_calls));
        }

        checker.init();
        let mut stopwatch = Stopwatch::new_started();
        let planned = agent.select_action(&state, checker);
        stopwatch.stop();
        planning_time += stopwatch.elapsed();
        planning_calls += 1;

        let plan = match planned {
            Ok(plan) => plan,
            Err(PlanError::InsufficientBudget) => {
                log::debug!("Out of budget at {state:?}, planning again");
                continue;
            }
            Err(e) => break Some(AgentError::from(e)),
        };
        if plan.is_empty() {
            break Some(AgentError::NoProgress {
                state: format!("{state:?}"),
            });
        }
        log::trace!("Executing {} actions from {state:?}", plan.len());
        if let Err(e) = execute(domain, &mut path, &mut state, &plan) {
            break Some(e);
        }
    };

    match &error {
        None => log::debug!(
            "Reached {state:?} after {planning_calls} planning calls, cost {}",
            path.cost
        ),
        Some(e) => log::warn!("Episode failed at {state:?}: {e}"),
    }

    let stats = agent.planner().stats();
    ExperimentResult {
        expanded_nodes: stats.expanded_nodes,
        generated_nodes: stats.generated_nodes,
        planning_time,
        path,
        planning_calls,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use rand_chacha::ChaCha8Rng;
    use rand_chacha::rand_core::SeedableRng;

    use crate::algorithms::ara_star::AnytimeRepairingAStar;
    use crate::algorithms::lss_lrta_star::LssLrtaStar;
    use crate::problems::grid_world::GridAction;
    use crate::problems::grid_world::GridState;
    use crate::problems::grid_world::GridWorld;
    use crate::space::BackwardDomain;
    use crate::termination::ExpansionTerminationChecker;
    use crate::termination::PollTerminationChecker;
    use crate::termination::UnlimitedTerminationChecker;

    type Lss = LssLrtaStar<GridWorld, GridState, GridAction, u32>;
    type Ara = AnytimeRepairingAStar<GridWorld, GridState, GridAction, u32>;

    const OPEN_3X3: &str = indoc! {"
        S..
        ...
        ..G
    "};

    const MAZE: &str = indoc! {"
        ..........
        .###..###.
        .#......#.
        .#.####.#.
        ...#..#...
        .###..###.
        ..........
    "};

    // The way out of the box is above, the goal below.
    const TRAP: &str = indoc! {"
        .........
        .###.###.
        .#.....#.
        .#..S..#.
        .#.....#.
        .#######.
        .........
        ....G....
    "};

    fn world(map: &str) -> (GridWorld, GridState) {
        let world = GridWorld::try_from(map).unwrap();
        let start = world.start().unwrap();
        (world, start)
    }

    #[test]
    fn open_grid_in_one_call() {
        let (world, start) = world(OPEN_3X3);
        let mut agent = RtsAgent::new(Lss::new(world.clone()));
        let result = run_episode(
            &world,
            &mut agent,
            start,
            &mut UnlimitedTerminationChecker,
            &EpisodeConfig::default(),
        );

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.path_cost(), 4);
        assert_eq!(result.planning_calls, 1);
        assert!(world.valid_path(&result.path));
        assert!(world.is_goal(&result.path.end.unwrap()));
    }

    #[test]
    fn open_grid_step_by_step() {
        let (world, start) = world(OPEN_3X3);
        let mut agent = RtsAgent::new(Lss::new(world.clone()));
        let mut checker = ExpansionTerminationChecker::new(1);
        let result = run_episode(
            &world,
            &mut agent,
            start,
            &mut checker,
            &EpisodeConfig::default(),
        );

        assert!(result.is_success());
        assert_eq!(result.path_cost(), 4);
        assert_eq!(result.actions().len(), 4);
        assert_eq!(result.planning_calls, 4);
        assert!(world.valid_path(&result.path));

        let first = world.apply(&start, &result.actions()[0]).unwrap();
        assert!(world.heuristic(&first) < world.heuristic(&start));
    }

    #[test]
    fn anytime_planner_as_an_agent() {
        let (world, start) = world(OPEN_3X3);
        let mut agent = RtsAgent::new(Ara::new(world.clone()));
        let result = run_episode(
            &world,
            &mut agent,
            start,
            &mut UnlimitedTerminationChecker,
            &EpisodeConfig::default(),
        );

        assert!(result.is_success());
        assert_eq!(result.path_cost(), 4);
        assert_eq!(result.planning_calls, 1);
    }

    #[test]
    fn already_at_the_goal() {
        let (world, _) = world(OPEN_3X3);
        let goal = GridState::new(2, 2).unwrap();
        let mut agent = RtsAgent::new(Lss::new(world.clone()));
        let result = run_episode(
            &world,
            &mut agent,
            goal,
            &mut UnlimitedTerminationChecker,
            &EpisodeConfig::default(),
        );
        assert!(result.is_success());
        assert_eq!(result.planning_calls, 0);
        assert_eq!(result.path_cost(), 0);
    }

    #[test]
    fn unreachable_goal_aborts() {
        let (world, start) = world("S.#G");
        let mut agent = RtsAgent::new(Lss::new(world.clone()));
        let result = run_episode(
            &world,
            &mut agent,
            start,
            &mut UnlimitedTerminationChecker,
            &EpisodeConfig::default(),
        );
        assert_eq!(
            result.error,
            Some(AgentError::Plan(PlanError::GoalNotReachable))
        );
    }

    #[test]
    fn step_limit() {
        let (world, start) = world(OPEN_3X3);
        let mut agent = RtsAgent::new(Lss::new(world.clone()));
        let mut checker = ExpansionTerminationChecker::new(1);
        let config = EpisodeConfig {
            max_planning_calls: 2,
        };
        let result = run_episode(&world, &mut agent, start, &mut checker, &config);

        assert_eq!(result.error, Some(AgentError::StepLimitExceeded(2)));
        // Made it half-way
        assert_eq!(result.path_cost(), 2);
        assert!(world.valid_path(&result.path));
    }

    #[test]
    fn learning_that_uses_up_the_budget_is_retried() {
        let (world, start) = world(TRAP);
        let mut agent = RtsAgent::new(Lss::new(world.clone()));
        // Learning polls too, so some calls end before expanding anything
        let mut checker = PollTerminationChecker::new(6);
        let result = run_episode(
            &world,
            &mut agent,
            start,
            &mut checker,
            &EpisodeConfig::default(),
        );

        assert!(result.is_success(), "{:?}", result.error);
        assert!(world.valid_path(&result.path));
        assert!(result.path_cost() >= 18);
        assert!(agent.planner().stats().learning_pops > 0);
    }

    #[test]
    fn anytime_search_is_retried_until_it_finds_a_plan() {
        let (world, start) = world(TRAP);
        let mut agent = RtsAgent::new(Ara::new(world.clone()));
        let mut checker = PollTerminationChecker::new(3);
        let result = run_episode(
            &world,
            &mut agent,
            start,
            &mut checker,
            &EpisodeConfig::default(),
        );

        assert!(result.is_success(), "{:?}", result.error);
        assert!(result.planning_calls > 1);
        assert!(world.valid_path(&result.path));
        assert!(result.path_cost() >= 18);
    }

    #[test]
    fn no_budget_runs_into_the_step_limit() {
        let (world, start) = world(OPEN_3X3);
        let mut agent = RtsAgent::new(Lss::new(world.clone()));
        let mut checker = ExpansionTerminationChecker::new(0);
        let config = EpisodeConfig {
            max_planning_calls: 5,
        };
        let result = run_episode(&world, &mut agent, start, &mut checker, &config);

        assert_eq!(result.error, Some(AgentError::StepLimitExceeded(5)));
        assert_eq!(result.planning_calls, 5);
        assert!(result.actions().is_empty());
    }

    #[test]
    fn random_instances_reach_their_goals() {
        let base = GridWorld::try_from(MAZE).unwrap();

        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let Some(instance) = base.randomize(&mut rng, 1, 1) else {
                continue;
            };
            let start = instance.start().unwrap();

            let mut offline = Ara::with_inflation_factor(instance.clone(), 1.0);
            let Ok(optimal) = offline.solve(&start, &instance.goals()) else {
                continue;
            };

            let mut agent = RtsAgent::new(Lss::new(instance.clone()));
            let mut checker = ExpansionTerminationChecker::new(5);
            let result = run_episode(
                &instance,
                &mut agent,
                start,
                &mut checker,
                &EpisodeConfig::default(),
            );

            assert!(result.is_success(), "seed {seed}: {:?}", result.error);
            assert!(instance.valid_path(&result.path));
            assert!(result.path_cost() >= crate::space::plan_cost(&optimal));

            agent.reset();
            assert!(agent.planner().nodes().is_empty());
        }
    }
}
