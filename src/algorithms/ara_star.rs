//! Anytime Repairing A* (Likhachev, Gordon & Thrun, 2003).
//!
//! Searches backwards, from the goals towards the agent, with an inflated
//! heuristic. Each [`AnytimeRepairingAStar::update`] lowers the inflation and
//! the following [`AnytimeRepairingAStar::improve_path`] repairs the incumbent
//! reusing the g-values paid for so far, so solution costs never get worse.

use std::cmp::Ordering;

use hrsw::Stopwatch;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;

use crate::data_structures::indexed_heap::Indexable;
use crate::data_structures::indexed_heap::IndexedPriorityQueue;
use crate::data_structures::indexed_heap::NodeOrder;
use crate::planner::PlanError;
use crate::planner::PlannerStats;
use crate::planner::RealTimePlanner;
use crate::search::Iteration;
use crate::search::NodeIndex;
use crate::search::NodeTable;
use crate::search::SearchNode;
use crate::space::Action;
use crate::space::BackwardDomain;
use crate::space::Cost;
use crate::space::Plan;
use crate::space::State;
use crate::termination::TerminationChecker;
use crate::termination::UnlimitedTerminationChecker;

pub const DEFAULT_INFLATION_FACTOR: f64 = 3.0;
pub const DEFAULT_NODE_CAPACITY: usize = 1 << 16;

/// `g + w·h`, ties prefer higher `g`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InflatedOrder {
    pub weight: f64,
}

impl InflatedOrder {
    #[inline(always)]
    pub fn priority<St, A, C>(&self, n: &SearchNode<St, A, C>) -> OrderedFloat<f64>
    where
        St: State,
        A: Action,
        C: Cost,
    {
        OrderedFloat(n.cost().as_f64() + self.weight * n.heuristic().as_f64())
    }
}

impl<St, A, C> NodeOrder<SearchNode<St, A, C>> for InflatedOrder
where
    St: State,
    A: Action,
    C: Cost,
{
    #[inline(always)]
    fn compare(&self, l: &SearchNode<St, A, C>, r: &SearchNode<St, A, C>) -> Ordering {
        self.priority(l)
            .cmp(&self.priority(r))
            .then_with(|| r.cost().cmp(&l.cost()))
    }
}

pub struct AnytimeRepairingAStar<D, St, A, C>
where
    D: BackwardDomain<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    domain: D,
    /// Heuristics are towards `target`, and refreshed with the stamp.
    nodes: NodeTable<St, A, C>,
    open: IndexedPriorityQueue<InflatedOrder>,
    /// Expanded during the current improvement pass.
    closed: FxHashSet<NodeIndex>,
    /// Improved after being closed, waiting for the next pass.
    inconsistent: Vec<NodeIndex>,
    initial_inflation: f64,
    inflation_factor: f64,
    /// The agent's state, where the backward search is heading.
    target: Option<St>,
    target_node: Option<NodeIndex>,
    iteration: Iteration,
    stats: PlannerStats,
}

impl<D, St, A, C> AnytimeRepairingAStar<D, St, A, C>
where
    D: BackwardDomain<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    #[must_use]
    pub fn new(domain: D) -> Self {
        Self::with_inflation_factor(domain, DEFAULT_INFLATION_FACTOR)
    }

    /// Starts with inflation `w`, clamped to at least 1.
    #[must_use]
    pub fn with_inflation_factor(domain: D, w: f64) -> Self {
        Self::with_config(domain, w, DEFAULT_NODE_CAPACITY)
    }

    /// Starts with inflation `w` and room for `node_capacity` nodes.
    #[must_use]
    pub fn with_config(domain: D, w: f64, node_capacity: usize) -> Self {
        let w = if w.is_nan() { DEFAULT_INFLATION_FACTOR } else { w.max(1.0) };
        Self {
            domain,
            nodes: NodeTable::with_capacity(node_capacity),
            open: IndexedPriorityQueue::with_capacity(
                node_capacity >> 4,
                InflatedOrder { weight: w },
            ),
            closed: FxHashSet::default(),
            inconsistent: vec![],
            initial_inflation: w,
            inflation_factor: w,
            target: None,
            target_node: None,
            iteration: 0,
            stats: PlannerStats::default(),
        }
    }

    pub fn domain(&self) -> &D {
        &self.domain
    }
    pub fn nodes(&self) -> &NodeTable<St, A, C> {
        &self.nodes
    }
    pub fn inflation_factor(&self) -> f64 {
        self.inflation_factor
    }
    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    /// The incumbent, in execution order.
    pub fn solution(&self) -> Option<Plan<A, C>> {
        // Parents point towards the goals, so walking them is moving forward.
        self.target_node.map(|t| self.nodes.backtrack(t))
    }

    pub fn solution_cost(&self) -> Option<C> {
        self.target_node.map(|t| self.nodes[t].cost())
    }

    /// Searches from `start` to the closest of `goals` without a budget.
    pub fn solve(&mut self, start: &St, goals: &[St]) -> Result<Plan<A, C>, PlanError> {
        self.start_search(start, goals);
        self.improve_path(&mut UnlimitedTerminationChecker)?;
        self.solution().ok_or(PlanError::GoalNotReachable)
    }

    /// Drops the previous search and seeds the open list with the goals.
    fn start_search(&mut self, start: &St, goals: &[St]) {
        self.open.clear(self.nodes.as_mut_slice());
        self.closed.clear();
        self.inconsistent.clear();
        self.target = Some(*start);
        self.target_node = None;
        self.inflation_factor = self.initial_inflation;
        self.open.reorder(
            self.nodes.as_mut_slice(),
            InflatedOrder {
                weight: self.inflation_factor,
            },
        );
        self.iteration += 1;
        log::debug!(
            "Searching from {} goals towards {start:?} (w={})",
            goals.len(),
            self.inflation_factor
        );

        for goal in goals {
            let i = self.node(goal);
            if self.nodes[i].is_open() {
                continue;
            }
            self.nodes[i].make_root(i, self.iteration);
            self.open.add(self.nodes.as_mut_slice(), i);
            if goal == start {
                self.target_node = Some(i);
            }
        }
    }

    /// Finds the node of `s`, refreshing it if it's from an older search.
    fn node(&mut self, s: &St) -> NodeIndex {
        let iteration = self.iteration;
        let (domain, target) = (&self.domain, self.target.as_ref());
        let h = |s: &St| target.map_or(C::zero(), |t| domain.heuristic_between(s, t));

        let (i, inserted) = self
            .nodes
            .get_or_insert_with(*s, |i| SearchNode::new(*s, h(s), i, iteration));
        if inserted {
            self.stats.generated_nodes += 1;
        } else if !self.nodes[i].is_current(iteration) {
            let node = &mut self.nodes[i];
            node.refresh(iteration);
            node.heuristic = h(s);
        }
        i
    }

    fn goal_cost(&self) -> f64 {
        self.solution_cost().map_or(f64::INFINITY, |c| c.as_f64())
    }

    /// Weighted A* with deferred reopening, until the incumbent can't be
    /// improved at the current inflation.
    pub fn improve_path<T>(&mut self, checker: &mut T) -> Result<(), PlanError>
    where
        T: TerminationChecker + ?Sized,
    {
        #[cfg(feature = "coz_profile")]
        coz::scope!("ImprovePath");

        let Some(target) = self.target else {
            return Err(PlanError::GoalNotReachable);
        };
        let mut stopwatch = Stopwatch::new_started();
        let order = *self.open.order();

        while let Some(top) = self.open.peek() {
            if OrderedFloat(self.goal_cost()) <= order.priority(&self.nodes[top]) {
                break;
            }
            if checker.reached_termination() {
                stopwatch.stop();
                self.stats.expansion_time += stopwatch.elapsed();
                return match self.target_node {
                    Some(_) => Ok(()),
                    None => Err(PlanError::InsufficientBudget),
                };
            }

            self.open.pop(self.nodes.as_mut_slice());
            self.stats.expansion_pops += 1;
            self.stats.expanded_nodes += 1;
            self.closed.insert(top);
            let state = *self.nodes[top].state();
            let g = self.nodes[top].cost();

            for predecessor in self.domain.predecessors(&state) {
                let i = self.node(&predecessor.state);
                let new_g = g.saturating_add(&predecessor.cost);
                if new_g >= self.nodes[i].cost() {
                    continue;
                }

                self.nodes[i].reach(top, predecessor.action, predecessor.cost, new_g);
                log::trace!("Reached {:?} with g={new_g}", predecessor.state);
                if predecessor.state == target {
                    self.target_node = Some(i);
                }

                if self.closed.contains(&i) {
                    self.inconsistent.push(i);
                } else if self.nodes[i].is_open() {
                    self.open.update(self.nodes.as_mut_slice(), i);
                } else {
                    self.open.add(self.nodes.as_mut_slice(), i);
                }
            }
            checker.notify_expansion();
        }

        stopwatch.stop();
        self.stats.expansion_time += stopwatch.elapsed();

        match self.target_node {
            Some(_) => {
                log::debug!(
                    "Solution of cost {} at w={}",
                    self.goal_cost(),
                    self.inflation_factor
                );
                Ok(())
            }
            None => Err(PlanError::GoalNotReachable),
        }
    }

    /// Lowers the inflation and queues the inconsistent nodes again.
    ///
    /// Returns the new inflation factor, `1.0` once there's nothing left to
    /// lower.
    pub fn update(&mut self) -> f64 {
        if self.inflation_factor <= 1.0 {
            return 1.0;
        }

        let w = (self.inflation_factor * 100.0 - 2.0) / 100.0;
        self.inflation_factor = w.max(1.0);

        for i in self.inconsistent.drain(..) {
            if !self.nodes[i].is_open() {
                self.open.add(self.nodes.as_mut_slice(), i);
            }
        }
        self.open.reorder(
            self.nodes.as_mut_slice(),
            InflatedOrder {
                weight: self.inflation_factor,
            },
        );
        self.closed.clear();
        log::debug!("Inflation lowered to {}", self.inflation_factor);

        self.inflation_factor
    }

    pub fn write_memory_stats<W: std::io::Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "- ARA* memory")?;
        self.nodes.write_memory_stats(&mut out)?;
        writeln!(out, "  - |Open|: {}", self.open.len())?;
        writeln!(out, "  - |Closed|: {}", self.closed.len())?;
        writeln!(out, "  - |Inconsistent|: {}", self.inconsistent.len())?;
        Ok(())
    }
}

impl<D, St, A, C> RealTimePlanner<St, A, C> for AnytimeRepairingAStar<D, St, A, C>
where
    D: BackwardDomain<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    /// Plans the whole way to a goal, improving the plan while the budget
    /// lasts.
    fn select_action<T>(&mut self, state: &St, checker: &mut T) -> Result<Plan<A, C>, PlanError>
    where
        T: TerminationChecker + ?Sized,
    {
        if self.domain.is_goal(state) {
            return Ok(Plan::new());
        }

        // A search that ran out of budget before its first solution goes on
        let resuming = self.target == Some(*state)
            && self.target_node.is_none()
            && !self.open.is_empty();
        if resuming {
            log::debug!("Resuming the search towards {state:?}");
        } else {
            let goals = self.domain.goals();
            self.start_search(state, &goals);
        }
        self.improve_path(checker)?;

        while !checker.reached_termination() && self.inflation_factor > 1.0 {
            self.update();
            self.improve_path(checker)?;
        }

        self.solution().ok_or(PlanError::GoalNotReachable)
    }

    fn reset(&mut self) {
        self.open.clear(self.nodes.as_mut_slice());
        self.nodes.clear();
        self.closed.clear();
        self.inconsistent.clear();
        self.inflation_factor = self.initial_inflation;
        self.target = None;
        self.target_node = None;
        self.iteration = 0;
        self.stats = PlannerStats::default();
    }

    fn stats(&self) -> &PlannerStats {
        &self.stats
    }
}

impl<D, St, A, C> std::fmt::Debug for AnytimeRepairingAStar<D, St, A, C>
where
    D: BackwardDomain<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AnytimeRepairingAStar")
            .field("domain", &self.domain)
            .field("nodes", &self.nodes)
            .field("open", &self.open.len())
            .field("inflation_factor", &self.inflation_factor)
            .field("target", &self.target)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;

    use crate::float_cost::FloatCost;
    use crate::problems::grid_world::GridAction;
    use crate::problems::grid_world::GridState;
    use crate::problems::grid_world::GridWorld;
    use crate::space::Domain;
    use crate::space::Successor;
    use crate::space::plan_cost;
    use crate::termination::ExpansionTerminationChecker;
    use crate::termination::PollTerminationChecker;

    type Planner = AnytimeRepairingAStar<GridWorld, GridState, GridAction, u32>;

    // Two ways around, the heuristic favours the longer one.
    const ROOMS: &str = indoc! {"
        S.....#...
        .####.#.#.
        .#....#.#.
        .#.####.#.
        .#......#.
        .######.#.
        ........#G
    "};

    fn world(map: &str) -> (GridWorld, GridState) {
        let world = GridWorld::try_from(map).unwrap();
        let start = world.start().unwrap();
        (world, start)
    }

    fn execute(world: &GridWorld, start: GridState, plan: &Plan<GridAction, u32>) -> GridState {
        plan.iter().fold(start, |s, step| world.apply(&s, &step.action).unwrap())
    }

    #[test]
    fn solve_open_grid() {
        let (world, start) = world(indoc! {"
            S..
            ...
            ..G
        "});
        let goals = world.goals();
        let mut planner = Planner::with_inflation_factor(world.clone(), 1.0);

        let plan = planner.solve(&start, &goals).unwrap();
        assert_eq!(plan_cost(&plan), 4);
        assert!(world.is_goal(&execute(&world, start, &plan)));
        assert_eq!(planner.solution_cost(), Some(4));
    }

    #[test]
    fn start_is_a_goal() {
        let (world, start) = world("S.G");
        let mut planner = Planner::new(world);
        let plan = planner.solve(&start, &[start]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(planner.solution_cost(), Some(0));
    }

    #[test]
    fn repairs_never_get_worse() {
        let (world, start) = world(ROOMS);
        let goals = world.goals();
        let mut planner = Planner::new(world.clone());
        assert_eq!(planner.inflation_factor(), 3.0);

        let plan = planner.solve(&start, &goals).unwrap();
        assert!(world.is_goal(&execute(&world, start, &plan)));
        let mut cost = plan_cost(&plan);
        assert_eq!(planner.solution_cost(), Some(cost));

        let mut last_w = planner.inflation_factor();
        let mut passes = 0;
        while planner.inflation_factor() > 1.0 {
            let w = planner.update();
            assert!(w < last_w);
            assert!(w >= 1.0);
            last_w = w;

            planner
                .improve_path(&mut UnlimitedTerminationChecker)
                .unwrap();
            let plan = planner.solution().unwrap();
            assert!(world.is_goal(&execute(&world, start, &plan)));
            let new_cost = plan_cost(&plan);
            assert!(new_cost <= cost, "{new_cost} > {cost} at w={w}");
            cost = new_cost;
            passes += 1;
        }
        // 0.02 steps from 3.0, give or take rounding
        assert!((100..=101).contains(&passes));
        assert_eq!(planner.update(), 1.0);

        // At w=1 the result matches an uninflated search
        let mut optimal = Planner::with_inflation_factor(world.clone(), 1.0);
        let best = plan_cost(&optimal.solve(&start, &goals).unwrap());
        assert_eq!(cost, best);
    }

    #[test]
    fn unreachable_goal() {
        let (world, start) = world("S.#G");
        let goals = world.goals();
        let mut planner = Planner::new(world);
        assert_eq!(
            planner.solve(&start, &goals),
            Err(PlanError::GoalNotReachable)
        );
    }

    #[test]
    fn budget_before_any_solution() {
        let (world, start) = world(ROOMS);
        let mut planner = Planner::new(world);
        let mut checker = ExpansionTerminationChecker::new(1);
        assert_eq!(
            planner.select_action(&start, &mut checker),
            Err(PlanError::InsufficientBudget)
        );
    }

    #[test]
    fn resumes_a_search_that_ran_out_of_budget() {
        let (world, start) = world(ROOMS);
        let mut planner = Planner::new(world.clone());
        let mut checker = PollTerminationChecker::new(4);

        let mut calls = 0;
        let plan = loop {
            checker.init();
            calls += 1;
            match planner.select_action(&start, &mut checker) {
                Err(PlanError::InsufficientBudget) => assert!(calls < 1_000),
                Ok(plan) => break plan,
                Err(e) => panic!("{e}"),
            }
        };
        assert!(calls > 1);
        assert!(world.is_goal(&execute(&world, start, &plan)));
        // One pass worth of expansions, not one per call
        assert!(planner.stats().expanded_nodes <= 4 * calls as u64);
    }

    #[test]
    fn node_capacity() {
        let (world, start) = world(ROOMS);
        let mut planner = Planner::with_config(world.clone(), 1.0, 1 << 10);
        assert!(planner.nodes().capacity() >= 1 << 10);

        let plan = planner.solve(&start, &world.goals()).unwrap();
        assert!(world.is_goal(&execute(&world, start, &plan)));
    }

    #[test]
    fn select_action_reaches_the_goal() {
        let (world, start) = world(ROOMS);
        let mut planner = Planner::new(world.clone());
        let mut checker = ExpansionTerminationChecker::new(10_000);

        checker.init();
        let plan = planner.select_action(&start, &mut checker).unwrap();
        let end = execute(&world, start, &plan);
        assert!(world.is_goal(&end));
        assert!(planner.stats().expanded_nodes > 0);

        checker.init();
        assert!(planner.select_action(&end, &mut checker).unwrap().is_empty());

        // Searching again after moving reuses the node table
        checker.init();
        let again = planner.select_action(&start, &mut checker).unwrap();
        assert_eq!(plan_cost(&again), plan_cost(&plan));
    }

    /// A tiny weighted graph, with an expensive shortcut.
    ///
    /// ```text
    /// 0 --1.5--> 1 --1.5--> 3
    /// 0 ------3.5---------> 3
    /// 0 --0.5--> 2 --4.0--> 3
    /// ```
    #[derive(Debug)]
    struct Diamond;

    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    struct Vertex(u8);
    impl State for Vertex {}
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct To(u8);
    impl Action for To {}

    type Weight = FloatCost<f64>;

    const EDGES: [(u8, u8, f64); 5] = [
        (0, 1, 1.5),
        (1, 3, 1.5),
        (0, 3, 3.5),
        (0, 2, 0.5),
        (2, 3, 4.0),
    ];

    impl Domain<Vertex, To, Weight> for Diamond {
        fn successors(&self, s: &Vertex) -> Vec<Successor<Vertex, To, Weight>> {
            EDGES
                .iter()
                .filter(|(from, _, _)| *from == s.0)
                .map(|(_, to, c)| Successor::new(Vertex(*to), To(*to), FloatCost::new(*c)))
                .collect()
        }
        fn heuristic(&self, s: &Vertex) -> Weight {
            self.heuristic_between(s, &Vertex(3))
        }
        fn is_goal(&self, s: &Vertex) -> bool {
            s.0 == 3
        }
        fn apply(&self, s: &Vertex, a: &To) -> Option<Vertex> {
            self.successors(s)
                .iter()
                .find(|succ| succ.action == *a)
                .map(|succ| succ.state)
        }
    }

    impl BackwardDomain<Vertex, To, Weight> for Diamond {
        fn predecessors(&self, s: &Vertex) -> Vec<Successor<Vertex, To, Weight>> {
            EDGES
                .iter()
                .filter(|(_, to, _)| *to == s.0)
                .map(|(from, to, c)| Successor::new(Vertex(*from), To(*to), FloatCost::new(*c)))
                .collect()
        }
        fn heuristic_between(&self, _s: &Vertex, _target: &Vertex) -> Weight {
            FloatCost::new(0.0)
        }
        fn goals(&self) -> Vec<Vertex> {
            vec![Vertex(3)]
        }
    }

    #[test]
    fn float_costs() {
        let mut planner = AnytimeRepairingAStar::<_, Vertex, To, Weight>::new(Diamond);
        let plan = planner.solve(&Vertex(0), &[Vertex(3)]).unwrap();
        assert_eq!(plan.iter().map(|s| s.action).collect::<Vec<_>>(), vec![To(1), To(3)]);
        assert_eq!(plan_cost(&plan), FloatCost::new(3.0));
    }

    /// Closing `1` through the expensive edge and then finding it cheaper
    /// through `2` leaves it inconsistent for the next pass.
    ///
    /// ```text
    /// 0 --5--> 1 --4--> 3
    ///          1 --1--> 2 --1--> 3
    /// ```
    ///
    /// Heuristics are towards `0`, with h(2) = 2 and 0 everywhere else.
    #[derive(Debug)]
    struct Detour;

    const DETOUR: [(u8, u8, u32); 4] = [(0, 1, 5), (1, 3, 4), (1, 2, 1), (2, 3, 1)];

    impl Domain<Vertex, To, u32> for Detour {
        fn successors(&self, s: &Vertex) -> Vec<Successor<Vertex, To, u32>> {
            DETOUR
                .iter()
                .filter(|(from, _, _)| *from == s.0)
                .map(|(_, to, c)| Successor::new(Vertex(*to), To(*to), *c))
                .collect()
        }
        fn heuristic(&self, _s: &Vertex) -> u32 {
            0
        }
        fn is_goal(&self, s: &Vertex) -> bool {
            s.0 == 3
        }
        fn apply(&self, s: &Vertex, a: &To) -> Option<Vertex> {
            self.successors(s)
                .iter()
                .find(|succ| succ.action == *a)
                .map(|succ| succ.state)
        }
    }

    impl BackwardDomain<Vertex, To, u32> for Detour {
        fn predecessors(&self, s: &Vertex) -> Vec<Successor<Vertex, To, u32>> {
            DETOUR
                .iter()
                .filter(|(_, to, _)| *to == s.0)
                .map(|(from, to, c)| Successor::new(Vertex(*from), To(*to), *c))
                .collect()
        }
        fn heuristic_between(&self, s: &Vertex, _target: &Vertex) -> u32 {
            if s.0 == 2 { 2 } else { 0 }
        }
        fn goals(&self) -> Vec<Vertex> {
            vec![Vertex(3)]
        }
    }

    #[test]
    fn closed_nodes_that_improve_wait_for_the_next_pass() {
        let mut planner = AnytimeRepairingAStar::<_, Vertex, To, u32>::new(Detour);
        planner.solve(&Vertex(0), &[Vertex(3)]).unwrap();
        assert_eq!(planner.solution_cost(), Some(9));

        let one = planner.nodes().get(&Vertex(1)).unwrap();
        assert_eq!(planner.inconsistent, vec![one]);
        assert!(!planner.nodes()[one].is_open());
        assert_eq!(planner.nodes()[one].cost(), 2);

        planner.update();
        assert!(planner.inconsistent.is_empty());
        assert!(planner.nodes()[one].is_open());

        planner
            .improve_path(&mut UnlimitedTerminationChecker)
            .unwrap();
        assert_eq!(planner.solution_cost(), Some(7));
        let plan = planner.solution().unwrap();
        assert_eq!(
            plan.iter().map(|s| s.action).collect::<Vec<_>>(),
            vec![To(1), To(2), To(3)]
        );
        assert_eq!(plan_cost(&plan), 7);
    }
}
