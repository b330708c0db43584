//! Local Search Space LRTA* (Koenig & Sun, 2009).
//!
//! Every call first backs up heuristic values over the previous local search
//! space with a Dijkstra-like sweep ordered by `h`, and then runs a bounded A*
//! from the agent's state. The agent commits to the path towards the best
//! frontier node, which becomes the root of the next call.

use hrsw::Stopwatch;

use crate::data_structures::indexed_heap::Indexable;
use crate::data_structures::indexed_heap::IndexedPriorityQueue;
use crate::planner::ContinuationPolicy;
use crate::planner::PlanError;
use crate::planner::PlannerStats;
use crate::planner::RealTimePlanner;
use crate::search::Edge;
use crate::search::Iteration;
use crate::search::NodeIndex;
use crate::search::NodeTable;
use crate::search::SearchNode;
use crate::search::SearchOrder;
use crate::space::Action;
use crate::space::Cost;
use crate::space::Domain;
use crate::space::Plan;
use crate::space::State;
use crate::termination::TerminationChecker;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LssLrtaStarConfig {
    /// Nodes to reserve room for up-front.
    pub node_capacity: usize,
    pub open_capacity: usize,
    pub continuation: ContinuationPolicy,
}

impl Default for LssLrtaStarConfig {
    fn default() -> Self {
        Self {
            node_capacity: 1 << 16,
            open_capacity: 1 << 12,
            continuation: ContinuationPolicy::default(),
        }
    }
}

pub struct LssLrtaStar<D, St, A, C>
where
    D: Domain<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    domain: D,
    /// Every node ever generated. Learned heuristics live here across calls.
    nodes: NodeTable<St, A, C>,
    /// Frontier of the last local search space while learning, A* open list
    /// while exploring.
    open: IndexedPriorityQueue<SearchOrder>,
    iteration: Iteration,
    /// Stamp of a learning sweep that ran out of budget, resumed next call.
    pending_learning: Option<Iteration>,
    /// Where the next call is expected to start from.
    root_state: Option<St>,
    config: LssLrtaStarConfig,
    stats: PlannerStats,
}

impl<D, St, A, C> LssLrtaStar<D, St, A, C>
where
    D: Domain<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    #[must_use]
    pub fn new(domain: D) -> Self {
        Self::with_config(domain, LssLrtaStarConfig::default())
    }

    #[must_use]
    pub fn with_config(domain: D, config: LssLrtaStarConfig) -> Self {
        Self {
            domain,
            nodes: NodeTable::with_capacity(config.node_capacity),
            open: IndexedPriorityQueue::with_capacity(config.open_capacity, SearchOrder::FValue),
            iteration: 0,
            pending_learning: None,
            root_state: None,
            config,
            stats: PlannerStats::default(),
        }
    }

    pub fn domain(&self) -> &D {
        &self.domain
    }
    pub fn config(&self) -> &LssLrtaStarConfig {
        &self.config
    }
    pub fn nodes(&self) -> &NodeTable<St, A, C> {
        &self.nodes
    }
    pub fn iteration(&self) -> Iteration {
        self.iteration
    }
    pub fn root_state(&self) -> Option<&St> {
        self.root_state.as_ref()
    }
    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    /// The current (possibly learned) heuristic of a generated state.
    pub fn heuristic_of(&self, s: &St) -> Option<C> {
        self.nodes.get(s).map(|i| self.nodes[i].heuristic())
    }

    fn check_continuation(&self, state: &St) -> Result<(), PlanError> {
        match self.root_state {
            Some(expected) if expected != *state => match self.config.continuation {
                ContinuationPolicy::Warn => {
                    log::warn!("Inconsistent continuation. Expected {expected:?} got {state:?}");
                    Ok(())
                }
                ContinuationPolicy::Reject => Err(PlanError::InconsistentState {
                    expected: format!("{expected:?}"),
                    actual: format!("{state:?}"),
                }),
            },
            _ => Ok(()),
        }
    }

    /// Backs up heuristic values from the last frontier into the nodes
    /// expanded to reach it.
    fn learn<T>(&mut self, checker: &T)
    where
        T: TerminationChecker + ?Sized,
    {
        #[cfg(feature = "coz_profile")]
        coz::scope!("Learn");

        // Frontier nodes keep the previous stamp, nodes learned in this sweep
        // get the new one. An interrupted sweep keeps its stamp so settled
        // nodes stay settled.
        let iteration = match self.pending_learning {
            Some(iteration) => iteration,
            None => {
                self.iteration += 1;
                self.iteration
            }
        };
        log::debug!(
            "Learning from {} frontier nodes (iteration {iteration})",
            self.open.len()
        );
        self.open
            .reorder(self.nodes.as_mut_slice(), SearchOrder::Heuristic);

        while !checker.reached_termination() {
            let Some(node_index) = self.open.pop(self.nodes.as_mut_slice()) else {
                break;
            };
            self.stats.learning_pops += 1;

            let node = &mut self.nodes[node_index];
            node.iteration = iteration;
            let h = node.heuristic;

            for k in 0..self.nodes[node_index].predecessors.len() {
                let Edge { node: pred, cost, .. } = self.nodes[node_index].predecessors[k];
                let candidate = h.saturating_add(&cost);

                let pred_node = &mut self.nodes[pred];
                if pred_node.is_current(iteration) && !pred_node.is_open() {
                    // Settled in this sweep already
                    continue;
                }

                if !pred_node.is_open() {
                    pred_node.heuristic = candidate;
                    pred_node.iteration = iteration;
                    self.open.add(self.nodes.as_mut_slice(), pred);
                } else if candidate < pred_node.heuristic {
                    pred_node.heuristic = candidate;
                    self.open.update(self.nodes.as_mut_slice(), pred);
                }
            }
        }

        if self.open.is_empty() {
            log::debug!("Learning done");
            self.pending_learning = None;
        } else {
            log::warn!(
                "Incomplete learning step. Open({})",
                self.open.len()
            );
            self.pending_learning = Some(iteration);
        }
    }

    /// Bounded A* from `source`.
    ///
    /// Returns the indices of the root and of the node to move towards.
    fn explore<T>(&mut self, source: &St, checker: &mut T) -> Result<(NodeIndex, NodeIndex), PlanError>
    where
        T: TerminationChecker + ?Sized,
    {
        #[cfg(feature = "coz_profile")]
        coz::scope!("Explore");

        // Learning ran out of budget, its frontier is still in `open`
        if self.pending_learning.is_some() {
            log::debug!("No budget left to explore from {source:?}");
            return Err(PlanError::InsufficientBudget);
        }

        self.iteration += 1;
        let iteration = self.iteration;
        self.open.clear(self.nodes.as_mut_slice());
        self.open.reorder(self.nodes.as_mut_slice(), SearchOrder::FValue);

        let domain = &self.domain;
        let (root, inserted) = self.nodes.get_or_insert_with(*source, |i| {
            SearchNode::new(*source, domain.heuristic(source), i, iteration)
        });
        if inserted {
            self.stats.generated_nodes += 1;
        }
        let root_node = &mut self.nodes[root];
        if !root_node.heuristic.valid() {
            // Expanded before but never learned back
            root_node.heuristic = self.domain.heuristic(source);
        }
        root_node.make_root(root, iteration);
        self.open.add(self.nodes.as_mut_slice(), root);
        log::debug!("Starting A* from {source:?} (iteration {iteration})");

        let mut expansions = 0u64;
        while !checker.reached_termination() {
            self.stats.expansion_pops += 1;
            let Some(top) = self.open.peek() else {
                return Err(PlanError::GoalNotReachable);
            };
            if self.domain.is_goal(self.nodes[top].state()) {
                log::debug!("A* found a goal after {expansions} expansions");
                return Ok((root, top));
            }

            self.open.pop(self.nodes.as_mut_slice());
            self.expand(top, iteration);
            expansions += 1;
            checker.notify_expansion();
        }

        if expansions == 0 {
            // A lone root isn't a frontier to learn from
            self.open.clear(self.nodes.as_mut_slice());
            return Err(PlanError::InsufficientBudget);
        }
        log::debug!("A* expanded {expansions} nodes");

        self.open
            .peek()
            .map(|target| (root, target))
            .ok_or(PlanError::GoalNotReachable)
    }

    fn expand(&mut self, node_index: NodeIndex, iteration: Iteration) {
        #[cfg(feature = "coz_profile")]
        coz::scope!("NodeExpansion");

        self.stats.expanded_nodes += 1;
        let node = &self.nodes[node_index];
        let state = node.state;
        let g = node.cost;
        let parent_state = self.nodes[node.parent].state;

        for successor in self.domain.successors(&state) {
            let domain = &self.domain;
            let (i, inserted) = self.nodes.get_or_insert_with(successor.state, |_| {
                SearchNode::new(
                    successor.state,
                    domain.heuristic(&successor.state),
                    node_index,
                    iteration,
                )
            });
            if inserted {
                self.stats.generated_nodes += 1;
            }

            let succ = &mut self.nodes[i];
            if !succ.heuristic.valid() && !succ.is_current(iteration) {
                log::trace!("Skipping dead end {:?}", successor.state);
                continue;
            }
            if !succ.is_current(iteration) {
                succ.refresh(iteration);
            }

            succ.predecessors.push(Edge {
                node: node_index,
                action: successor.action,
                cost: successor.cost,
            });

            // Straight back to where we came from
            if successor.state == parent_state {
                continue;
            }

            let new_g = g.saturating_add(&successor.cost);
            if new_g < succ.cost {
                succ.reach(node_index, successor.action, successor.cost, new_g);
                log::trace!("Reached {:?} with g={new_g}", successor.state);
                if succ.is_open() {
                    self.open.update(self.nodes.as_mut_slice(), i);
                } else {
                    self.open.add(self.nodes.as_mut_slice(), i);
                }
            }
        }

        // Closed for the rest of this iteration, learning brings it back.
        self.nodes[node_index].heuristic = C::infinity();
    }

    /// Actions from `root` to `target`, in execution order.
    fn extract_plan(&self, root: NodeIndex, target: NodeIndex) -> Plan<A, C> {
        if root == target {
            return Plan::new();
        }
        let mut plan = self.nodes.backtrack(target);
        plan.reverse();
        log::debug!("Extracted a plan of {} actions", plan.len());
        plan
    }

    pub fn write_memory_stats<W: std::io::Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "- LSS-LRTA* memory")?;
        self.nodes.write_memory_stats(&mut out)?;
        writeln!(out, "  - |Open|: {}", self.open.len())?;
        Ok(())
    }
}

impl<D, St, A, C> RealTimePlanner<St, A, C> for LssLrtaStar<D, St, A, C>
where
    D: Domain<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    fn select_action<T>(&mut self, state: &St, checker: &mut T) -> Result<Plan<A, C>, PlanError>
    where
        T: TerminationChecker + ?Sized,
    {
        self.check_continuation(state)?;
        self.root_state = Some(*state);

        if self.domain.is_goal(state) {
            log::debug!("Already at a goal {state:?}");
            return Ok(Plan::new());
        }

        if !self.open.is_empty() {
            let mut stopwatch = Stopwatch::new_started();
            self.learn(&*checker);
            stopwatch.stop();
            self.stats.learning_time += stopwatch.elapsed();
        }

        let mut stopwatch = Stopwatch::new_started();
        let explored = self.explore(state, checker);
        stopwatch.stop();
        self.stats.expansion_time += stopwatch.elapsed();

        let (root, target) = explored?;
        let plan = self.extract_plan(root, target);
        self.root_state = Some(self.nodes[target].state);

        Ok(plan)
    }

    fn reset(&mut self) {
        self.open.clear(self.nodes.as_mut_slice());
        self.nodes.clear();
        self.iteration = 0;
        self.pending_learning = None;
        self.root_state = None;
        self.stats = PlannerStats::default();
    }

    fn stats(&self) -> &PlannerStats {
        &self.stats
    }
}

impl<D, St, A, C> std::fmt::Debug for LssLrtaStar<D, St, A, C>
where
    D: Domain<St, A, C>,
    St: State,
    A: Action,
    C: Cost,
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("LssLrtaStar")
            .field("domain", &self.domain)
            .field("nodes", &self.nodes)
            .field("open", &self.open.len())
            .field("iteration", &self.iteration)
            .field("pending_learning", &self.pending_learning)
            .field("root_state", &self.root_state)
            .finish()
    }
}
