//! Search nodes shared by the planners.
//!
//! Nodes live in a [`NodeTable`], an arena that only grows during a planning
//! session, and reference each other through [`NodeIndex`] handles. Parent and
//! predecessor links are therefore plain indices and never own anything.
//!
//! # Iteration stamps
//!
//! Each node carries the [`Iteration`] in which its search bookkeeping was last
//! written. A planner bumps its own counter whenever a new search phase starts,
//! which lazily invalidates the g-value, parent, action and predecessor list of
//! every node at once. A node whose stamp doesn't match the planner's counter
//! MUST be refreshed (see [`SearchNode::refresh`]) before any of those fields
//! is read. Heuristic values are not covered by the stamp, they accumulate
//! learning across phases.

use std::cmp::Ordering;
use std::fmt::Debug;

use derive_more::Display;
use nonmax::NonMaxUsize;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::data_structures::indexed_heap::Indexable;
use crate::data_structures::indexed_heap::NodeOrder;
use crate::space::Action;
use crate::space::ActionBundle;
use crate::space::Cost;
use crate::space::Plan;
use crate::space::State;

/// Search phase counter.
pub type Iteration = u64;

/// A handle to a [`SearchNode`] in a [`NodeTable`].
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{index}")]
pub struct NodeIndex {
    index: usize,
}

impl NodeIndex {
    #[inline(always)]
    pub fn new(index: usize) -> Self {
        Self { index }
    }
    #[inline(always)]
    pub fn as_usize(&self) -> usize {
        self.index
    }
}

/// An edge into a node, discovered while expanding `node`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Edge<A, C> {
    pub node: NodeIndex,
    pub action: A,
    pub cost: C,
}

#[derive(Debug, Clone)]
pub struct SearchNode<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    pub(crate) state: St,
    /// Estimated cost-to-go. `C::infinity()` marks expanded or dead-end nodes.
    pub(crate) heuristic: C,
    /// g-value. `C::infinity()` until reached in the current iteration.
    pub(crate) cost: C,
    /// Best known predecessor. Roots point to themselves.
    pub(crate) parent: NodeIndex,
    /// The action taken at `parent` to get here, `None` for roots.
    pub(crate) action: Option<A>,
    pub(crate) action_cost: C,
    pub(crate) iteration: Iteration,
    /// Nodes that generated this one during the current iteration.
    pub(crate) predecessors: SmallVec<[Edge<A, C>; 4]>,
    heap_index: Option<NonMaxUsize>,
}

impl<St, A, C> SearchNode<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    /// A freshly discovered node that wasn't reached yet.
    pub fn new(state: St, heuristic: C, parent: NodeIndex, iteration: Iteration) -> Self {
        Self {
            state,
            heuristic,
            cost: C::infinity(),
            parent,
            action: None,
            action_cost: C::zero(),
            iteration,
            predecessors: SmallVec::new(),
            heap_index: None,
        }
    }

    #[inline(always)]
    pub fn state(&self) -> &St {
        &self.state
    }
    #[inline(always)]
    pub fn heuristic(&self) -> C {
        self.heuristic
    }
    #[inline(always)]
    pub fn cost(&self) -> C {
        self.cost
    }
    #[inline(always)]
    pub fn parent(&self) -> NodeIndex {
        self.parent
    }
    #[inline(always)]
    pub fn action(&self) -> Option<A> {
        self.action
    }
    #[inline(always)]
    pub fn action_cost(&self) -> C {
        self.action_cost
    }
    #[inline(always)]
    pub fn iteration(&self) -> Iteration {
        self.iteration
    }
    #[inline(always)]
    pub fn predecessors(&self) -> &[Edge<A, C>] {
        &self.predecessors
    }

    /// `g + h`, only meaningful with a finite `g`.
    #[inline(always)]
    pub fn f(&self) -> C {
        self.cost.saturating_add(&self.heuristic)
    }

    #[inline(always)]
    pub fn is_current(&self, iteration: Iteration) -> bool {
        self.iteration == iteration
    }

    /// Drops stale bookkeeping so the node looks freshly discovered in
    /// `iteration`.
    ///
    /// The parent and action are left as they are, they are meaningless
    /// until the node is reached again.
    pub fn refresh(&mut self, iteration: Iteration) {
        debug_assert!(self.iteration != iteration);
        self.iteration = iteration;
        self.cost = C::infinity();
        self.predecessors.clear();
    }

    /// Turns the node into the root of a new search.
    pub fn make_root(&mut self, own_index: NodeIndex, iteration: Iteration) {
        self.iteration = iteration;
        self.cost = C::zero();
        self.parent = own_index;
        self.action = None;
        self.action_cost = C::zero();
        self.predecessors.clear();
    }

    /// Gives this node a better path through a new parent.
    pub fn reach(&mut self, parent: NodeIndex, action: A, action_cost: C, cost: C) {
        debug_assert!(cost < self.cost);
        self.parent = parent;
        self.action = Some(action);
        self.action_cost = action_cost;
        self.cost = cost;
    }
}

impl<St, A, C> Indexable for SearchNode<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    #[inline(always)]
    fn heap_index(&self) -> Option<usize> {
        self.heap_index.map(|i| i.get())
    }
    #[inline(always)]
    fn set_heap_index(&mut self, i: Option<usize>) {
        self.heap_index = i.and_then(NonMaxUsize::new);
    }
}

/// Orderings used by the real-time planner's open list.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Default)]
pub enum SearchOrder {
    /// Lower `f` first. Ties prefer higher `g`, deeper nodes need fewer
    /// reopenings.
    #[default]
    #[display("f")]
    FValue,
    /// Lower `h` first, for learning.
    #[display("h")]
    Heuristic,
}

impl<St, A, C> NodeOrder<SearchNode<St, A, C>> for SearchOrder
where
    St: State,
    A: Action,
    C: Cost,
{
    #[inline(always)]
    fn compare(&self, l: &SearchNode<St, A, C>, r: &SearchNode<St, A, C>) -> Ordering {
        match self {
            SearchOrder::FValue => l.f().cmp(&r.f()).then_with(|| r.cost.cmp(&l.cost)),
            SearchOrder::Heuristic => l.heuristic.cmp(&r.heuristic),
        }
    }
}

/// All the search nodes of a planner, addressable by state.
pub struct NodeTable<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    nodes: Vec<SearchNode<St, A, C>>,
    /// Finds existing nodes from their `State`.
    node_map: FxHashMap<St, NodeIndex>,
}

impl<St, A, C> NodeTable<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![],
            node_map: FxHashMap::default(),
        }
    }

    /// Reserves room up-front so growing the table doesn't stall a search
    /// that's short on time.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            node_map: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    /// Nodes that fit without reallocating.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    #[inline(always)]
    pub fn get(&self, s: &St) -> Option<NodeIndex> {
        self.node_map.get(s).copied()
    }

    /// Finds the node of `s`, creating it on a miss.
    ///
    /// Returns whether the node is new.
    #[inline(always)]
    pub fn get_or_insert_with<F>(&mut self, s: St, make: F) -> (NodeIndex, bool)
    where
        F: FnOnce(NodeIndex) -> SearchNode<St, A, C>,
    {
        if let Some(i) = self.node_map.get(&s) {
            return (*i, false);
        }
        let i = NodeIndex::new(self.nodes.len());
        let node = make(i);
        debug_assert_eq!(node.state, s);
        self.nodes.push(node);
        self.node_map.insert(s, i);
        (i, true)
    }

    /// The nodes, as the open list needs them.
    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [SearchNode<St, A, C>] {
        &mut self.nodes
    }
    #[inline(always)]
    pub fn as_slice(&self) -> &[SearchNode<St, A, C>] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &SearchNode<St, A, C>)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeIndex::new(i), n))
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.node_map.clear();
    }

    /// Collects the actions along parent pointers, from `node_index` up to its
    /// root.
    ///
    /// The plan comes out in walking order, from `node_index` towards the
    /// root.
    #[must_use]
    pub fn backtrack(&self, mut node_index: NodeIndex) -> Plan<A, C> {
        let mut plan = Plan::<A, C>::new();

        // Parent pointers can't cycle, but don't trust that blindly.
        for _ in 0..self.len() {
            let node = &self[node_index];
            if node.parent == node_index {
                return plan;
            }
            debug_assert!(node.action.is_some(), "Only roots lack an action");
            if let Some(a) = node.action {
                plan.push(ActionBundle::new(a, node.action_cost));
            }
            node_index = node.parent;
        }

        debug_assert!(false, "Parent pointers formed a cycle");
        plan
    }

    pub fn write_memory_stats<W: std::io::Write>(&self, mut out: W) -> std::io::Result<()> {
        use size::Size;
        use std::mem::size_of;
        use thousands::Separable;

        let s = size_of::<SearchNode<St, A, C>>();
        let l = self.nodes.len();
        let c = self.nodes.capacity();
        writeln!(
            out,
            "  - |Nodes|:  {} ({})",
            l.separate_with_commas(),
            Size::from_bytes(l * s)
        )?;
        writeln!(
            out,
            "  - |Nodes|*: {} ({})",
            c.separate_with_commas(),
            Size::from_bytes(c * s)
        )?;

        let s = size_of::<(St, NodeIndex)>();
        let l = self.node_map.len();
        let c = self.node_map.capacity();
        writeln!(
            out,
            "  - |Index|:  {} ({})",
            l.separate_with_commas(),
            Size::from_bytes(l * s)
        )?;
        writeln!(
            out,
            "  - |Index|*: {} ({})",
            c.separate_with_commas(),
            Size::from_bytes(c * s)
        )?;

        Ok(())
    }
}

impl<St, A, C> Default for NodeTable<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl<St, A, C> std::ops::Index<NodeIndex> for NodeTable<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    type Output = SearchNode<St, A, C>;

    #[inline(always)]
    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.nodes[index.as_usize()]
    }
}

impl<St, A, C> std::ops::IndexMut<NodeIndex> for NodeTable<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    #[inline(always)]
    fn index_mut(&mut self, index: NodeIndex) -> &mut Self::Output {
        &mut self.nodes[index.as_usize()]
    }
}

impl<St, A, C> std::fmt::Debug for NodeTable<St, A, C>
where
    St: State,
    A: Action,
    C: Cost,
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "NodeTable{{({} nodes)}}", self.len())
    }
}
