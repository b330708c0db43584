use std::cmp::Ordering;
use std::fmt::Debug;

use crate::derank::derank_by;
use crate::heap_primitives::index_first_child;
use crate::heap_primitives::index_last_child;
use crate::heap_primitives::index_parent;
use crate::search::NodeIndex;

/// Something that knows where it sits in an [`IndexedPriorityQueue`].
///
/// The queue writes the index on every move, so finding an element's slot is
/// a field read instead of a linear search.
pub trait Indexable {
    fn heap_index(&self) -> Option<usize>;
    fn set_heap_index(&mut self, i: Option<usize>);

    /// Whether the element is currently queued.
    #[inline(always)]
    fn is_open(&self) -> bool {
        self.heap_index().is_some()
    }
}

/// A replaceable ordering over queued elements.
pub trait NodeOrder<N> {
    fn compare(&self, l: &N, r: &N) -> Ordering;
}

/// "Intrusive" min-heap of node handles.
///
/// Intrusive data structures deal with mostly-opaque elements that carry some
/// data relevant to the data structure. Here the elements live in an arena
/// owned by someone else (a slice indexed by [`NodeIndex`]) and carry their
/// own heap index, which the queue keeps in sync on every swap. This lets us
/// re-rank or remove an arbitrary element in O(log n).
///
/// Since the arena isn't ours, every operation that needs to look at or
/// touch elements borrows it.
///
/// ```pseudocode
/// for (i, node_index) in self.heap.enumerate():
///   assert_eq(nodes[node_index].heap_index, Some(i))
/// ```
#[derive(Debug, Clone)]
pub struct IndexedPriorityQueue<O, const ARITY: usize = 2> {
    heap: Vec<NodeIndex>,
    order: O,
}

impl<O, const ARITY: usize> IndexedPriorityQueue<O, ARITY> {
    #[must_use]
    pub fn new(order: O) -> Self {
        Self::with_capacity(0, order)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize, order: O) -> Self {
        const { assert!(ARITY >= 2, "Heaps need at least 2 children per node") };
        Self {
            heap: Vec::with_capacity(capacity),
            order,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.heap.len()
    }
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The current ordering.
    #[inline(always)]
    pub fn order(&self) -> &O {
        &self.order
    }

    /// The best element, if any.
    #[inline(always)]
    pub fn peek(&self) -> Option<NodeIndex> {
        self.heap.first().copied()
    }

    /// Queued elements, in heap order.
    pub fn iter(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.heap.iter().copied()
    }

    /// Inserts an element that's not queued yet.
    pub fn add<N>(&mut self, nodes: &mut [N], i: NodeIndex)
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        debug_assert!(!nodes[i.as_usize()].is_open(), "{i} is already queued");
        self.verify_heap(nodes);

        let heap_index = self.heap.len();
        self.heap.push(i);
        nodes[i.as_usize()].set_heap_index(Some(heap_index));
        self._sift_up(nodes, heap_index);

        self.verify_heap(nodes);
    }

    /// Removes and returns the best element.
    pub fn pop<N>(&mut self, nodes: &mut [N]) -> Option<NodeIndex>
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        #[cfg(feature = "coz_profile")]
        coz::scope!("Pop");

        if self.heap.is_empty() {
            return None;
        }
        Some(self._remove_at(nodes, 0))
    }

    /// Re-sifts an element whose rank changed in-place.
    pub fn update<N>(&mut self, nodes: &mut [N], i: NodeIndex)
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        let Some(heap_index) = nodes[i.as_usize()].heap_index() else {
            debug_assert!(false, "{i} is not queued");
            return;
        };
        debug_assert_eq!(self.heap[heap_index], i, "{i} is out of sync");

        let moved_to = self._sift_up(nodes, heap_index);
        if moved_to == heap_index {
            self._sift_down(nodes, heap_index);
        }

        self.verify_heap(nodes);
    }

    /// Takes an arbitrary element out of the queue.
    ///
    /// Returns whether it was queued.
    pub fn remove<N>(&mut self, nodes: &mut [N], i: NodeIndex) -> bool
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        match nodes[i.as_usize()].heap_index() {
            Some(heap_index) => {
                let removed = self._remove_at(nodes, heap_index);
                debug_assert_eq!(removed, i);
                true
            }
            None => false,
        }
    }

    /// Swaps the ordering and re-heapifies in place.
    pub fn reorder<N>(&mut self, nodes: &mut [N], order: O)
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        self.order = order;

        let len = self.heap.len();
        if len > 1 {
            // Floyd's bottom-up construction, leaves are heaps already.
            for heap_index in (0..=index_parent::<ARITY>(len - 1)).rev() {
                self._sift_down(nodes, heap_index);
            }
        }

        self.verify_heap(nodes);
    }

    /// Empties the queue, marking every element as no longer queued.
    pub fn clear<N: Indexable>(&mut self, nodes: &mut [N]) {
        for i in self.heap.drain(..) {
            nodes[i.as_usize()].set_heap_index(None);
        }
    }

    /// Checks the heap property and the intrusive indices.
    pub fn is_valid<N>(&self, nodes: &[N]) -> bool
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        self.heap.iter().enumerate().all(|(heap_index, i)| {
            let synced = nodes[i.as_usize()].heap_index() == Some(heap_index);
            let ordered = heap_index == 0 || {
                let parent = self.heap[index_parent::<ARITY>(heap_index)];
                self.order
                    .compare(&nodes[parent.as_usize()], &nodes[i.as_usize()])
                    .is_le()
            };
            synced && ordered
        })
    }

    #[inline(always)]
    #[cfg(not(feature = "verify"))]
    fn verify_heap<N>(&self, _nodes: &[N])
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        // All good... (hopefully)
    }
    #[inline(always)]
    #[cfg(feature = "verify")]
    fn verify_heap<N>(&self, nodes: &[N])
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        debug_assert!(self.is_valid(nodes), "Heap invariants are broken");
    }

    // Implementation details

    #[inline(always)]
    fn _less<N>(&self, nodes: &[N], l: usize, r: usize) -> bool
    where
        O: NodeOrder<N>,
    {
        let l = self.heap[l].as_usize();
        let r = self.heap[r].as_usize();
        self.order.compare(&nodes[l], &nodes[r]).is_lt()
    }

    /// Removes the element at `heap_index`, refilling the hole with the last
    /// element.
    fn _remove_at<N>(&mut self, nodes: &mut [N], heap_index: usize) -> NodeIndex
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        let last = self.heap.len() - 1;
        if heap_index != last {
            self._swap(nodes, heap_index, last);
        }
        let removed = self.heap.pop().unwrap_or_else(|| unreachable!("Heap can't be empty"));
        nodes[removed.as_usize()].set_heap_index(None);

        if heap_index < self.heap.len() {
            // The filler came from the bottom, but it may still belong above a
            // hole that wasn't at the root.
            let moved_to = self._sift_up(nodes, heap_index);
            if moved_to == heap_index {
                self._sift_down(nodes, heap_index);
            }
        }

        self.verify_heap(nodes);
        removed
    }

    /// Raises a node
    /// Returns it's new index
    #[inline(always)]
    fn _sift_up<N>(&mut self, nodes: &mut [N], mut pos: usize) -> usize
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        debug_assert!(pos < self.heap.len(), "Index out of bounds...");

        while pos > 0 {
            let parent = index_parent::<ARITY>(pos);
            if !self._less(nodes, pos, parent) {
                break;
            }
            self._swap(nodes, parent, pos);
            pos = parent;
        }
        pos
    }

    /// Lowers a node
    /// Returns it's new index
    #[inline(always)]
    fn _sift_down<N>(&mut self, nodes: &mut [N], mut pos: usize) -> usize
    where
        N: Indexable,
        O: NodeOrder<N>,
    {
        let len = self.heap.len();
        loop {
            let first = index_first_child::<ARITY>(pos);
            if first >= len {
                break;
            }
            let last = std::cmp::min(index_last_child::<ARITY>(pos), len - 1);

            // Find the best child
            let child = first
                + derank_by(&self.heap[first..=last], |l, r| {
                    self.order
                        .compare(&nodes[l.as_usize()], &nodes[r.as_usize()])
                        .is_le()
                });

            if !self._less(nodes, child, pos) {
                break;
            }
            self._swap(nodes, pos, child);
            pos = child;
        }
        pos
    }

    /// Swaps two elements in the heap.
    ///
    /// Keeps the intrusive indices in sync.
    #[inline(always)]
    fn _swap<N: Indexable>(&mut self, nodes: &mut [N], l: usize, r: usize) {
        self.heap.swap(l, r);
        nodes[self.heap[l].as_usize()].set_heap_index(Some(l));
        nodes[self.heap[r].as_usize()].set_heap_index(Some(r));
    }
}
