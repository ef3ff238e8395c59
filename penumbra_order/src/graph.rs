// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The topological-order graph.

use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashSet;

use crate::bits::NodeBits;
use crate::looped::LoopedTracker;
use crate::scratch::TraversalScratch;
use crate::NodeId;

/// A directed graph over dense node ids with incremental topological order
/// and strongly-connected-component tracking.
///
/// The graph is sized once at construction. Edges are mutated freely between
/// commits; [`commit_changes`](Self::commit_changes) recomputes components
/// and order for the net edge set and reports loop-membership flips. All
/// order/component queries describe the last committed snapshot.
///
/// Edge multiplicity is the caller's concern: the graph stores an adjacency
/// *set*, and callers that assert the same edge from several sources are
/// expected to reference-count externally and only call
/// [`add_edge`](Self::add_edge)/[`remove_edge`](Self::remove_edge) on the
/// 0→1 and 1→0 transitions. Self-edges must not be passed down.
///
/// # Example
///
/// ```
/// use penumbra_order::{NodeBits, NodeId, TopologicalGraph};
///
/// let mut graph = TopologicalGraph::new(2);
/// graph.add_edge(NodeId::new(0), NodeId::new(1));
///
/// let mut flipped = NodeBits::new(2);
/// graph.commit_changes(&mut flipped);
///
/// assert!(graph.topological_order(NodeId::new(0)) < graph.topological_order(NodeId::new(1)));
/// ```
///
/// # See Also
///
/// - [`LoopedTracker`]: memo for the transitive [`is_looped`](Self::is_looped) query.
/// - [`NodeBits`]: the flip-report output of [`commit_changes`](Self::commit_changes).
#[derive(Debug)]
pub struct TopologicalGraph {
    node_count: usize,
    forward: Vec<HashSet<NodeId>>,
    backward: Vec<HashSet<NodeId>>,

    // Committed state, rewritten wholesale by `commit_changes`.
    order: Vec<u32>,
    component: Vec<u32>,
    in_loop: Vec<bool>,
    /// Component member storage, grouped by component; `member_start` has a
    /// trailing sentinel so component `c` owns `members[member_start[c]..member_start[c + 1]]`.
    members: Vec<NodeId>,
    member_start: Vec<u32>,

    // Tarjan scratch, reused across commits.
    csr_start: Vec<u32>,
    csr_edges: Vec<NodeId>,
    visit_index: Vec<u32>,
    low_link: Vec<u32>,
    on_stack: Vec<bool>,
    tarjan_stack: Vec<NodeId>,
    work: Vec<Frame>,
}

#[derive(Debug)]
struct Frame {
    node: usize,
    /// Cursor into `csr_edges` for the next unexplored successor.
    edge: u32,
}

impl TopologicalGraph {
    /// Creates a graph over node ids `0..node_count` with no edges.
    ///
    /// Every node starts in its own singleton component with order `0`; the
    /// state matches what a commit of the empty edge set would produce.
    #[must_use]
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            forward: vec![HashSet::new(); node_count],
            backward: vec![HashSet::new(); node_count],
            order: vec![0; node_count],
            component: (0..node_count as u32).collect(),
            in_loop: vec![false; node_count],
            members: (0..node_count as u32).map(NodeId::new).collect(),
            member_start: (0..=node_count as u32).collect(),
            csr_start: vec![0; node_count + 1],
            csr_edges: Vec::new(),
            visit_index: vec![0; node_count],
            low_link: vec![0; node_count],
            on_stack: vec![false; node_count],
            tarjan_stack: Vec::with_capacity(node_count),
            work: Vec::with_capacity(node_count),
        }
    }

    /// Returns the number of nodes this graph was built with.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Adds the edge `from → to`.
    ///
    /// Returns `true` if the edge was newly added. O(1) amortized.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        debug_assert_ne!(from, to, "self-edges must be filtered by the caller");
        let newly = self.forward[from.index()].insert(to);
        if newly {
            self.backward[to.index()].insert(from);
        }
        newly
    }

    /// Removes the edge `from → to`.
    ///
    /// Returns `true` if the edge existed. O(1) amortized.
    pub fn remove_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        let removed = self.forward[from.index()].remove(&to);
        if removed {
            self.backward[to.index()].remove(&from);
        }
        removed
    }

    /// Returns `true` if the edge `from → to` is currently present.
    #[must_use]
    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.forward[from.index()].contains(&to)
    }

    /// Recomputes components and topological order for the net edge set.
    ///
    /// Runs one iterative Tarjan pass (O(V + E), explicit work stack), then
    /// assigns every node the order of its component: components are
    /// numbered in reverse finish order, so for every committed edge
    /// `a → b` whose endpoints sit in different components,
    /// `order(a) < order(b)`. Members of one component share an order.
    ///
    /// For every node whose loop membership (singleton component vs.
    /// non-trivial component) flipped relative to the previous commit, the
    /// node's bit is set in `flipped` — bits already set are left alone, so
    /// a caller can hand in its pending change set and have flips appended.
    pub fn commit_changes(&mut self, flipped: &mut NodeBits) {
        self.snapshot_edges();
        let component_count = self.tarjan();

        for node in 0..self.node_count {
            self.order[node] = component_count - 1 - self.component[node];
        }
        for node in 0..self.node_count {
            let component = self.component[node] as usize;
            let size = self.member_start[component + 1] - self.member_start[component];
            let in_loop = size > 1;
            if in_loop != self.in_loop[node] {
                self.in_loop[node] = in_loop;
                flipped.set(NodeId::new(node as u32));
            }
        }
    }

    /// Returns the committed topological order of `node`.
    ///
    /// Orders are not required to be distinct across unrelated components;
    /// the only guarantee is `order(a) < order(b)` for committed edges
    /// `a → b` spanning two components.
    #[inline]
    #[must_use]
    pub fn topological_order(&self, node: NodeId) -> u32 {
        self.order[node.index()]
    }

    /// Returns `true` if `node` sits in a committed non-trivial component.
    ///
    /// This is the direct membership flag; for the transitive query
    /// ("in a loop, or downstream of one") see [`is_looped`](Self::is_looped).
    #[inline]
    #[must_use]
    pub fn in_looped_component(&self, node: NodeId) -> bool {
        self.in_loop[node.index()]
    }

    /// Returns the committed component members of `node`'s component.
    #[must_use]
    pub fn component_members(&self, node: NodeId) -> &[NodeId] {
        let component = self.component[node.index()] as usize;
        let start = self.member_start[component] as usize;
        let end = self.member_start[component + 1] as usize;
        &self.members[start..end]
    }

    /// Returns `true` if `node` is looped: inside a non-trivial component,
    /// or reachable (along edges) from one.
    ///
    /// Answers are memoized in `tracker`; one tracker must not span a
    /// commit. The walk uses the tracker's work stack, so the query
    /// allocates nothing once the tracker is warm.
    pub fn is_looped(&self, tracker: &mut LoopedTracker, node: NodeId) -> bool {
        if let Some(answer) = tracker.known(node) {
            return answer;
        }

        // Backward walk over singleton components only: a node inside a
        // non-trivial component answers immediately, and every backward
        // cycle is confined to one component, so the walk terminates.
        debug_assert!(tracker.stack.is_empty());
        tracker.stack.push(node);
        while let Some(&current) = tracker.stack.last() {
            if tracker.known(current).is_some() {
                tracker.stack.pop();
                continue;
            }
            if self.in_loop[current.index()] {
                tracker.record(current, true);
                tracker.stack.pop();
                continue;
            }

            let mut unresolved = None;
            let mut any_looped = false;
            for &predecessor in &self.backward[current.index()] {
                match tracker.known(predecessor) {
                    Some(true) => {
                        any_looped = true;
                        break;
                    }
                    Some(false) => {}
                    None => {
                        if unresolved.is_none() && !self.in_loop[predecessor.index()] {
                            unresolved = Some(predecessor);
                        } else if self.in_loop[predecessor.index()] {
                            any_looped = true;
                            break;
                        }
                    }
                }
            }

            if any_looped {
                tracker.record(current, true);
                tracker.stack.pop();
            } else if let Some(predecessor) = unresolved {
                tracker.stack.push(predecessor);
            } else {
                tracker.record(current, false);
                tracker.stack.pop();
            }
        }

        tracker.known(node).expect("walk resolved the root node")
    }

    /// Calls `f` for every distinct successor reachable by one edge from any
    /// member of `node`'s component.
    ///
    /// In a non-trivial component this makes a cycle's exit edges visible
    /// from every member; for a singleton component it is simply the node's
    /// forward edge set. Successors inside the component itself are
    /// included.
    pub fn for_each_component_successor(
        &self,
        node: NodeId,
        scratch: &mut TraversalScratch,
        mut f: impl FnMut(NodeId),
    ) {
        let members = self.component_members(node);
        if let [only] = members {
            // Forward sets are deduplicated already.
            for &successor in &self.forward[only.index()] {
                f(successor);
            }
            return;
        }

        scratch.reset();
        scratch.stack.extend_from_slice(members);
        while let Some(member) = scratch.stack.pop() {
            for &successor in &self.forward[member.index()] {
                if scratch.seen.insert(successor) {
                    f(successor);
                }
            }
        }
    }

    /// Returns an iterator over the member lists of all committed
    /// non-trivial components.
    pub fn looped_components(&self) -> impl Iterator<Item = &[NodeId]> {
        self.member_start
            .windows(2)
            .map(|range| &self.members[range[0] as usize..range[1] as usize])
            .filter(|members| members.len() > 1)
    }

    /// Snapshots the adjacency sets into the reusable CSR buffers so the
    /// Tarjan pass can iterate edges by cursor.
    fn snapshot_edges(&mut self) {
        self.csr_edges.clear();
        self.csr_start[0] = 0;
        for node in 0..self.node_count {
            self.csr_edges.extend(self.forward[node].iter().copied());
            self.csr_start[node + 1] = self.csr_edges.len() as u32;
        }
    }

    /// Iterative Tarjan over the CSR snapshot. Returns the component count
    /// and fills `component`, `members` and `member_start` in pop order
    /// (reverse topological order of the condensation).
    fn tarjan(&mut self) -> u32 {
        self.visit_index.fill(0);
        self.on_stack.fill(false);
        self.tarjan_stack.clear();
        self.work.clear();
        self.members.clear();
        self.member_start.clear();
        self.member_start.push(0);

        let mut next_index = 0u32;
        let mut component_count = 0u32;

        for root in 0..self.node_count {
            if self.visit_index[root] != 0 {
                continue;
            }
            next_index += 1;
            self.visit_index[root] = next_index;
            self.low_link[root] = next_index;
            self.on_stack[root] = true;
            self.tarjan_stack.push(NodeId::new(root as u32));
            self.work.push(Frame {
                node: root,
                edge: self.csr_start[root],
            });

            while let Some(frame) = self.work.last_mut() {
                let node = frame.node;
                if frame.edge < self.csr_start[node + 1] {
                    let target = self.csr_edges[frame.edge as usize].index();
                    frame.edge += 1;
                    if self.visit_index[target] == 0 {
                        next_index += 1;
                        self.visit_index[target] = next_index;
                        self.low_link[target] = next_index;
                        self.on_stack[target] = true;
                        self.tarjan_stack.push(NodeId::new(target as u32));
                        self.work.push(Frame {
                            node: target,
                            edge: self.csr_start[target],
                        });
                    } else if self.on_stack[target] {
                        self.low_link[node] = self.low_link[node].min(self.visit_index[target]);
                    }
                } else {
                    self.work.pop();
                    if let Some(parent) = self.work.last() {
                        self.low_link[parent.node] =
                            self.low_link[parent.node].min(self.low_link[node]);
                    }
                    if self.low_link[node] == self.visit_index[node] {
                        loop {
                            let member = self.tarjan_stack.pop().expect("component root on stack");
                            self.on_stack[member.index()] = false;
                            self.component[member.index()] = component_count;
                            self.members.push(member);
                            if member.index() == node {
                                break;
                            }
                        }
                        self.member_start.push(self.members.len() as u32);
                        component_count += 1;
                    }
                }
            }
        }

        component_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn graph(node_count: usize, edges: &[(u32, u32)]) -> TopologicalGraph {
        let mut graph = TopologicalGraph::new(node_count);
        for &(from, to) in edges {
            graph.add_edge(NodeId::new(from), NodeId::new(to));
        }
        graph
    }

    fn committed(node_count: usize, edges: &[(u32, u32)]) -> (TopologicalGraph, NodeBits) {
        let mut graph = graph(node_count, edges);
        let mut flipped = NodeBits::new(node_count);
        graph.commit_changes(&mut flipped);
        (graph, flipped)
    }

    #[track_caller]
    fn assert_before(graph: &TopologicalGraph, earlier: u32, later: u32) {
        assert!(
            graph.topological_order(NodeId::new(earlier))
                < graph.topological_order(NodeId::new(later)),
            "expected order({earlier}) < order({later})"
        );
    }

    fn members(graph: &TopologicalGraph, node: u32) -> Vec<u32> {
        let mut out: Vec<_> = graph
            .component_members(NodeId::new(node))
            .iter()
            .map(|n| n.as_u32())
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn acyclic_orders_respect_edges() {
        let edges = [(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)];
        let (graph, flipped) = committed(5, &edges);

        for &(from, to) in &edges {
            assert_before(&graph, from, to);
        }
        assert!(flipped.is_empty());
        for node in 0..5 {
            assert_eq!(members(&graph, node), [node]);
        }
    }

    #[test]
    fn edge_insertion_order_is_irrelevant() {
        let mut edges = [(3, 4), (2, 3), (0, 2), (1, 3), (0, 1)];
        edges.reverse();
        let (graph, _) = committed(5, &edges);

        for &(from, to) in &edges {
            assert_before(&graph, from, to);
        }
    }

    #[test]
    fn removing_an_edge_relaxes_order() {
        let (mut graph, _) = committed(5, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)]);

        graph.remove_edge(NodeId::new(2), NodeId::new(3));
        let mut flipped = NodeBits::new(5);
        graph.commit_changes(&mut flipped);

        for &(from, to) in &[(0, 1), (0, 2), (1, 3), (3, 4)] {
            assert_before(&graph, from, to);
        }
        assert!(flipped.is_empty());
    }

    #[test]
    fn add_then_remove_before_commit_is_a_no_op() {
        let mut graph = graph(3, &[(0, 1)]);
        graph.add_edge(NodeId::new(1), NodeId::new(2));
        graph.remove_edge(NodeId::new(1), NodeId::new(2));

        let mut flipped = NodeBits::new(3);
        graph.commit_changes(&mut flipped);
        assert!(!graph.has_edge(NodeId::new(1), NodeId::new(2)));
        assert_before(&graph, 0, 1);
    }

    #[test]
    fn cycle_members_flip_and_share_a_component() {
        // 1 → 3 → 1 is a loop; 0 feeds it, 4 hangs off it.
        let (graph, flipped) = committed(5, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4), (3, 1)]);

        assert_eq!(members(&graph, 1), [1, 3]);
        assert_eq!(members(&graph, 3), [1, 3]);
        assert_eq!(members(&graph, 0), [0]);
        assert_eq!(members(&graph, 2), [2]);

        assert_before(&graph, 0, 1);
        assert_before(&graph, 0, 2);
        assert_before(&graph, 2, 3);
        assert_before(&graph, 3, 4);
        assert_eq!(
            graph.topological_order(NodeId::new(1)),
            graph.topological_order(NodeId::new(3)),
        );

        assert_eq!(flipped.count(), 2);
        assert!(flipped.contains(NodeId::new(1)));
        assert!(flipped.contains(NodeId::new(3)));
    }

    #[test]
    fn breaking_a_cycle_flips_members_back() {
        let (mut graph, _) = committed(5, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4), (3, 1)]);

        graph.remove_edge(NodeId::new(3), NodeId::new(1));
        let mut flipped = NodeBits::new(5);
        graph.commit_changes(&mut flipped);

        assert_eq!(flipped.count(), 2);
        assert!(flipped.contains(NodeId::new(1)));
        assert!(flipped.contains(NodeId::new(3)));
        for node in 0..5 {
            assert_eq!(members(&graph, node), [node]);
        }
        assert_before(&graph, 1, 3);
    }

    #[test]
    fn joined_cycles_form_one_component() {
        // 1 → 3 → 1 and 2 → 4 → 2, joined by 1 → 2 and 4 → 3.
        let (graph, flipped) = committed(
            6,
            &[
                (0, 1),
                (0, 2),
                (1, 3),
                (1, 2),
                (2, 4),
                (3, 5),
                (3, 1),
                (4, 5),
                (4, 2),
                (4, 3),
            ],
        );

        assert_eq!(members(&graph, 1), [1, 2, 3, 4]);
        assert_eq!(flipped.count(), 4);
        assert_before(&graph, 0, 1);
        assert_before(&graph, 1, 5);
    }

    #[test]
    fn splitting_joined_cycles_leaves_two_components() {
        let (mut graph, _) = committed(
            6,
            &[
                (0, 1),
                (0, 2),
                (1, 3),
                (1, 2),
                (2, 4),
                (3, 5),
                (3, 1),
                (4, 5),
                (4, 2),
                (4, 3),
            ],
        );

        graph.remove_edge(NodeId::new(4), NodeId::new(3));
        let mut flipped = NodeBits::new(6);
        graph.commit_changes(&mut flipped);

        assert_eq!(members(&graph, 1), [1, 3]);
        assert_eq!(members(&graph, 2), [2, 4]);
        // Everyone was looped before and still is: no flips.
        assert!(flipped.is_empty());
        assert_before(&graph, 1, 2);
        assert_before(&graph, 2, 5);
    }

    #[test]
    fn is_looped_taints_downstream_nodes() {
        // 1 ↔ 2 loop, 2 → 3 downstream, 0 upstream.
        let (graph, _) = committed(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let mut tracker = LoopedTracker::new(4);

        assert!(!graph.is_looped(&mut tracker, NodeId::new(0)));
        assert!(graph.is_looped(&mut tracker, NodeId::new(1)));
        assert!(graph.is_looped(&mut tracker, NodeId::new(2)));
        assert!(graph.is_looped(&mut tracker, NodeId::new(3)));

        // Memoized answers stay stable within one pass.
        assert!(graph.is_looped(&mut tracker, NodeId::new(3)));
        assert!(!graph.is_looped(&mut tracker, NodeId::new(0)));
    }

    #[test]
    fn is_looped_through_a_long_singleton_chain() {
        // Loop at the head, then a chain 2 → 3 → ... → 9.
        let mut edges = alloc::vec![(0, 1), (1, 0), (1, 2)];
        for node in 2..9 {
            edges.push((node, node + 1));
        }
        let (graph, _) = committed(10, &edges);
        let mut tracker = LoopedTracker::new(10);

        assert!(graph.is_looped(&mut tracker, NodeId::new(9)));
    }

    #[test]
    fn component_successors_union_exit_edges() {
        // Loop {1, 2} with exits 1 → 3 and 2 → 4.
        let (graph, _) = committed(5, &[(1, 2), (2, 1), (1, 3), (2, 4)]);
        let mut scratch = TraversalScratch::new();

        let mut successors = Vec::new();
        graph.for_each_component_successor(NodeId::new(1), &mut scratch, |n| {
            successors.push(n.as_u32());
        });
        successors.sort_unstable();
        // Exit edges plus the in-component edges themselves.
        assert_eq!(successors, [1, 2, 3, 4]);

        // A singleton component sees just its own forward edges.
        successors.clear();
        graph.for_each_component_successor(NodeId::new(3), &mut scratch, |n| {
            successors.push(n.as_u32());
        });
        assert!(successors.is_empty());
    }

    #[test]
    fn looped_components_lists_only_nontrivial_ones() {
        let (graph, _) = committed(5, &[(0, 1), (1, 2), (2, 1), (3, 4)]);

        let looped: Vec<Vec<u32>> = graph
            .looped_components()
            .map(|members| {
                let mut out: Vec<_> = members.iter().map(|n| n.as_u32()).collect();
                out.sort_unstable();
                out
            })
            .collect();
        assert_eq!(looped, [alloc::vec![1, 2]]);
    }

    #[test]
    fn empty_graph_commits_cleanly() {
        let mut graph = TopologicalGraph::new(0);
        let mut flipped = NodeBits::new(0);
        graph.commit_changes(&mut flipped);
        assert!(flipped.is_empty());
        assert_eq!(graph.node_count(), 0);
    }
}
