// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Penumbra Order: incremental topological-order maintenance.
//!
//! This crate provides the graph core for incremental recomputation engines
//! where a set of dense nodes carries directed "must recompute after" edges,
//! edges change in batches, and consumers need, after each batch:
//!
//! - a per-node **topological order** consistent with every edge that does
//!   not sit on a cycle,
//! - a **loop classification**: whether a node is inside, or downstream of,
//!   a non-trivial strongly connected component, and
//! - a report of exactly which nodes **changed loop membership** relative to
//!   the previous batch.
//!
//! It models this as:
//!
//! - **Dense node ids** ([`NodeId`]): nodes are `0..n`, fixed at graph
//!   construction, so every internal structure is a flat array.
//! - **The graph** ([`TopologicalGraph`]): adjacency sets with O(1) edge
//!   insertion/removal, and [`commit_changes`](TopologicalGraph::commit_changes)
//!   which recomputes strongly connected components with an iterative
//!   Tarjan pass.
//! - **Bit sets** ([`NodeBits`]): fixed-capacity change sets over node ids.
//! - **Loop memoization** ([`LoopedTracker`]): reusable per-node memo for
//!   the transitive "is looped" query, cleared between passes without
//!   reallocating.
//! - **Traversal scratch** ([`TraversalScratch`]): reusable stack + seen-set
//!   storage for component-aware edge walks.
//!
//! ## Quick start
//!
//! ```rust
//! use penumbra_order::{LoopedTracker, NodeBits, NodeId, TopologicalGraph};
//!
//! let mut graph = TopologicalGraph::new(3);
//! let (a, b, c) = (NodeId::new(0), NodeId::new(1), NodeId::new(2));
//!
//! graph.add_edge(a, b);
//! graph.add_edge(b, c);
//!
//! let mut flipped = NodeBits::new(3);
//! graph.commit_changes(&mut flipped);
//!
//! assert!(graph.topological_order(a) < graph.topological_order(b));
//! assert!(graph.topological_order(b) < graph.topological_order(c));
//! assert!(flipped.is_empty()); // nothing became (or stopped being) a loop
//!
//! // Close the cycle b -> c -> b and commit again.
//! graph.add_edge(c, b);
//! graph.commit_changes(&mut flipped);
//!
//! let mut tracker = LoopedTracker::new(3);
//! assert!(!graph.is_looped(&mut tracker, a));
//! assert!(graph.is_looped(&mut tracker, b));
//! assert!(graph.is_looped(&mut tracker, c));
//! assert!(flipped.contains(b) && flipped.contains(c));
//! ```
//!
//! ## Batching
//!
//! Edges may be added and removed freely between commits; only the net
//! adjacency set at commit time matters. All committed queries
//! ([`topological_order`](TopologicalGraph::topological_order),
//! [`is_looped`](TopologicalGraph::is_looped),
//! [`component_members`](TopologicalGraph::component_members)) describe the
//! snapshot of edges in effect at the last commit.
//!
//! ## Allocation discipline
//!
//! The graph is built for a hot path that runs once per candidate move of a
//! search algorithm. Every commit and every query reuses buffers owned by
//! the graph or by caller-provided scratch ([`LoopedTracker`],
//! [`TraversalScratch`], [`NodeBits`]); steady-state operation performs no
//! allocation.
//!
//! ## `no_std` support
//!
//! This crate is `no_std` and uses `alloc`. It does not depend on `std`.

#![no_std]

extern crate alloc;

mod bits;
mod graph;
mod looped;
mod scratch;

pub use bits::NodeBits;
pub use graph::TopologicalGraph;
pub use looped::LoopedTracker;
pub use scratch::TraversalScratch;

/// A dense graph node identifier.
///
/// Node ids are assigned contiguously from zero when a graph is built and
/// stay stable for the lifetime of that graph instance, so they can be used
/// directly as indices into flat per-node tables.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a node id from a raw index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns this id as a `usize` index (for flat per-node tables).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}
