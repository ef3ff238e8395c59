// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reusable scratch buffers for graph walks.

use alloc::vec::Vec;

use hashbrown::HashSet;

use crate::NodeId;

/// Reusable scratch storage for graph traversals.
///
/// The propagation hot path walks component-aware successor sets once per
/// changed node, many times per update pass. Reusing a single scratch
/// instance keeps those walks allocation-free after warm-up.
///
/// The buffers retain capacity across calls; callers should hold one scratch
/// per graph and reuse it for every walk.
///
/// # See Also
///
/// - [`TopologicalGraph::for_each_component_successor`](crate::TopologicalGraph::for_each_component_successor):
///   the walk this scratch powers.
#[derive(Debug, Default)]
pub struct TraversalScratch {
    pub(crate) stack: Vec<NodeId>,
    pub(crate) seen: HashSet<NodeId>,
}

impl TraversalScratch {
    /// Creates an empty scratch buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Creates an empty scratch buffer with pre-allocated capacity.
    ///
    /// `capacity` is a best-effort hint for both the internal stack and the
    /// seen set.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stack: Vec::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.stack.clear();
        self.seen.clear();
    }
}
