// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Memoization for the transitive loop query.

use alloc::vec;
use alloc::vec::Vec;

use crate::NodeId;

/// Per-node answer cache for [`TopologicalGraph::is_looped`](crate::TopologicalGraph::is_looped).
///
/// A node is *looped* when it sits inside a non-trivial strongly connected
/// component, or when any of its (transitive) predecessors does. Answering
/// that query walks backward edges; the tracker memoizes answers so that one
/// update pass asks each node at most once, and owns the walk's work stack
/// so the query allocates nothing.
///
/// The tracker is valid for one committed graph snapshot. Callers must
/// [`clear`](Self::clear) it between independent passes (the clear retains
/// the allocation).
#[derive(Debug)]
pub struct LoopedTracker {
    status: Vec<Status>,
    pub(crate) stack: Vec<NodeId>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Status {
    Unknown,
    No,
    Yes,
}

impl LoopedTracker {
    /// Creates a tracker for node ids `0..capacity`, all unknown.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            status: vec![Status::Unknown; capacity],
            stack: Vec::new(),
        }
    }

    /// Resets every memoized answer to unknown, retaining the allocation.
    pub fn clear(&mut self) {
        self.status.fill(Status::Unknown);
        self.stack.clear();
    }

    /// Returns the memoized answer for `node`, if there is one.
    #[inline]
    #[must_use]
    pub fn known(&self, node: NodeId) -> Option<bool> {
        match self.status[node.index()] {
            Status::Unknown => None,
            Status::No => Some(false),
            Status::Yes => Some(true),
        }
    }

    #[inline]
    pub(crate) fn record(&mut self, node: NodeId, looped: bool) {
        self.status[node.index()] = if looped { Status::Yes } else { Status::No };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_clear() {
        let mut tracker = LoopedTracker::new(4);
        assert_eq!(tracker.known(NodeId::new(2)), None);

        tracker.record(NodeId::new(2), true);
        tracker.record(NodeId::new(3), false);
        assert_eq!(tracker.known(NodeId::new(2)), Some(true));
        assert_eq!(tracker.known(NodeId::new(3)), Some(false));

        tracker.clear();
        assert_eq!(tracker.known(NodeId::new(2)), None);
    }
}
