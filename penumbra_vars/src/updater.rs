// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The topological-wavefront drain.
//!
//! One drain processes every node flagged changed since the last drain, in
//! committed topological order, each at most once:
//!
//! 1. Commit structural changes (dynamic topology only); loop-membership
//!    flips join the change set.
//! 2. Seed a minimum-order priority queue (ties broken by node id) from the
//!    change set, then clear the set.
//! 3. Pop the minimum unvisited node. Looped nodes are forced to the
//!    "unknown" value and always count as changed — loop membership itself
//!    is the signal. Other nodes recompute; a recomputation that reproduces
//!    the stored value (by value equality) propagates nothing.
//! 4. When a node's value changed, enqueue the unvisited successors of its
//!    whole component, so a cycle's exit edges are reachable from any
//!    member.
//! 5. After the wavefront settles, re-evaluate the aggregate inconsistency
//!    of every entity that had a node change or loop, and write the entity
//!    flag on flips.
//!
//! All scratch is owned by the graph and reset, never reallocated, at the
//! end of the pass.

use std::cmp::Reverse;

use crate::arena::EntityId;
use crate::registry::{Registry, VariableId, VariableKind};
use crate::state::{CalcContext, SessionState};
use crate::working::{Topology, WorkingGraph};

impl<E: 'static, V: Clone + PartialEq + 'static> WorkingGraph<E, V> {
    pub(crate) fn drain(&mut self, state: &mut SessionState<E, V>) {
        if self.changed.is_empty() {
            // The common case on the hot path: a move that touched nothing
            // this graph tracks.
            return;
        }
        if self.topology == Topology::Dynamic {
            self.graph.commit_changes(&mut self.changed);
        }

        {
            let Self {
                changed,
                heap,
                graph,
                ..
            } = self;
            debug_assert!(heap.is_empty(), "heap is drained at the end of each pass");
            changed.for_each_set(|node| {
                heap.push(Reverse((graph.topological_order(node), node)));
            });
            changed.clear_all();
        }

        let mut visits = 0usize;
        while let Some(Reverse((_, node))) = self.heap.pop() {
            if self.visited[node.index()] {
                continue;
            }
            self.visited[node.index()] = true;
            visits += 1;

            let (variable, entity) = self.nodes.pair(node);
            let looped = self.topology == Topology::Dynamic && {
                let Self { graph, tracker, .. } = self;
                graph.is_looped(tracker, node)
            };
            let value_changed =
                Self::update_value(&self.registry, state, variable, entity, looped);

            if value_changed {
                if !self.affected_bits[entity.index()] {
                    self.affected_bits[entity.index()] = true;
                    self.affected.push(entity);
                }
                let Self {
                    graph,
                    traversal,
                    heap,
                    visited,
                    ..
                } = self;
                graph.for_each_component_successor(node, traversal, |successor| {
                    if !visited[successor.index()] {
                        heap.push(Reverse((graph.topological_order(successor), successor)));
                    }
                });
            }
        }

        self.update_affected_entities(state);

        tracing::trace!(visits, nodes = self.nodes.len(), "drained change set");

        // Prepare for the next drain; clear, do not reallocate.
        self.tracker.clear();
        self.visited.fill(false);
    }

    /// Recomputes one node's value, or forces it to unknown when looped.
    ///
    /// Returns `true` if the node counts as changed for propagation: its
    /// stored value actually changed, or it is looped (loop membership is
    /// always treated as a change, since `None` may be a legitimate value
    /// that just became *uncomputable*).
    fn update_value(
        registry: &Registry<E, V>,
        state: &mut SessionState<E, V>,
        variable: VariableId,
        entity: EntityId,
        looped: bool,
    ) -> bool {
        let old = state.read_value(registry, variable, entity);
        if looped {
            if old.is_some() {
                state.write_value(registry, variable, entity, None);
            }
            return true;
        }

        let new = {
            let context = CalcContext {
                registry,
                state: &*state,
            };
            match registry.kind(variable) {
                VariableKind::Derived { calculator, .. }
                | VariableKind::Intermediate { calculator, .. } => calculator(&context, entity),
                _ => unreachable!("graph nodes always belong to derived variables"),
            }
        };
        if new == old {
            return false;
        }
        state.write_value(registry, variable, entity, new);
        true
    }

    /// Re-evaluates the aggregate inconsistency of every affected entity and
    /// writes the entity-level marker on flips.
    fn update_affected_entities(&mut self, state: &mut SessionState<E, V>) {
        for index in 0..self.affected.len() {
            let entity = self.affected[index];
            let inconsistent = self.topology == Topology::Dynamic && {
                let Self {
                    graph,
                    tracker,
                    nodes,
                    ..
                } = self;
                nodes
                    .nodes_of_entity(entity)
                    .iter()
                    .any(|&node| graph.is_looped(tracker, node))
            };
            if self.entity_inconsistent[entity.index()] != inconsistent {
                self.entity_inconsistent[entity.index()] = inconsistent;
                let piggyback = self.piggyback_variable(entity);
                state.write_consistency(&self.registry, entity, inconsistent, piggyback);
            }
            self.affected_bits[entity.index()] = false;
        }
        self.affected.clear();
    }

    /// The variable whose notifications stand in for a missing consistency
    /// flag: the entity's first user-visible derived variable.
    fn piggyback_variable(&self, entity: EntityId) -> VariableId {
        let nodes = self.nodes.nodes_of_entity(entity);
        nodes
            .iter()
            .map(|&node| self.nodes.pair(node).0)
            .find(|&variable| matches!(self.registry.kind(variable), VariableKind::Derived { .. }))
            .unwrap_or_else(|| self.nodes.pair(nodes[0]).0)
    }
}
