// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The working reference graph: fixed and general dependency structures.

use core::fmt;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;

use hashbrown::HashMap;
use penumbra_order::{LoopedTracker, NodeBits, NodeId, TopologicalGraph, TraversalScratch};
use smallvec::SmallVec;

use crate::arena::EntityId;
use crate::graph::ReferenceGraph;
use crate::node::NodeTable;
use crate::processor::{InverseRef, Processor, StepRef};
use crate::registry::{Registry, VariableId, VariableKind};
use crate::state::SessionState;

/// Whether the dependency structure can change after assembly.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Topology {
    /// No alias edges exist: components and orders are committed once at
    /// build time and never revisited, and nothing can ever become looped.
    Static,
    /// Alias edges come and go with relationship values: every drain
    /// recommits components and orders first.
    Dynamic,
}

/// The graph-backed reference-graph variant.
///
/// Covers both the no-dynamic-edges structure (static topology: one commit
/// at assembly, loop checks short-circuited) and the fully general structure
/// (dynamic topology: recommit per drain, loop classification live). All
/// drain scratch — the priority queue, the visited bits, the loop memo, the
/// traversal scratch and the affected-entity set — is owned here and reset,
/// never reallocated, between drains.
pub struct WorkingGraph<E, V> {
    pub(crate) registry: Rc<Registry<E, V>>,
    pub(crate) nodes: NodeTable,
    pub(crate) topology: Topology,
    /// Flat `node_count * node_count` edge reference counts.
    counts: Vec<u32>,
    node_count: usize,
    pub(crate) graph: TopologicalGraph,
    pub(crate) changed: NodeBits,
    before: HashMap<VariableId, SmallVec<[Processor; 2]>>,
    after: HashMap<VariableId, SmallVec<[Processor; 2]>>,
    inverse_tables: Vec<HashMap<EntityId, SmallVec<[EntityId; 2]>>>,
    pub(crate) entity_inconsistent: Vec<bool>,

    // Drain scratch, allocated once and reused (see module docs on the
    // per-move hot path).
    pub(crate) heap: BinaryHeap<Reverse<(u32, NodeId)>>,
    pub(crate) visited: Vec<bool>,
    pub(crate) tracker: LoopedTracker,
    pub(crate) traversal: TraversalScratch,
    pub(crate) affected: Vec<EntityId>,
    pub(crate) affected_bits: Vec<bool>,
}

impl<E: 'static, V: Clone + PartialEq + 'static> WorkingGraph<E, V> {
    pub(crate) fn new(
        registry: Rc<Registry<E, V>>,
        nodes: NodeTable,
        entity_count: usize,
        topology: Topology,
        before: HashMap<VariableId, SmallVec<[Processor; 2]>>,
        after: HashMap<VariableId, SmallVec<[Processor; 2]>>,
        inverse_tables: Vec<HashMap<EntityId, SmallVec<[EntityId; 2]>>>,
    ) -> Self {
        let node_count = nodes.len();
        Self {
            registry,
            nodes,
            topology,
            counts: vec![0; node_count * node_count],
            node_count,
            graph: TopologicalGraph::new(node_count),
            changed: NodeBits::new(node_count),
            before,
            after,
            inverse_tables,
            entity_inconsistent: vec![false; entity_count],
            heap: BinaryHeap::with_capacity(node_count),
            visited: vec![false; node_count],
            tracker: LoopedTracker::new(node_count),
            traversal: TraversalScratch::new(),
            affected: Vec::new(),
            affected_bits: vec![false; entity_count],
        }
    }

    /// Asserts one reference of the edge without flagging the target
    /// changed; used for the initial fixed-edge load.
    pub(crate) fn add_counted_edge(&mut self, from: NodeId, to: NodeId) {
        debug_assert_ne!(from, to, "fixed self-edges are dropped by the builder");
        let cell = &mut self.counts[from.index() * self.node_count + to.index()];
        *cell += 1;
        if *cell == 1 {
            self.graph.add_edge(from, to);
        }
    }

    /// Runs every after-processor once per entity to seed alias edges from
    /// the current relationship values (and to flag their targets changed).
    pub(crate) fn seed(&mut self, state: &mut SessionState<E, V>) {
        let signals: Vec<VariableId> = self.after.keys().copied().collect();
        for entity in state.arena.ids().collect::<Vec<_>>() {
            for &signal in &signals {
                self.after_variable_changed(signal, entity, state);
            }
        }
        // The first drain computes every value once, whether or not a
        // processor happened to flag it.
        for index in 0..self.node_count {
            #[expect(clippy::cast_possible_truncation, reason = "node ids fit u32")]
            self.changed.set(NodeId::new(index as u32));
        }
    }

    /// Commits components and orders once, for the static topology.
    pub(crate) fn commit_if_static(&mut self) {
        if self.topology == Topology::Static {
            let mut flipped = NodeBits::new(self.node_count);
            self.graph.commit_changes(&mut flipped);
            debug_assert!(
                flipped.is_empty(),
                "a static topology was verified acyclic at assembly"
            );
        }
    }

    fn apply(&mut self, processor: Processor, entity: EntityId, state: &SessionState<E, V>) {
        match processor {
            Processor::Mark { target } => {
                if let Some(node) = self.nodes.get(target, entity) {
                    self.changed.set(node);
                }
            }
            Processor::MarkInverse { target, inverse } => match inverse {
                InverseRef::Relation(relation) => {
                    let dependents =
                        self.registry
                            .resolve_relation_inverse(relation, &state.arena, entity);
                    for dependent in dependents {
                        if let Some(node) = self.nodes.get(target, dependent) {
                            self.changed.set(node);
                        }
                    }
                }
                InverseRef::OracleNext => {
                    if let Some(dependent) = state.oracle.next(&state.arena, entity)
                        && let Some(node) = self.nodes.get(target, dependent)
                    {
                        self.changed.set(node);
                    }
                }
                InverseRef::OraclePrevious => {
                    if let Some(dependent) = state.oracle.previous(&state.arena, entity)
                        && let Some(node) = self.nodes.get(target, dependent)
                    {
                        self.changed.set(node);
                    }
                }
                InverseRef::Table(table) => {
                    if let Some(dependents) = self.inverse_tables[table as usize].get(&entity) {
                        let dependents = dependents.clone();
                        for dependent in dependents {
                            if let Some(node) = self.nodes.get(target, dependent) {
                                self.changed.set(node);
                            }
                        }
                    }
                }
            },
            Processor::RemoveAliasEdge {
                source,
                target,
                step,
            } => {
                let Some(to) = self.nodes.get(target, entity) else {
                    return;
                };
                let Some(from_entity) = self.resolve_step(step, entity, state) else {
                    return;
                };
                let Some(from) = self.nodes.get(source, from_entity) else {
                    return;
                };
                self.remove_edge(from, to);
            }
            Processor::AddAliasEdge {
                source,
                target,
                step,
            } => {
                let Some(to) = self.nodes.get(target, entity) else {
                    return;
                };
                let Some(from_entity) = self.resolve_step(step, entity, state) else {
                    return;
                };
                let Some(from) = self.nodes.get(source, from_entity) else {
                    return;
                };
                self.add_edge(from, to);
            }
        }
    }

    fn resolve_step(
        &self,
        step: StepRef,
        entity: EntityId,
        state: &SessionState<E, V>,
    ) -> Option<EntityId> {
        match step {
            StepRef::Relation(relation) => {
                let VariableKind::Relation { read, .. } = self.registry.kind(relation) else {
                    unreachable!("validated at registry build");
                };
                read(state.arena.get(entity))
            }
            StepRef::OraclePrevious => state.oracle.previous(&state.arena, entity),
            StepRef::OracleNext => state.oracle.next(&state.arena, entity),
            StepRef::OracleInverse => state.oracle.inverse(&state.arena, entity),
        }
    }
}

impl<E: 'static, V: Clone + PartialEq + 'static> ReferenceGraph<E, V> for WorkingGraph<E, V> {
    fn lookup(&self, variable: VariableId, entity: EntityId) -> Option<NodeId> {
        self.nodes.get(variable, entity)
    }

    fn mark_changed(&mut self, node: NodeId) {
        self.changed.set(node);
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if from == to {
            return;
        }
        self.add_counted_edge(from, to);
        self.changed.set(to);
    }

    fn remove_edge(&mut self, from: NodeId, to: NodeId) {
        if from == to {
            return;
        }
        let cell = &mut self.counts[from.index() * self.node_count + to.index()];
        debug_assert!(*cell > 0, "removing an edge that was never added");
        *cell -= 1;
        if *cell == 0 {
            self.graph.remove_edge(from, to);
        }
        self.changed.set(to);
    }

    fn before_variable_changed(
        &mut self,
        variable: VariableId,
        entity: EntityId,
        state: &mut SessionState<E, V>,
    ) {
        let Some(processors) = self.before.get(&variable) else {
            return;
        };
        let processors = processors.clone();
        for processor in processors {
            self.apply(processor, entity, state);
        }
    }

    fn after_variable_changed(
        &mut self,
        variable: VariableId,
        entity: EntityId,
        state: &mut SessionState<E, V>,
    ) {
        let Some(processors) = self.after.get(&variable) else {
            return;
        };
        let processors = processors.clone();
        for processor in processors {
            self.apply(processor, entity, state);
        }
    }

    fn update_changed(&mut self, state: &mut SessionState<E, V>) {
        self.drain(state);
    }

    fn is_entity_inconsistent(&self, entity: EntityId) -> bool {
        self.entity_inconsistent[entity.index()]
    }
}

impl<E, V> fmt::Debug for WorkingGraph<E, V> {
    /// Renders the live (reference-counted) edge set as
    /// `variable@entity -> [variable@entity, ..]` lines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = |node: usize| {
            #[expect(clippy::cast_possible_truncation, reason = "node ids fit u32")]
            let (variable, entity) = self.nodes.pair(NodeId::new(node as u32));
            format!("{}@{}", self.registry.name(variable), entity.as_u32())
        };

        writeln!(f, "{{")?;
        for from in 0..self.node_count {
            let mut first = true;
            for to in 0..self.node_count {
                if self.counts[from * self.node_count + to] != 0 {
                    if first {
                        write!(f, "    \"{}\": [", label(from))?;
                        first = false;
                    } else {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\"", label(to))?;
                }
            }
            if !first {
                writeln!(f, "],")?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::builder::GraphBuilder;
    use crate::navigation::Source;
    use crate::notifier::NoopNotifier;
    use crate::oracle::NoSequence;
    use crate::registry::RegistryBuilder;

    struct Entity {
        base: Option<i64>,
        first: Option<i64>,
        second: Option<i64>,
    }

    fn fixture() -> (Rc<Registry<Entity, i64>>, SessionState<Entity, i64>) {
        let mut builder = RegistryBuilder::new();
        let base = builder.stored("base");
        builder.derived(
            "first",
            |entity: &Entity| entity.first,
            |entity, value| entity.first = value,
            |context, id| context.entity(id).base,
            vec![Source::identity(base)],
        );
        builder.derived(
            "second",
            |entity: &Entity| entity.second,
            |entity, value| entity.second = value,
            |context, id| context.entity(id).base,
            vec![Source::identity(base)],
        );
        let registry = Rc::new(builder.build().unwrap());
        let state = SessionState::new(
            &registry,
            vec![Entity {
                base: Some(1),
                first: None,
                second: None,
            }],
            Box::new(NoopNotifier),
            Rc::new(NoSequence),
        );
        (registry, state)
    }

    #[test]
    fn edges_are_reference_counted() {
        let (registry, mut state) = fixture();
        let first = registry.node_variables()[0];
        let second = registry.node_variables()[1];
        let entity = EntityId::new(0);

        let mut builder = GraphBuilder::new(registry.clone(), 1);
        let from = builder.add_node(first, entity);
        let to = builder.add_node(second, entity);
        let mut graph = builder.build(Topology::Dynamic, &mut state).unwrap();

        graph.add_edge(from, to);
        graph.add_edge(from, to);
        graph.remove_edge(from, to);
        assert!(
            graph.graph.has_edge(from, to),
            "one of two assertions remains"
        );
        graph.remove_edge(from, to);
        assert!(!graph.graph.has_edge(from, to), "last assertion retracted");
    }

    #[test]
    fn self_edges_are_dropped() {
        let (registry, mut state) = fixture();
        let first = registry.node_variables()[0];
        let entity = EntityId::new(0);

        let mut builder = GraphBuilder::new(registry.clone(), 1);
        let node = builder.add_node(first, entity);
        let mut graph = builder.build(Topology::Dynamic, &mut state).unwrap();

        graph.add_edge(node, node);
        assert!(!graph.graph.has_edge(node, node));
    }
}
