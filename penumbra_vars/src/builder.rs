// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Two-phase assembly of a working reference graph.
//!
//! Assembly is split into a builder phase — nodes, fixed edges and change
//! processors are registered — and a sealed working phase. Sealing is the
//! consuming [`GraphBuilder::build`] call: once the working graph exists,
//! the structural registration surface is gone, so structural mutation from
//! inside the propagation callback chain is unrepresentable.

use std::rc::Rc;

use hashbrown::HashMap;
use penumbra_order::{NodeBits, NodeId, TopologicalGraph};
use smallvec::SmallVec;

use crate::arena::EntityId;
use crate::error::AssemblyError;
use crate::node::NodeTable;
use crate::processor::Processor;
use crate::registry::{Registry, VariableId};
use crate::state::SessionState;
use crate::working::{Topology, WorkingGraph};

/// Builder phase of a [`WorkingGraph`].
///
/// Duplicate node registrations are no-ops; fixed edges survive for the
/// graph's lifetime; processors run on genuine-value notifications for their
/// watched variable.
pub(crate) struct GraphBuilder<E, V> {
    registry: Rc<Registry<E, V>>,
    nodes: NodeTable,
    entity_count: usize,
    fixed_edges: Vec<(NodeId, NodeId)>,
    before: HashMap<VariableId, SmallVec<[Processor; 2]>>,
    after: HashMap<VariableId, SmallVec<[Processor; 2]>>,
    inverse_tables: Vec<HashMap<EntityId, SmallVec<[EntityId; 2]>>>,
}

impl<E: 'static, V: Clone + PartialEq + 'static> GraphBuilder<E, V> {
    pub(crate) fn new(registry: Rc<Registry<E, V>>, entity_count: usize) -> Self {
        Self {
            registry,
            nodes: NodeTable::new(entity_count),
            entity_count,
            fixed_edges: Vec::new(),
            before: HashMap::new(),
            after: HashMap::new(),
            inverse_tables: Vec::new(),
        }
    }

    /// Registers the node for a (derived variable, entity) pair.
    pub(crate) fn add_node(&mut self, variable: VariableId, entity: EntityId) -> NodeId {
        self.nodes.insert(variable, entity)
    }

    pub(crate) fn lookup(&self, variable: VariableId, entity: EntityId) -> Option<NodeId> {
        self.nodes.get(variable, entity)
    }

    /// Records a structural edge that survives for the graph's lifetime.
    /// Self-edges are dropped.
    pub(crate) fn add_fixed_edge(&mut self, from: NodeId, to: NodeId) {
        if from != to {
            self.fixed_edges.push((from, to));
        }
    }

    /// Registers a processor to run before `signal` changes on an entity.
    pub(crate) fn add_before(&mut self, signal: VariableId, processor: Processor) {
        self.before.entry(signal).or_default().push(processor);
    }

    /// Registers a processor to run after `signal` changed on an entity.
    pub(crate) fn add_after(&mut self, signal: VariableId, processor: Processor) {
        self.after.entry(signal).or_default().push(processor);
    }

    /// Stores a precomputed inverse table (for fact and group steps) and
    /// returns its index for [`InverseRef::Table`](crate::processor::InverseRef::Table).
    pub(crate) fn add_inverse_table(
        &mut self,
        table: HashMap<EntityId, SmallVec<[EntityId; 2]>>,
    ) -> u32 {
        let index =
            u32::try_from(self.inverse_tables.len()).expect("inverse table count fits u32");
        self.inverse_tables.push(table);
        index
    }

    /// Seals the builder into a working graph.
    ///
    /// Rejects fixed dependency loops: cycles among fixed edges can never be
    /// broken by any later relationship change, so they are configuration
    /// errors rather than a runtime "looped" state. Dynamic (alias) edges
    /// are seeded by running every registered after-processor once per
    /// entity, and every node starts marked changed so the first drain
    /// computes the initial values.
    pub(crate) fn build(
        self,
        topology: Topology,
        state: &mut SessionState<E, V>,
    ) -> Result<WorkingGraph<E, V>, AssemblyError> {
        self.assert_no_fixed_loops()?;

        let mut graph = WorkingGraph::new(
            self.registry,
            self.nodes,
            self.entity_count,
            topology,
            self.before,
            self.after,
            self.inverse_tables,
        );
        for (from, to) in self.fixed_edges {
            graph.add_counted_edge(from, to);
        }
        graph.seed(state);
        graph.commit_if_static();
        Ok(graph)
    }

    fn assert_no_fixed_loops(&self) -> Result<(), AssemblyError> {
        let mut graph = TopologicalGraph::new(self.nodes.len());
        for &(from, to) in &self.fixed_edges {
            graph.add_edge(from, to);
        }
        let mut flipped = NodeBits::new(self.nodes.len());
        graph.commit_changes(&mut flipped);
        if flipped.is_empty() {
            // No node's loop status changed against the all-clear baseline,
            // so the fixed edges are acyclic.
            return Ok(());
        }

        const LIMIT: usize = 3;
        let total = graph.looped_components().count();
        let cycles = graph
            .looped_components()
            .take(LIMIT)
            .map(|members| {
                members
                    .iter()
                    .map(|&node| {
                        let (variable, entity) = self.nodes.pair(node);
                        format!("{}@{}", self.registry.name(variable), entity.as_u32())
                    })
                    .collect()
            })
            .collect();
        Err(AssemblyError::FixedDependencyLoop { cycles, total })
    }
}

impl<E, V> core::fmt::Debug for GraphBuilder<E, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("nodes", &self.nodes.len())
            .field("fixed_edges", &self.fixed_edges.len())
            .finish_non_exhaustive()
    }
}
