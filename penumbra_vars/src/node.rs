// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node identity: (variable, entity) pairs with dense graph ids.

use hashbrown::HashMap;
use penumbra_order::NodeId;
use smallvec::SmallVec;

use crate::arena::EntityId;
use crate::registry::VariableId;

/// Maps (derived variable, entity) pairs to dense [`NodeId`]s and back.
///
/// Ids are assigned in registration order and are stable for the lifetime of
/// one graph instance. Registering the same pair twice returns the existing
/// id.
#[derive(Debug)]
pub(crate) struct NodeTable {
    pairs: Vec<(VariableId, EntityId)>,
    index: HashMap<(VariableId, EntityId), NodeId>,
    entity_nodes: Vec<SmallVec<[NodeId; 2]>>,
}

impl NodeTable {
    pub(crate) fn new(entity_count: usize) -> Self {
        Self {
            pairs: Vec::new(),
            index: HashMap::new(),
            entity_nodes: vec![SmallVec::new(); entity_count],
        }
    }

    /// Registers a node for the pair, or returns the existing one.
    pub(crate) fn insert(&mut self, variable: VariableId, entity: EntityId) -> NodeId {
        if let Some(&node) = self.index.get(&(variable, entity)) {
            return node;
        }
        let node = NodeId::new(
            u32::try_from(self.pairs.len()).expect("too many graph nodes for NodeId (u32)"),
        );
        self.pairs.push((variable, entity));
        self.index.insert((variable, entity), node);
        self.entity_nodes[entity.index()].push(node);
        node
    }

    pub(crate) fn get(&self, variable: VariableId, entity: EntityId) -> Option<NodeId> {
        self.index.get(&(variable, entity)).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.pairs.len()
    }

    pub(crate) fn pair(&self, node: NodeId) -> (VariableId, EntityId) {
        self.pairs[node.index()]
    }

    pub(crate) fn nodes_of_entity(&self, entity: EntityId) -> &[NodeId] {
        &self.entity_nodes[entity.index()]
    }
}
