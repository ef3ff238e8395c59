// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The zero-node reference graph.

use penumbra_order::NodeId;

use crate::arena::EntityId;
use crate::graph::ReferenceGraph;
use crate::registry::VariableId;
use crate::state::SessionState;

/// The reference graph used when no derived variables apply to the session's
/// entities.
///
/// Sessions always carry *some* graph so callers never null-check; this one
/// answers every query with "nothing" and treats structural mutation as a
/// caller bug — with zero registered nodes there is no node the caller
/// could legitimately have a handle to.
#[derive(Copy, Clone, Debug, Default)]
pub struct EmptyGraph;

impl<E, V> ReferenceGraph<E, V> for EmptyGraph {
    fn lookup(&self, _variable: VariableId, _entity: EntityId) -> Option<NodeId> {
        None
    }

    fn mark_changed(&mut self, _node: NodeId) {
        panic!("the empty reference graph has no nodes to mark");
    }

    fn add_edge(&mut self, _from: NodeId, _to: NodeId) {
        panic!("the empty reference graph has no nodes to connect");
    }

    fn remove_edge(&mut self, _from: NodeId, _to: NodeId) {
        panic!("the empty reference graph has no nodes to disconnect");
    }

    fn before_variable_changed(
        &mut self,
        _variable: VariableId,
        _entity: EntityId,
        _state: &mut SessionState<E, V>,
    ) {
    }

    fn after_variable_changed(
        &mut self,
        _variable: VariableId,
        _entity: EntityId,
        _state: &mut SessionState<E, V>,
    ) {
    }

    fn update_changed(&mut self, _state: &mut SessionState<E, V>) {}

    fn is_entity_inconsistent(&self, _entity: EntityId) -> bool {
        false
    }
}
