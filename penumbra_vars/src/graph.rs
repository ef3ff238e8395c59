// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The reference-graph interface shared by all graph variants.

use penumbra_order::NodeId;

use crate::arena::EntityId;
use crate::registry::VariableId;
use crate::state::SessionState;

/// The contract every reference-graph variant implements.
///
/// A reference graph tracks which derived values must be recomputed after
/// which changes, and drains that obligation on demand. Three variants exist
/// behind this trait, selected once at session assembly by structural
/// analysis:
///
/// - [`EmptyGraph`](crate::EmptyGraph) when no derived variables apply;
/// - [`WorkingGraph`](crate::WorkingGraph) for fixed and general dependency
///   structures (with static-topology and dynamic-topology modes);
/// - [`ChainGraph`](crate::ChainGraph) when every dependency follows one
///   directional successor relation.
///
/// # Protocol
///
/// The caller reports every genuine-value mutation through
/// [`before_variable_changed`](Self::before_variable_changed) /
/// [`after_variable_changed`](Self::after_variable_changed), then calls
/// [`update_changed`](Self::update_changed) once per logical move. Graph
/// mutators ([`add_edge`](Self::add_edge), [`remove_edge`](Self::remove_edge),
/// [`mark_changed`](Self::mark_changed)) are driven by the graph's own
/// registered processors; variants that keep no graph treat calling them as
/// a caller bug and panic.
pub trait ReferenceGraph<E, V> {
    /// Looks up the node registered for the pair, if any.
    fn lookup(&self, variable: VariableId, entity: EntityId) -> Option<NodeId>;

    /// Looks up the node registered for the pair.
    ///
    /// # Panics
    ///
    /// Panics if the pair was never registered; asking for an unregistered
    /// node is a caller bug, not a recoverable condition.
    fn lookup_or_panic(&self, variable: VariableId, entity: EntityId) -> NodeId {
        self.lookup(variable, entity).unwrap_or_else(|| {
            panic!("no node registered for variable {variable:?} on entity {entity:?}")
        })
    }

    /// Flags a node dirty for the next [`update_changed`](Self::update_changed) drain.
    fn mark_changed(&mut self, node: NodeId);

    /// Asserts the dependency edge `from → to` (reference-counted).
    fn add_edge(&mut self, from: NodeId, to: NodeId);

    /// Retracts one assertion of the dependency edge `from → to`.
    fn remove_edge(&mut self, from: NodeId, to: NodeId);

    /// Reacts to a genuine value being about to change on `entity`.
    fn before_variable_changed(
        &mut self,
        variable: VariableId,
        entity: EntityId,
        state: &mut SessionState<E, V>,
    );

    /// Reacts to a genuine value having changed on `entity`.
    fn after_variable_changed(
        &mut self,
        variable: VariableId,
        entity: EntityId,
        state: &mut SessionState<E, V>,
    );

    /// Recomputes every derived value affected by changes reported since the
    /// last drain, in dependency order, exactly once each.
    fn update_changed(&mut self, state: &mut SessionState<E, V>);

    /// Returns the entity's aggregate inconsistency verdict as of the last
    /// drain: `true` when any of its nodes was looped.
    fn is_entity_inconsistent(&self, entity: EntityId) -> bool;
}
