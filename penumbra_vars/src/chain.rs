// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The single-directional-parent reference graph.

use core::fmt;
use std::rc::Rc;

use hashbrown::HashMap;
use penumbra_order::NodeId;

use crate::arena::EntityId;
use crate::graph::ReferenceGraph;
use crate::registry::{Registry, VariableId, VariableKind};
use crate::state::{CalcContext, SessionState};
use crate::structure::Direction;

/// Where the dependent of a changed genuine value sits.
#[derive(Copy, Clone, Debug, Default)]
struct Trigger {
    /// The changed entity itself carries a dependent.
    here: bool,
    /// The changed entity's walk successor carries a dependent.
    successor: bool,
}

/// The reference graph used when every dependency chain follows one fixed
/// successor relation.
///
/// No nodes and no edges exist: propagation is a straight walk down the
/// sequence from each changed entity, recomputing the derived variables in
/// their pre-sorted order, stopping at the first entity whose values all
/// recompute unchanged — nothing further downstream could be affected.
/// Cycles are impossible by construction, so nothing is ever looped.
///
/// Because it keeps no graph at all, the graph-facing mutators and lookups
/// ([`lookup`](ReferenceGraph::lookup), [`mark_changed`](ReferenceGraph::mark_changed),
/// [`add_edge`](ReferenceGraph::add_edge), [`remove_edge`](ReferenceGraph::remove_edge))
/// are caller bugs and panic.
pub struct ChainGraph<E, V> {
    registry: Rc<Registry<E, V>>,
    /// Node variables in variable-level dependency order.
    sorted_variables: Vec<VariableId>,
    /// Genuine variables whose change dirties an entity, and where the
    /// dependent sits relative to the changed entity.
    triggers: HashMap<VariableId, Trigger>,
    direction: Direction,
    dirty: Vec<EntityId>,
    dirty_bits: Vec<bool>,
    visited: Vec<bool>,
}

impl<E: 'static, V: Clone + PartialEq + 'static> ChainGraph<E, V> {
    pub(crate) fn new(
        registry: Rc<Registry<E, V>>,
        sorted_variables: Vec<VariableId>,
        direction: Direction,
        entity_count: usize,
    ) -> Self {
        let mut triggers: HashMap<VariableId, Trigger> = HashMap::new();
        for &variable in registry.node_variables() {
            let sources = registry
                .kind(variable)
                .sources()
                .expect("node variables declare sources");
            for source in sources {
                if matches!(registry.kind(source.variable), VariableKind::Stored) {
                    // A stored source on the dependent itself dirties the
                    // changed entity; one read across the directional step
                    // dirties the changed entity's walk successor.
                    let trigger = triggers.entry(source.variable).or_default();
                    if source.step.is_dynamic() {
                        trigger.successor = true;
                    } else {
                        trigger.here = true;
                    }
                }
                if let Some(signal) = source.step.signal() {
                    // The sequence around the changed entity moved; its own
                    // sources now resolve differently.
                    triggers.entry(signal).or_default().here = true;
                }
            }
        }

        let mut graph = Self {
            registry,
            sorted_variables,
            triggers,
            direction,
            dirty: Vec::with_capacity(entity_count),
            dirty_bits: vec![false; entity_count],
            visited: vec![false; entity_count],
        };
        // The first drain walks every entity once to establish initial
        // values.
        #[expect(clippy::cast_possible_truncation, reason = "entity ids fit u32")]
        for index in 0..entity_count {
            graph.mark_entity(EntityId::new(index as u32));
        }
        graph
    }

    fn mark_entity(&mut self, entity: EntityId) {
        if !self.dirty_bits[entity.index()] {
            self.dirty_bits[entity.index()] = true;
            self.dirty.push(entity);
        }
    }

    fn successor(&self, state: &SessionState<E, V>, entity: EntityId) -> Option<EntityId> {
        match self.direction {
            Direction::Forward => state.oracle.next(&state.arena, entity),
            Direction::Backward => state.oracle.previous(&state.arena, entity),
        }
    }

    /// Recomputes every derived variable of `entity`; returns `true` if any
    /// stored value changed.
    fn recompute_entity(&self, state: &mut SessionState<E, V>, entity: EntityId) -> bool {
        let mut any_changed = false;
        for &variable in &self.sorted_variables {
            let old = state.read_value(&self.registry, variable, entity);
            let new = {
                let context = CalcContext {
                    registry: self.registry.as_ref(),
                    state: &*state,
                };
                match self.registry.kind(variable) {
                    VariableKind::Derived { calculator, .. }
                    | VariableKind::Intermediate { calculator, .. } => calculator(&context, entity),
                    _ => unreachable!("sorted variables are node variables"),
                }
            };
            if new != old {
                state.write_value(&self.registry, variable, entity, new);
                any_changed = true;
            }
        }
        any_changed
    }
}

impl<E: 'static, V: Clone + PartialEq + 'static> ReferenceGraph<E, V> for ChainGraph<E, V> {
    fn lookup(&self, _variable: VariableId, _entity: EntityId) -> Option<NodeId> {
        panic!("the single-directional-parent graph keeps no nodes to look up");
    }

    fn mark_changed(&mut self, _node: NodeId) {
        panic!("the single-directional-parent graph keeps its own change bookkeeping");
    }

    fn add_edge(&mut self, _from: NodeId, _to: NodeId) {
        panic!("the single-directional-parent graph keeps no edges");
    }

    fn remove_edge(&mut self, _from: NodeId, _to: NodeId) {
        panic!("the single-directional-parent graph keeps no edges");
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
        variable: VariableId,
        entity: EntityId,
        state: &mut SessionState<E, V>,
    ) {
        let Some(&trigger) = self.triggers.get(&variable) else {
            return;
        };
        if trigger.here {
            self.mark_entity(entity);
        }
        if trigger.successor
            && let Some(successor) = self.successor(state, entity)
        {
            self.mark_entity(successor);
        }
    }

    fn update_changed(&mut self, state: &mut SessionState<E, V>) {
        if self.dirty.is_empty() {
            return;
        }

        // Walk upstream roots first so their walks subsume downstream ones.
        match self.direction {
            Direction::Forward => self
                .dirty
                .sort_by_key(|&entity| state.oracle.position(&state.arena, entity)),
            Direction::Backward => self
                .dirty
                .sort_by_key(|&entity| std::cmp::Reverse(state.oracle.position(&state.arena, entity))),
        }

        let mut visits = 0usize;
        for index in 0..self.dirty.len() {
            let mut entity = self.dirty[index];
            loop {
                if self.visited[entity.index()] {
                    break;
                }
                self.visited[entity.index()] = true;
                visits += 1;
                if !self.recompute_entity(state, entity) {
                    break;
                }
                match self.successor(state, entity) {
                    Some(successor) => entity = successor,
                    None => break,
                }
            }
        }

        tracing::trace!(visits, roots = self.dirty.len(), "drained successor walks");

        for index in 0..self.dirty.len() {
            self.dirty_bits[self.dirty[index].index()] = false;
        }
        self.dirty.clear();
        self.visited.fill(false);
    }

    fn is_entity_inconsistent(&self, _entity: EntityId) -> bool {
        false
    }
}

impl<E, V> fmt::Debug for ChainGraph<E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainGraph")
            .field("direction", &self.direction)
            .field("sorted_variables", &self.sorted_variables)
            .field("dirty", &self.dirty.len())
            .finish_non_exhaustive()
    }
}
