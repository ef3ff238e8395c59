// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mutable session state: entities, scratch values, notifier, oracle.

use core::fmt;
use std::rc::Rc;

use crate::arena::{EntityArena, EntityId};
use crate::notifier::ChangeNotifier;
use crate::oracle::SequenceOracle;
use crate::registry::{Registry, VariableId, VariableKind};

/// The mutable world one session operates on.
///
/// Bundles the entity arena, the scratch storage of intermediate variables,
/// the change-notification sink and the sequence oracle. The reference graph
/// borrows this state during processor dispatch (read-only navigation) and
/// during drains (value reads and writes); keeping it separate from the
/// graph keeps those borrows disjoint.
pub struct SessionState<E, V> {
    pub(crate) arena: EntityArena<E>,
    /// Per intermediate-variable slot, per entity: the cached value.
    pub(crate) scratch: Vec<Vec<Option<V>>>,
    pub(crate) notifier: Box<dyn ChangeNotifier>,
    pub(crate) oracle: Rc<dyn SequenceOracle<E>>,
}

impl<E, V: Clone + PartialEq> SessionState<E, V> {
    pub(crate) fn new(
        registry: &Registry<E, V>,
        entities: Vec<E>,
        notifier: Box<dyn ChangeNotifier>,
        oracle: Rc<dyn SequenceOracle<E>>,
    ) -> Self {
        let arena = EntityArena::new(entities);
        let scratch = vec![vec![None; arena.len()]; registry.scratch_slots() as usize];
        Self {
            arena,
            scratch,
            notifier,
            oracle,
        }
    }

    /// Returns the entity arena.
    #[must_use]
    pub fn arena(&self) -> &EntityArena<E> {
        &self.arena
    }

    /// Reads the current value of a derived or intermediate variable.
    pub(crate) fn read_value(
        &self,
        registry: &Registry<E, V>,
        variable: VariableId,
        entity: EntityId,
    ) -> Option<V> {
        match registry.kind(variable) {
            VariableKind::Derived { read, .. } => read(self.arena.get(entity)),
            VariableKind::Intermediate { slot, .. } => {
                self.scratch[*slot as usize][entity.index()].clone()
            }
            _ => panic!(
                "variable `{}` carries no derived value",
                registry.name(variable)
            ),
        }
    }

    /// Writes a derived or intermediate value.
    ///
    /// Derived writes go through the entity accessor inside a before/after
    /// notification pair; intermediate writes update scratch silently.
    /// Callers are responsible for only writing on actual change.
    pub(crate) fn write_value(
        &mut self,
        registry: &Registry<E, V>,
        variable: VariableId,
        entity: EntityId,
        value: Option<V>,
    ) {
        match registry.kind(variable) {
            VariableKind::Derived { write, .. } => {
                self.notifier.before_variable_changed(variable, entity);
                write(self.arena.get_mut(entity), value);
                self.notifier.after_variable_changed(variable, entity);
            }
            VariableKind::Intermediate { slot, .. } => {
                self.scratch[*slot as usize][entity.index()] = value;
            }
            _ => panic!(
                "variable `{}` carries no derived value",
                registry.name(variable)
            ),
        }
    }

    /// Writes the entity-level consistency flag (or fires the piggyback
    /// notification when no flag is declared).
    ///
    /// `piggyback` is the variable whose notifications stand in for the
    /// missing flag; it must be one of the entity's derived variables.
    pub(crate) fn write_consistency(
        &mut self,
        registry: &Registry<E, V>,
        entity: EntityId,
        inconsistent: bool,
        piggyback: VariableId,
    ) {
        if let Some(flag) = registry.consistency_flag() {
            let VariableKind::ConsistencyFlag { write, .. } = registry.kind(flag) else {
                unreachable!("consistency flag id always names a flag kind");
            };
            self.notifier.before_variable_changed(flag, entity);
            write(self.arena.get_mut(entity), inconsistent);
            self.notifier.after_variable_changed(flag, entity);
        } else {
            // No declared flag: the flip itself must still be observable, so
            // fire a notification pair on a derived variable of the entity
            // without touching its value.
            self.notifier.before_variable_changed(piggyback, entity);
            self.notifier.after_variable_changed(piggyback, entity);
        }
    }
}

impl<E, V> fmt::Debug for SessionState<E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("arena", &self.arena)
            .field("scratch_slots", &self.scratch.len())
            .finish_non_exhaustive()
    }
}

/// Read-only view handed to calculator functions.
///
/// A calculator computes one derived value from the current state of the
/// world: its own entity, neighboring entities, other derived values and the
/// sequence oracle. Calculators must be pure — same state in, same value
/// out — and must not rely on any particular recomputation order beyond what
/// their declared sources imply.
pub struct CalcContext<'a, E, V> {
    pub(crate) registry: &'a Registry<E, V>,
    pub(crate) state: &'a SessionState<E, V>,
}

impl<E, V: Clone + PartialEq> CalcContext<'_, E, V> {
    /// Returns the entity for `id`.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> &E {
        self.state.arena.get(id)
    }

    /// Returns the entity arena.
    #[must_use]
    pub fn arena(&self) -> &EntityArena<E> {
        &self.state.arena
    }

    /// Reads the current value of a derived or intermediate variable.
    ///
    /// When the named variable was declared as a source of the calculator's
    /// variable, the propagation order guarantees this value is up to date
    /// (unless the node is looped, in which case it reads as `None`).
    #[must_use]
    pub fn value(&self, variable: VariableId, entity: EntityId) -> Option<V> {
        self.state.read_value(self.registry, variable, entity)
    }

    /// Returns the sequence predecessor of `entity`, if any.
    #[must_use]
    pub fn previous(&self, entity: EntityId) -> Option<EntityId> {
        self.state.oracle.previous(&self.state.arena, entity)
    }

    /// Returns the sequence successor of `entity`, if any.
    #[must_use]
    pub fn next(&self, entity: EntityId) -> Option<EntityId> {
        self.state.oracle.next(&self.state.arena, entity)
    }

    /// Returns the sequence anchor of `entity`, if any.
    #[must_use]
    pub fn inverse(&self, entity: EntityId) -> Option<EntityId> {
        self.state.oracle.inverse(&self.state.arena, entity)
    }
}

impl<E, V> fmt::Debug for CalcContext<'_, E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalcContext").finish_non_exhaustive()
    }
}
