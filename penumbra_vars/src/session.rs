// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session assembly and the per-move update API.

use core::fmt;
use std::rc::Rc;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::arena::EntityId;
use crate::builder::GraphBuilder;
use crate::chain::ChainGraph;
use crate::empty::EmptyGraph;
use crate::error::AssemblyError;
use crate::graph::ReferenceGraph;
use crate::navigation::Step;
use crate::notifier::{ChangeNotifier, NoopNotifier};
use crate::oracle::{NoSequence, SequenceOracle};
use crate::processor::{InverseRef, Processor, StepRef};
use crate::registry::{Registry, VariableId};
use crate::state::SessionState;
use crate::structure::{sorted_node_variables, GraphStructure};
use crate::working::{Topology, WorkingGraph};

/// Builds [`Session`]s for a validated [`Registry`].
///
/// The factory owns the startup-time configuration — the registry and the
/// sequence oracle — and assembles a fresh session (graph included) for each
/// change-resolution run. Sessions are not reused across entity populations;
/// rebuilding is the supported lifecycle.
pub struct SessionFactory<E, V> {
    registry: Rc<Registry<E, V>>,
    oracle: Rc<dyn SequenceOracle<E>>,
    structure_override: Option<GraphStructure>,
}

impl<E: 'static, V: Clone + PartialEq + 'static> SessionFactory<E, V> {
    /// Creates a factory with no sequence oracle.
    #[must_use]
    pub fn new(registry: Registry<E, V>) -> Self {
        Self {
            registry: Rc::new(registry),
            oracle: Rc::new(NoSequence),
            structure_override: None,
        }
    }

    /// Supplies the sequence oracle backing `previous`/`next`/`inverse`
    /// steps.
    #[must_use]
    pub fn with_oracle(mut self, oracle: impl SequenceOracle<E> + 'static) -> Self {
        self.oracle = Rc::new(oracle);
        self
    }

    /// Forces a specific graph structure instead of classifying.
    ///
    /// Every variant honors the same external contract; this forces the
    /// general machinery onto a specialized shape (or vice versa), which is
    /// mainly useful for differential testing.
    #[must_use]
    pub fn with_structure(mut self, structure: GraphStructure) -> Self {
        self.structure_override = Some(structure);
        self
    }

    /// Returns the factory's registry.
    #[must_use]
    pub fn registry(&self) -> &Registry<E, V> {
        &self.registry
    }

    /// Assembles a session over `entities` with no change-notification sink.
    ///
    /// # Errors
    ///
    /// Returns an [`AssemblyError`] when the fixed dependency edges contain
    /// a cycle.
    pub fn session(&self, entities: Vec<E>) -> Result<Session<E, V>, AssemblyError> {
        self.session_with_notifier(entities, Box::new(NoopNotifier))
    }

    /// Assembles a session over `entities`, reporting every engine-performed
    /// write to `notifier`.
    ///
    /// # Errors
    ///
    /// Returns an [`AssemblyError`] when the fixed dependency edges contain
    /// a cycle.
    pub fn session_with_notifier(
        &self,
        entities: Vec<E>,
        notifier: Box<dyn ChangeNotifier>,
    ) -> Result<Session<E, V>, AssemblyError> {
        let mut state =
            SessionState::new(&self.registry, entities, notifier, self.oracle.clone());
        let structure = self
            .structure_override
            .unwrap_or_else(|| GraphStructure::classify(&self.registry, state.arena.len()));
        tracing::trace!(?structure, entities = state.arena.len(), "classified dependency structure");

        let graph: Box<dyn ReferenceGraph<E, V>> = match structure {
            GraphStructure::Empty => Box::new(EmptyGraph),
            GraphStructure::SingleDirectionalParent(direction) => Box::new(ChainGraph::new(
                self.registry.clone(),
                sorted_node_variables(&self.registry),
                direction,
                state.arena.len(),
            )),
            GraphStructure::NoDynamicEdges => {
                Box::new(self.build_working(Topology::Static, &mut state)?)
            }
            GraphStructure::Arbitrary => {
                Box::new(self.build_working(Topology::Dynamic, &mut state)?)
            }
        };
        tracing::debug!(
            entities = state.arena.len(),
            variables = self.registry.variable_count(),
            "assembled shadow-variable session"
        );
        Ok(Session {
            registry: self.registry.clone(),
            graph,
            state,
        })
    }

    /// Assembles the graph-backed variant: nodes for every (derived
    /// variable, entity) pair, fixed edges for relationship-independent
    /// derived sources, and processors for everything that has to react to
    /// genuine-value notifications.
    fn build_working(
        &self,
        topology: Topology,
        state: &mut SessionState<E, V>,
    ) -> Result<WorkingGraph<E, V>, AssemblyError> {
        let registry = &self.registry;
        let mut builder = GraphBuilder::new(self.registry.clone(), state.arena.len());

        for entity in state.arena.ids() {
            for &variable in registry.node_variables() {
                builder.add_node(variable, entity);
            }
        }

        let mut resolved: SmallVec<[EntityId; 4]> = SmallVec::new();
        for &target in registry.node_variables() {
            let sources = registry
                .kind(target)
                .sources()
                .expect("node variables declare sources");
            for source in sources {
                let source_is_node = registry.is_node_variable(source.variable);
                match &source.step {
                    Step::Identity | Step::Fact(_) | Step::Group(_) if source_is_node => {
                        // Relationship-independent derived source: a fixed
                        // edge per reachable source entity.
                        for entity in state.arena.ids() {
                            resolved.clear();
                            registry.resolve_step(
                                state.oracle.as_ref(),
                                &state.arena,
                                &source.step,
                                entity,
                                &mut resolved,
                            );
                            let to = builder
                                .lookup(target, entity)
                                .expect("all pairs were registered above");
                            for &from_entity in &resolved {
                                let from = builder
                                    .lookup(source.variable, from_entity)
                                    .expect("all pairs were registered above");
                                builder.add_fixed_edge(from, to);
                            }
                        }
                    }
                    Step::Identity => {
                        // Stored source on the dependent entity itself.
                        builder.add_after(source.variable, Processor::Mark { target });
                    }
                    Step::Fact(_) | Step::Group(_) => {
                        // Stored source on entities found through immutable
                        // navigation: precompute the inverse once.
                        let mut table: HashMap<EntityId, SmallVec<[EntityId; 2]>> =
                            HashMap::new();
                        for entity in state.arena.ids() {
                            resolved.clear();
                            registry.resolve_step(
                                state.oracle.as_ref(),
                                &state.arena,
                                &source.step,
                                entity,
                                &mut resolved,
                            );
                            for &source_entity in &resolved {
                                table.entry(source_entity).or_default().push(entity);
                            }
                        }
                        let table = builder.add_inverse_table(table);
                        builder.add_after(
                            source.variable,
                            Processor::MarkInverse {
                                target,
                                inverse: InverseRef::Table(table),
                            },
                        );
                    }
                    Step::Relation(_) | Step::Previous { .. } | Step::Next { .. }
                    | Step::Inverse { .. } => {
                        let signal = source.step.signal().expect("dynamic steps carry a signal");
                        if source_is_node {
                            // Derived source across a mutable relationship:
                            // an alias edge, re-pointed around every signal
                            // notification.
                            let step = match &source.step {
                                Step::Relation(relation) => StepRef::Relation(*relation),
                                Step::Previous { .. } => StepRef::OraclePrevious,
                                Step::Next { .. } => StepRef::OracleNext,
                                Step::Inverse { .. } => StepRef::OracleInverse,
                                _ => unreachable!("outer match arm is dynamic"),
                            };
                            builder.add_before(
                                signal,
                                Processor::RemoveAliasEdge {
                                    source: source.variable,
                                    target,
                                    step,
                                },
                            );
                            builder.add_after(
                                signal,
                                Processor::AddAliasEdge {
                                    source: source.variable,
                                    target,
                                    step,
                                },
                            );
                        } else {
                            // Stored source across a mutable relationship:
                            // route the change to dependents through the
                            // step's inverse, and re-source the dependent
                            // when its own relationship moves.
                            let inverse = match &source.step {
                                Step::Relation(relation) => InverseRef::Relation(*relation),
                                Step::Previous { .. } => InverseRef::OracleNext,
                                Step::Next { .. } => InverseRef::OraclePrevious,
                                Step::Inverse { .. } => {
                                    unreachable!("rejected at registry build")
                                }
                                _ => unreachable!("outer match arm is dynamic"),
                            };
                            builder.add_after(
                                source.variable,
                                Processor::MarkInverse { target, inverse },
                            );
                            builder.add_after(signal, Processor::Mark { target });
                        }
                    }
                }
            }
        }

        builder.build(topology, state)
    }
}

impl<E, V> fmt::Debug for SessionFactory<E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("registry", &self.registry)
            .field("structure_override", &self.structure_override)
            .finish_non_exhaustive()
    }
}

/// One change-resolution session: a set of entities, their derived-variable
/// graph, and the update loop.
///
/// The intended rhythm, once per logical move of the surrounding search:
///
/// 1. Apply every genuine-value mutation through [`change`](Self::change)
///    (or bracket external mutations with
///    [`before_variable_changed`](Self::before_variable_changed) /
///    [`after_variable_changed`](Self::after_variable_changed)).
/// 2. Call [`update_variables`](Self::update_variables) once to propagate.
/// 3. Read derived values and [`is_entity_inconsistent`](Self::is_entity_inconsistent)
///    verdicts.
///
/// Call [`update_variables`](Self::update_variables) once right after
/// assembly to establish the initial derived values.
pub struct Session<E, V> {
    registry: Rc<Registry<E, V>>,
    graph: Box<dyn ReferenceGraph<E, V>>,
    state: SessionState<E, V>,
}

impl<E: 'static, V: Clone + PartialEq + 'static> Session<E, V> {
    /// Returns the registry this session was built from.
    #[must_use]
    pub fn registry(&self) -> &Registry<E, V> {
        &self.registry
    }

    /// Returns the entity for `id`.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> &E {
        self.state.arena.get(id)
    }

    /// Returns an iterator over the session's entity ids.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + use<E, V> {
        self.state.arena.ids()
    }

    /// Mutates a genuine value, bracketing the write in the before/after
    /// reactions the graph registered for `variable`.
    ///
    /// The mutation itself is the closure's job; the engine only needs to
    /// know *that* the variable on this entity is changing, not how.
    pub fn change<R>(
        &mut self,
        variable: VariableId,
        entity: EntityId,
        f: impl FnOnce(&mut E) -> R,
    ) -> R {
        self.graph
            .before_variable_changed(variable, entity, &mut self.state);
        let out = f(self.state.arena.get_mut(entity));
        self.graph
            .after_variable_changed(variable, entity, &mut self.state);
        out
    }

    /// Reports that a genuine value is about to change outside the session.
    ///
    /// Prefer [`change`](Self::change); use this pair only when the mutation
    /// happens through state the session does not own (e.g. an external
    /// sequence the oracle reads).
    pub fn before_variable_changed(&mut self, variable: VariableId, entity: EntityId) {
        self.graph
            .before_variable_changed(variable, entity, &mut self.state);
    }

    /// Reports that a genuine value changed outside the session.
    pub fn after_variable_changed(&mut self, variable: VariableId, entity: EntityId) {
        self.graph
            .after_variable_changed(variable, entity, &mut self.state);
    }

    /// Drains all pending dirtiness: recomputes every affected derived
    /// value, in dependency order, exactly once.
    ///
    /// A drain with nothing pending returns immediately.
    pub fn update_variables(&mut self) {
        self.graph.update_changed(&mut self.state);
    }

    /// Reads the current value of a derived or intermediate variable.
    ///
    /// # Panics
    ///
    /// Panics if `variable` is not derived or intermediate.
    #[must_use]
    pub fn value(&self, variable: VariableId, entity: EntityId) -> Option<V> {
        self.state.read_value(&self.registry, variable, entity)
    }

    /// Returns the entity's aggregate inconsistency verdict as of the last
    /// [`update_variables`](Self::update_variables): `true` when any of its
    /// derived values is trapped in (or downstream of) a dependency loop.
    #[must_use]
    pub fn is_entity_inconsistent(&self, entity: EntityId) -> bool {
        self.graph.is_entity_inconsistent(entity)
    }
}

impl<E, V> fmt::Debug for Session<E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
