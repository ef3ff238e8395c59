// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The variable registry: declarations of genuine and derived variables.

use core::fmt;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::arena::{EntityArena, EntityId};
use crate::error::AssemblyError;
use crate::navigation::{Source, Step};
use crate::oracle::SequenceOracle;
use crate::state::CalcContext;

/// A dense handle for a declared variable.
///
/// Variable ids are assigned in declaration order by [`RegistryBuilder`] and
/// index flat per-variable tables throughout the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct VariableId(u32);

impl VariableId {
    /// Returns this id as a `usize` index (for flat per-variable tables).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }
}

pub(crate) type ReadFn<E, V> = Box<dyn Fn(&E) -> Option<V>>;
pub(crate) type WriteFn<E, V> = Box<dyn Fn(&mut E, Option<V>)>;
pub(crate) type CalcFn<E, V> = Box<dyn Fn(&CalcContext<'_, E, V>, EntityId) -> Option<V>>;
pub(crate) type RelationReadFn<E> = Box<dyn Fn(&E) -> Option<EntityId>>;
pub(crate) type RelationInverseFn<E> =
    Box<dyn Fn(&EntityArena<E>, EntityId) -> SmallVec<[EntityId; 2]>>;
pub(crate) type FlagReadFn<E> = Box<dyn Fn(&E) -> bool>;
pub(crate) type FlagWriteFn<E> = Box<dyn Fn(&mut E, bool)>;

pub(crate) enum VariableKind<E, V> {
    /// Interned by name but not declared yet; must be resolved by `build`.
    Undeclared,
    /// A genuine stored value, assigned directly by the caller.
    Stored,
    /// A genuine entity-reference used as a navigation step.
    Relation {
        read: RelationReadFn<E>,
        inverse: Option<RelationInverseFn<E>>,
    },
    /// A derived value stored on the entity through its accessors.
    Derived {
        calculator: CalcFn<E, V>,
        read: ReadFn<E, V>,
        write: WriteFn<E, V>,
        sources: Vec<Source<E>>,
    },
    /// A derived value held in session-local scratch, invisible to the
    /// caller and free of change notifications.
    Intermediate {
        calculator: CalcFn<E, V>,
        slot: u32,
        sources: Vec<Source<E>>,
    },
    /// The entity-level inconsistency marker.
    ConsistencyFlag {
        read: FlagReadFn<E>,
        write: FlagWriteFn<E>,
    },
}

impl<E, V> VariableKind<E, V> {
    pub(crate) fn sources(&self) -> Option<&[Source<E>]> {
        match self {
            Self::Derived { sources, .. } | Self::Intermediate { sources, .. } => Some(sources),
            _ => None,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Undeclared => "undeclared",
            Self::Stored => "stored",
            Self::Relation { .. } => "relation",
            Self::Derived { .. } => "derived",
            Self::Intermediate { .. } => "intermediate",
            Self::ConsistencyFlag { .. } => "consistency-flag",
        }
    }
}

/// Declares the variables of an entity type and builds a [`Registry`].
///
/// Names are interned on first mention, so mutually dependent derived
/// variables can reference each other before both are declared:
///
/// ```
/// use penumbra_vars::{RegistryBuilder, Source};
///
/// struct Entity {
///     value: Option<i64>,
///     other_value: Option<i64>,
/// }
///
/// let mut builder = RegistryBuilder::<Entity, i64>::new();
/// let other = builder.id("other");
/// let this = builder.derived(
///     "this",
///     |entity| entity.value,
///     |entity, value| entity.value = value,
///     move |context, entity| context.value(other, entity),
///     vec![Source::identity(other)],
/// );
/// builder.derived(
///     "other",
///     |entity| entity.other_value,
///     |entity, value| entity.other_value = value,
///     move |context, entity| context.value(this, entity),
///     vec![Source::identity(this)],
/// );
/// let registry = builder.build().unwrap();
/// assert_eq!(registry.variable_count(), 2);
/// ```
pub struct RegistryBuilder<E, V> {
    names: Vec<String>,
    index: HashMap<String, VariableId>,
    kinds: Vec<VariableKind<E, V>>,
    consistency_flag: Option<VariableId>,
    scratch_slots: u32,
}

impl<E, V> Default for RegistryBuilder<E, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, V> RegistryBuilder<E, V> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            index: HashMap::new(),
            kinds: Vec::new(),
            consistency_flag: None,
            scratch_slots: 0,
        }
    }

    /// Interns `name` and returns its id, declaring nothing.
    ///
    /// Useful for forward references; [`build`](Self::build) fails if an
    /// interned name is never declared.
    pub fn id(&mut self, name: &str) -> VariableId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = VariableId::new(
            u32::try_from(self.names.len()).expect("too many variables for VariableId (u32)"),
        );
        self.names.push(name.to_owned());
        self.index.insert(name.to_owned(), id);
        self.kinds.push(VariableKind::Undeclared);
        id
    }

    /// Declares a genuine stored value.
    ///
    /// Stored values are written by the caller; the engine only listens to
    /// their change notifications.
    pub fn stored(&mut self, name: &str) -> VariableId {
        self.define(name, VariableKind::Stored)
    }

    /// Declares a genuine entity-reference relation with no inverse.
    pub fn relation(
        &mut self,
        name: &str,
        read: impl Fn(&E) -> Option<EntityId> + 'static,
    ) -> VariableId {
        self.define(
            name,
            VariableKind::Relation {
                read: Box::new(read),
                inverse: None,
            },
        )
    }

    /// Declares a genuine entity-reference relation with an inverse
    /// accessor ("which entities point at this one").
    ///
    /// The inverse is required when a *stored* value is sourced across the
    /// relation; derived sources only navigate forwards.
    pub fn relation_with_inverse(
        &mut self,
        name: &str,
        read: impl Fn(&E) -> Option<EntityId> + 'static,
        inverse: impl Fn(&EntityArena<E>, EntityId) -> SmallVec<[EntityId; 2]> + 'static,
    ) -> VariableId {
        self.define(
            name,
            VariableKind::Relation {
                read: Box::new(read),
                inverse: Some(Box::new(inverse)),
            },
        )
    }

    /// Declares a derived value stored on the entity.
    ///
    /// `read`/`write` access the stored value (`None` is the "unknown"
    /// sentinel); `calculator` recomputes it from the entity's sources.
    pub fn derived(
        &mut self,
        name: &str,
        read: impl Fn(&E) -> Option<V> + 'static,
        write: impl Fn(&mut E, Option<V>) + 'static,
        calculator: impl Fn(&CalcContext<'_, E, V>, EntityId) -> Option<V> + 'static,
        sources: Vec<Source<E>>,
    ) -> VariableId {
        self.define(
            name,
            VariableKind::Derived {
                calculator: Box::new(calculator),
                read: Box::new(read),
                write: Box::new(write),
                sources,
            },
        )
    }

    /// Declares a derived value held in session-local scratch.
    ///
    /// Intermediates participate in the dependency graph like any derived
    /// variable but are not user-visible: no accessors, no notifications.
    pub fn intermediate(
        &mut self,
        name: &str,
        calculator: impl Fn(&CalcContext<'_, E, V>, EntityId) -> Option<V> + 'static,
        sources: Vec<Source<E>>,
    ) -> VariableId {
        let slot = self.scratch_slots;
        self.scratch_slots += 1;
        self.define(
            name,
            VariableKind::Intermediate {
                calculator: Box::new(calculator),
                slot,
                sources,
            },
        )
    }

    /// Declares the entity-level inconsistency marker.
    ///
    /// At most one flag may be declared. When an entity's aggregate loop
    /// status flips, the flag is rewritten through `write` inside a
    /// before/after notification pair. Without a declared flag, flips
    /// piggyback on the entity's first derived variable's notifications.
    pub fn consistency_flag(
        &mut self,
        name: &str,
        read: impl Fn(&E) -> bool + 'static,
        write: impl Fn(&mut E, bool) + 'static,
    ) -> VariableId {
        assert!(
            self.consistency_flag.is_none(),
            "a consistency flag is already declared"
        );
        let id = self.define(
            name,
            VariableKind::ConsistencyFlag {
                read: Box::new(read),
                write: Box::new(write),
            },
        );
        self.consistency_flag = Some(id);
        id
    }

    fn define(&mut self, name: &str, kind: VariableKind<E, V>) -> VariableId {
        let id = self.id(name);
        assert!(
            matches!(self.kinds[id.index()], VariableKind::Undeclared),
            "duplicate declaration of variable `{name}`"
        );
        self.kinds[id.index()] = kind;
        id
    }

    /// Validates the declarations and produces a [`Registry`].
    ///
    /// # Errors
    ///
    /// Returns an [`AssemblyError`] for configuration mistakes: names
    /// interned but never declared, derived variables without sources,
    /// navigation through derived variables, relation steps naming
    /// non-relations, stored sources across relations with no inverse, and
    /// sequence steps signaled by non-genuine variables.
    pub fn build(self) -> Result<Registry<E, V>, AssemblyError> {
        let registry = Registry {
            names: self.names,
            kinds: self.kinds,
            node_variables: Vec::new(),
            consistency_flag: self.consistency_flag,
            scratch_slots: self.scratch_slots,
        };
        registry.validate()
    }
}

impl<E, V> fmt::Debug for RegistryBuilder<E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

/// The validated, immutable variable declarations of one entity type.
///
/// Built once at startup by [`RegistryBuilder`] and shared by reference with
/// every session; the engine holds no other global state (no process-wide
/// accessor caches).
pub struct Registry<E, V> {
    names: Vec<String>,
    kinds: Vec<VariableKind<E, V>>,
    /// Derived and intermediate variables, in declaration order; these are
    /// the variables that own graph nodes.
    node_variables: Vec<VariableId>,
    consistency_flag: Option<VariableId>,
    scratch_slots: u32,
}

impl<E, V> Registry<E, V> {
    /// Returns the number of declared variables of any kind.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.names.len()
    }

    /// Returns the declared name of `variable`.
    #[must_use]
    pub fn name(&self, variable: VariableId) -> &str {
        &self.names[variable.index()]
    }

    /// Returns the node-owning (derived and intermediate) variables in
    /// declaration order.
    #[must_use]
    pub fn node_variables(&self) -> &[VariableId] {
        &self.node_variables
    }

    /// Returns the declared consistency flag, if any.
    #[must_use]
    pub fn consistency_flag(&self) -> Option<VariableId> {
        self.consistency_flag
    }

    pub(crate) fn kind(&self, variable: VariableId) -> &VariableKind<E, V> {
        &self.kinds[variable.index()]
    }

    pub(crate) fn scratch_slots(&self) -> u32 {
        self.scratch_slots
    }

    pub(crate) fn is_node_variable(&self, variable: VariableId) -> bool {
        matches!(
            self.kind(variable),
            VariableKind::Derived { .. } | VariableKind::Intermediate { .. }
        )
    }

    /// Resolves `step` from `entity`, appending every target entity to `out`.
    pub(crate) fn resolve_step(
        &self,
        oracle: &dyn SequenceOracle<E>,
        arena: &EntityArena<E>,
        step: &Step<E>,
        entity: EntityId,
        out: &mut SmallVec<[EntityId; 4]>,
    ) {
        match step {
            Step::Identity => out.push(entity),
            Step::Relation(relation) => {
                let VariableKind::Relation { read, .. } = self.kind(*relation) else {
                    unreachable!("validated at registry build");
                };
                out.extend(read(arena.get(entity)));
            }
            Step::Previous { .. } => out.extend(oracle.previous(arena, entity)),
            Step::Next { .. } => out.extend(oracle.next(arena, entity)),
            Step::Inverse { .. } => out.extend(oracle.inverse(arena, entity)),
            Step::Fact(fact) => out.extend(fact(arena.get(entity))),
            Step::Group(group) => out.extend(group(arena.get(entity))),
        }
    }

    /// Resolves the inverse of a relation step: the entities whose relation
    /// points at `entity`.
    pub(crate) fn resolve_relation_inverse(
        &self,
        relation: VariableId,
        arena: &EntityArena<E>,
        entity: EntityId,
    ) -> SmallVec<[EntityId; 2]> {
        let VariableKind::Relation {
            inverse: Some(inverse),
            ..
        } = self.kind(relation)
        else {
            unreachable!("validated at registry build");
        };
        inverse(arena, entity)
    }

    fn validate(mut self) -> Result<Self, AssemblyError> {
        for (index, kind) in self.kinds.iter().enumerate() {
            if matches!(kind, VariableKind::Undeclared) {
                return Err(AssemblyError::UndeclaredVariable {
                    name: self.names[index].clone(),
                });
            }
        }

        for index in 0..self.kinds.len() {
            let variable = VariableId::new(index as u32);
            let Some(sources) = self.kinds[index].sources() else {
                continue;
            };
            if sources.is_empty() {
                return Err(AssemblyError::NoSources {
                    variable: self.names[index].clone(),
                });
            }
            for source in sources {
                self.validate_source(variable, source)?;
            }
        }

        self.node_variables = (0..self.kinds.len() as u32)
            .map(VariableId::new)
            .filter(|&variable| self.is_node_variable(variable))
            .collect();
        Ok(self)
    }

    fn validate_source(
        &self,
        variable: VariableId,
        source: &Source<E>,
    ) -> Result<(), AssemblyError> {
        let variable_name = || self.name(variable).to_owned();

        let terminal = self.kind(source.variable);
        match terminal {
            VariableKind::Stored | VariableKind::Derived { .. } | VariableKind::Intermediate { .. } => {}
            VariableKind::Undeclared => unreachable!("checked before source validation"),
            VariableKind::Relation { .. } | VariableKind::ConsistencyFlag { .. } => {
                return Err(AssemblyError::InvalidSourceVariable {
                    variable: variable_name(),
                    source: format!(
                        "{} ({})",
                        self.name(source.variable),
                        terminal.describe()
                    ),
                });
            }
        }
        let terminal_is_stored = matches!(terminal, VariableKind::Stored);

        match &source.step {
            Step::Identity | Step::Fact(_) | Step::Group(_) => {}
            Step::Relation(relation) => match self.kind(*relation) {
                VariableKind::Relation { inverse, .. } => {
                    if terminal_is_stored && inverse.is_none() {
                        return Err(AssemblyError::MissingInverse {
                            variable: variable_name(),
                            relation: self.name(*relation).to_owned(),
                        });
                    }
                }
                VariableKind::Derived { .. } | VariableKind::Intermediate { .. } => {
                    return Err(AssemblyError::DerivedInsidePath {
                        variable: variable_name(),
                        step_variable: self.name(*relation).to_owned(),
                    });
                }
                _ => {
                    return Err(AssemblyError::NotARelation {
                        variable: variable_name(),
                        step_variable: self.name(*relation).to_owned(),
                    });
                }
            },
            Step::Previous { signaled_by } | Step::Next { signaled_by } => {
                self.validate_signal(variable, *signaled_by)?;
            }
            Step::Inverse { signaled_by } => {
                self.validate_signal(variable, *signaled_by)?;
                if terminal_is_stored {
                    return Err(AssemblyError::InverseStepOnStoredSource {
                        variable: variable_name(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_signal(
        &self,
        variable: VariableId,
        signal: VariableId,
    ) -> Result<(), AssemblyError> {
        match self.kind(signal) {
            VariableKind::Stored | VariableKind::Relation { .. } => Ok(()),
            _ => Err(AssemblyError::SignalNotGenuine {
                variable: self.name(variable).to_owned(),
                signal: self.name(signal).to_owned(),
            }),
        }
    }
}

impl<E, V> fmt::Debug for Registry<E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names)
            .field("node_variables", &self.node_variables)
            .finish_non_exhaustive()
    }
}
