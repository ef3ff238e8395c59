// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Navigation steps of source paths.

use core::fmt;

use smallvec::SmallVec;

use crate::arena::EntityId;
use crate::registry::VariableId;

/// The entity-valued result of a fact step.
pub type FactFn<E> = Box<dyn Fn(&E) -> Option<EntityId>>;

/// The fan-out of a group step: the ordered sibling entities of an entity.
pub type GroupFn<E> = Box<dyn Fn(&E) -> SmallVec<[EntityId; 4]>>;

/// One navigation step of a source path: how to get from the dependent
/// entity to the entity carrying the source value.
///
/// A step answers "given this entity, which entity (or entities) does the
/// path visit next". Steps fall into two families:
///
/// - **Fixed** steps ([`Identity`](Self::Identity), [`Fact`](Self::Fact),
///   [`Group`](Self::Group)) never change for the lifetime of a session;
///   sources through them become fixed graph edges or assembly-time inverse
///   maps.
/// - **Dynamic** steps ([`Relation`](Self::Relation),
///   [`Previous`](Self::Previous), [`Next`](Self::Next),
///   [`Inverse`](Self::Inverse)) follow a relationship value that mutates
///   during the session; sources through them become alias edges that are
///   re-pointed whenever the step's signal variable reports a change.
pub enum Step<E> {
    /// The source value lives on the dependent entity itself.
    Identity,
    /// Follow a declared relation variable.
    ///
    /// The relation's own change notifications signal edge re-pointing.
    Relation(VariableId),
    /// Follow the sequence oracle's `previous` relation.
    Previous {
        /// The genuine variable whose notifications signal that the
        /// sequence around an entity changed.
        signaled_by: VariableId,
    },
    /// Follow the sequence oracle's `next` relation.
    Next {
        /// The genuine variable whose notifications signal that the
        /// sequence around an entity changed.
        signaled_by: VariableId,
    },
    /// Follow the sequence oracle's `inverse` relation.
    Inverse {
        /// The genuine variable whose notifications signal that the
        /// sequence around an entity changed.
        signaled_by: VariableId,
    },
    /// Follow an immutable function of the entity.
    Fact(FactFn<E>),
    /// Fan out to an ordered group of sibling entities.
    Group(GroupFn<E>),
}

impl<E> Step<E> {
    /// Returns `true` if this step follows a mutable relationship, i.e.
    /// sources through it need alias-edge maintenance.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            Self::Relation(_) | Self::Previous { .. } | Self::Next { .. } | Self::Inverse { .. }
        )
    }

    /// Returns the variable whose change notifications signal that this
    /// step's target moved, if the step is dynamic.
    #[must_use]
    pub fn signal(&self) -> Option<VariableId> {
        match self {
            Self::Relation(variable) => Some(*variable),
            Self::Previous { signaled_by }
            | Self::Next { signaled_by }
            | Self::Inverse { signaled_by } => Some(*signaled_by),
            Self::Identity | Self::Fact(_) | Self::Group(_) => None,
        }
    }
}

impl<E> fmt::Debug for Step<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("Identity"),
            Self::Relation(variable) => f.debug_tuple("Relation").field(variable).finish(),
            Self::Previous { signaled_by } => f
                .debug_struct("Previous")
                .field("signaled_by", signaled_by)
                .finish(),
            Self::Next { signaled_by } => f
                .debug_struct("Next")
                .field("signaled_by", signaled_by)
                .finish(),
            Self::Inverse { signaled_by } => f
                .debug_struct("Inverse")
                .field("signaled_by", signaled_by)
                .finish(),
            Self::Fact(_) => f.write_str("Fact(..)"),
            Self::Group(_) => f.write_str("Group(..)"),
        }
    }
}

/// One declared source of a derived variable: a navigation step plus the
/// variable read at the step's target.
#[derive(Debug)]
pub struct Source<E> {
    pub(crate) step: Step<E>,
    pub(crate) variable: VariableId,
}

impl<E> Source<E> {
    /// A source read from the dependent entity itself.
    #[must_use]
    pub fn identity(variable: VariableId) -> Self {
        Self {
            step: Step::Identity,
            variable,
        }
    }

    /// A source read across a declared relation.
    #[must_use]
    pub fn relation(relation: VariableId, variable: VariableId) -> Self {
        Self {
            step: Step::Relation(relation),
            variable,
        }
    }

    /// A source read from the sequence predecessor.
    #[must_use]
    pub fn previous(variable: VariableId, signaled_by: VariableId) -> Self {
        Self {
            step: Step::Previous { signaled_by },
            variable,
        }
    }

    /// A source read from the sequence successor.
    #[must_use]
    pub fn next(variable: VariableId, signaled_by: VariableId) -> Self {
        Self {
            step: Step::Next { signaled_by },
            variable,
        }
    }

    /// A source read from the sequence anchor.
    #[must_use]
    pub fn inverse(variable: VariableId, signaled_by: VariableId) -> Self {
        Self {
            step: Step::Inverse { signaled_by },
            variable,
        }
    }

    /// A source read across an immutable fact function.
    #[must_use]
    pub fn fact(fact: impl Fn(&E) -> Option<EntityId> + 'static, variable: VariableId) -> Self {
        Self {
            step: Step::Fact(Box::new(fact)),
            variable,
        }
    }

    /// A source fanning in from an ordered group of sibling entities.
    #[must_use]
    pub fn group(
        group: impl Fn(&E) -> SmallVec<[EntityId; 4]> + 'static,
        variable: VariableId,
    ) -> Self {
        Self {
            step: Step::Group(Box::new(group)),
            variable,
        }
    }
}
