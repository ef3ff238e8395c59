// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The external sequence oracle.

use crate::arena::{EntityArena, EntityId};

/// Read-only supply of sequence relations between entities.
///
/// Some derived values depend on an entity's neighbors in an externally
/// maintained sequence ("my predecessor's departure time"). The structure of
/// that sequence belongs to the caller — typically a list variable owned by
/// the surrounding search algorithm — and this engine only ever reads it,
/// through this trait. All methods are expected to be O(1).
///
/// The oracle is consulted for [`Step::Previous`](crate::Step::Previous),
/// [`Step::Next`](crate::Step::Next) and [`Step::Inverse`](crate::Step::Inverse)
/// navigation, and drives the walk order of the single-directional-parent
/// graph variant.
pub trait SequenceOracle<E> {
    /// Returns the element preceding `entity` in its sequence, if any.
    fn previous(&self, arena: &EntityArena<E>, entity: EntityId) -> Option<EntityId>;

    /// Returns the element following `entity` in its sequence, if any.
    fn next(&self, arena: &EntityArena<E>, entity: EntityId) -> Option<EntityId>;

    /// Returns the anchor (inverse relation) of `entity`, if any.
    fn inverse(&self, arena: &EntityArena<E>, entity: EntityId) -> Option<EntityId>;

    /// Returns `entity`'s position within its sequence.
    ///
    /// Positions only need to be comparable along one sequence; unassigned
    /// entities may report `0`.
    fn position(&self, arena: &EntityArena<E>, entity: EntityId) -> usize;
}

/// A [`SequenceOracle`] for models with no sequence relations at all.
///
/// Every lookup answers "no neighbor". This is the default oracle of a
/// [`SessionFactory`](crate::SessionFactory).
#[derive(Copy, Clone, Debug, Default)]
pub struct NoSequence;

impl<E> SequenceOracle<E> for NoSequence {
    fn previous(&self, _arena: &EntityArena<E>, _entity: EntityId) -> Option<EntityId> {
        None
    }

    fn next(&self, _arena: &EntityArena<E>, _entity: EntityId) -> Option<EntityId> {
        None
    }

    fn inverse(&self, _arena: &EntityArena<E>, _entity: EntityId) -> Option<EntityId> {
        None
    }

    fn position(&self, _arena: &EntityArena<E>, _entity: EntityId) -> usize {
        0
    }
}
