// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Change processors: reactions to genuine-value notifications.
//!
//! The original formulation of these reactions is a list of callbacks per
//! watched variable. Here each reaction is plain data dispatched by pattern
//! matching: the set of reaction shapes is closed, small, and sits on the
//! per-change hot path, so an enum beats boxed closures on both clarity and
//! dispatch cost.

use crate::registry::VariableId;

/// How to find the dependent entities of a changed source entity.
#[derive(Copy, Clone, Debug)]
pub(crate) enum InverseRef {
    /// Dependents are the entities whose declared relation points at the
    /// changed entity.
    Relation(VariableId),
    /// The path step was `Previous`, so the dependent is the changed
    /// entity's sequence successor.
    OracleNext,
    /// The path step was `Next`, so the dependent is the changed entity's
    /// sequence predecessor.
    OraclePrevious,
    /// Dependents come from an inverse table precomputed at assembly
    /// (fact and group steps never change).
    Table(u32),
}

/// How to find the source entity of a dependent entity.
#[derive(Copy, Clone, Debug)]
pub(crate) enum StepRef {
    Relation(VariableId),
    OraclePrevious,
    OracleNext,
    OracleInverse,
}

/// One registered reaction to a genuine variable's before/after
/// notification.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Processor {
    /// The changed entity carries a dependent derived variable itself; mark
    /// its node changed.
    Mark {
        /// The dependent derived variable.
        target: VariableId,
    },
    /// A stored source changed on a source entity; mark the dependents
    /// reached through the inverse of the path step.
    MarkInverse {
        target: VariableId,
        inverse: InverseRef,
    },
    /// A relationship is about to change: drop the alias edge computed from
    /// its current (old) value.
    RemoveAliasEdge {
        /// The derived variable at the source end of the alias.
        source: VariableId,
        /// The dependent derived variable.
        target: VariableId,
        step: StepRef,
    },
    /// A relationship changed: add the alias edge computed from its new
    /// value.
    AddAliasEdge {
        source: VariableId,
        target: VariableId,
        step: StepRef,
    },
}
