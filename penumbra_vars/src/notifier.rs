// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Change-notification sink.

use crate::arena::EntityId;
use crate::registry::VariableId;

/// Observer of every variable write this engine performs.
///
/// The engine brackets each write — derived values, forced "unknown" values
/// on looped nodes, and entity consistency flags — in a
/// [`before_variable_changed`](Self::before_variable_changed) /
/// [`after_variable_changed`](Self::after_variable_changed) pair, so the
/// surrounding search layer can keep score deltas and downstream listeners
/// in sync. The pair fires only on actual change: a recomputation that
/// produces the stored value again is silent.
///
/// The symmetric obligation runs the other way too: the caller must route
/// its own genuine-value writes through
/// [`Session::change`](crate::Session::change) (or the explicit
/// [`Session::before_variable_changed`](crate::Session::before_variable_changed) /
/// [`Session::after_variable_changed`](crate::Session::after_variable_changed)
/// pair) so the engine can react to them.
pub trait ChangeNotifier {
    /// Called immediately before a variable's stored value changes.
    fn before_variable_changed(&mut self, variable: VariableId, entity: EntityId);

    /// Called immediately after a variable's stored value changed.
    fn after_variable_changed(&mut self, variable: VariableId, entity: EntityId);
}

/// A [`ChangeNotifier`] that ignores every notification.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn before_variable_changed(&mut self, _variable: VariableId, _entity: EntityId) {}

    fn after_variable_changed(&mut self, _variable: VariableId, _entity: EntityId) {}
}
