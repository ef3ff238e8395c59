// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Structural analysis: which graph variant fits the declarations.

use penumbra_order::{NodeBits, NodeId, TopologicalGraph};

use crate::navigation::Step;
use crate::registry::{Registry, VariableId};

/// The walk direction of a single-directional-parent structure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Sources look at `previous`, so changes propagate along `next`.
    Forward,
    /// Sources look at `next`, so changes propagate along `previous`.
    Backward,
}

/// The shape of the declared dependency structure.
///
/// Classified once per session assembly; each shape selects the cheapest
/// graph variant that still covers it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GraphStructure {
    /// No derived variables, or no entities: nothing to maintain.
    Empty,
    /// Every dependency chain follows one directional sequence step; no
    /// graph is needed at all.
    SingleDirectionalParent(Direction),
    /// Dependencies are relationship-independent: the graph is fixed after
    /// assembly and provably acyclic.
    NoDynamicEdges,
    /// The general case: alias edges move as relationships change.
    Arbitrary,
}

impl GraphStructure {
    /// Classifies the declarations of `registry` over `entity_count`
    /// entities.
    #[must_use]
    pub fn classify<E, V>(registry: &Registry<E, V>, entity_count: usize) -> Self {
        if entity_count == 0 || registry.node_variables().is_empty() {
            return Self::Empty;
        }

        let mut any_dynamic = false;
        let mut chain_compatible = true;
        let mut any_previous = false;
        let mut any_next = false;
        for &variable in registry.node_variables() {
            let sources = registry
                .kind(variable)
                .sources()
                .expect("node variables declare sources");
            for source in sources {
                match &source.step {
                    Step::Identity => {}
                    // Fact and group fan-in cross the sequence arbitrarily.
                    Step::Fact(_) | Step::Group(_) => chain_compatible = false,
                    Step::Relation(_) | Step::Inverse { .. } => {
                        any_dynamic = true;
                        chain_compatible = false;
                    }
                    Step::Previous { .. } => {
                        any_dynamic = true;
                        any_previous = true;
                    }
                    Step::Next { .. } => {
                        any_dynamic = true;
                        any_next = true;
                    }
                }
            }
        }

        if !any_dynamic {
            return Self::NoDynamicEdges;
        }
        if chain_compatible && any_previous != any_next {
            return Self::SingleDirectionalParent(if any_previous {
                Direction::Forward
            } else {
                Direction::Backward
            });
        }
        Self::Arbitrary
    }
}

/// Sorts the node variables by their variable-level dependencies: a
/// variable sourcing another *on the same entity* sorts after it.
///
/// Only identity-step derived sources produce ordering edges; directional
/// and group usage would tie every variable into one cycle and make all
/// orders equally valid, so it is ignored here. Ties break by declaration
/// order.
pub(crate) fn sorted_node_variables<E, V>(registry: &Registry<E, V>) -> Vec<VariableId> {
    let node_variables = registry.node_variables();
    let mut graph = TopologicalGraph::new(node_variables.len());
    let position = |variable: VariableId| {
        node_variables
            .iter()
            .position(|&v| v == variable)
            .map(|index| NodeId::new(u32::try_from(index).expect("variable counts fit u32")))
    };

    for (index, &variable) in node_variables.iter().enumerate() {
        let sources = registry
            .kind(variable)
            .sources()
            .expect("node variables declare sources");
        let to = NodeId::new(u32::try_from(index).expect("variable counts fit u32"));
        for source in sources {
            if !matches!(source.step, Step::Identity) {
                continue;
            }
            if let Some(from) = position(source.variable)
                && from != to
            {
                graph.add_edge(from, to);
            }
        }
    }
    let mut flipped = NodeBits::new(node_variables.len());
    graph.commit_changes(&mut flipped);

    let mut sorted: Vec<VariableId> = node_variables.to_vec();
    sorted.sort_by_key(|&variable| {
        let node = position(variable).expect("node variable is in the list");
        (graph.topological_order(node), node.as_u32())
    });
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::Source;
    use crate::registry::RegistryBuilder;

    struct Entity {
        first: Option<i64>,
        second: Option<i64>,
    }

    #[test]
    fn identity_sources_classify_as_fixed() {
        let mut builder = RegistryBuilder::<Entity, i64>::new();
        let base = builder.stored("base");
        builder.derived(
            "first",
            |entity| entity.first,
            |entity, value| entity.first = value,
            |_, _| None,
            vec![Source::identity(base)],
        );
        let registry = builder.build().unwrap();

        assert_eq!(
            GraphStructure::classify(&registry, 3),
            GraphStructure::NoDynamicEdges
        );
        assert_eq!(GraphStructure::classify(&registry, 0), GraphStructure::Empty);
    }

    #[test]
    fn previous_sources_classify_as_directional() {
        let mut builder = RegistryBuilder::<Entity, i64>::new();
        let plan = builder.stored("plan");
        let first = builder.id("first");
        builder.derived(
            "first",
            |entity| entity.first,
            |entity, value| entity.first = value,
            |_, _| None,
            vec![Source::previous(first, plan)],
        );
        let registry = builder.build().unwrap();

        assert_eq!(
            GraphStructure::classify(&registry, 3),
            GraphStructure::SingleDirectionalParent(Direction::Forward)
        );
    }

    #[test]
    fn variable_sort_respects_same_entity_dependencies() {
        let mut builder = RegistryBuilder::<Entity, i64>::new();
        let base = builder.stored("base");
        let second = builder.id("second");
        // Declared first, but depends on `second`.
        builder.derived(
            "first",
            |entity| entity.first,
            |entity, value| entity.first = value,
            |_, _| None,
            vec![Source::identity(second)],
        );
        builder.derived(
            "second",
            |entity| entity.second,
            |entity, value| entity.second = value,
            |_, _| None,
            vec![Source::identity(base)],
        );
        let registry = builder.build().unwrap();

        let sorted = sorted_node_variables(&registry);
        assert_eq!(
            sorted
                .iter()
                .map(|&variable| registry.name(variable))
                .collect::<Vec<_>>(),
            ["second", "first"],
        );
    }
}
