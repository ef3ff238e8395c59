// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Assembly-time configuration errors.

use core::fmt;

/// Error returned when a registry or session cannot be assembled.
///
/// These are configuration mistakes: they surface once, at startup, and are
/// fatal for the assembly attempt. Runtime cycles caused by relationship
/// values are *not* errors — they are the "looped" state tracked during
/// propagation. Only cycles among fixed (never-removed) dependencies are
/// rejected here, since no later change could ever break them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssemblyError {
    /// A source referred to a variable name that was never declared.
    UndeclaredVariable {
        /// The name that was mentioned but never declared.
        name: String,
    },
    /// A derived variable was declared without any sources.
    NoSources {
        /// The derived variable.
        variable: String,
    },
    /// A source path navigated *through* a derived variable.
    ///
    /// Only the final segment of a source may be derived; navigation steps
    /// must go through genuine relations, facts or the sequence oracle.
    DerivedInsidePath {
        /// The derived variable declaring the source.
        variable: String,
        /// The derived variable illegally used as a navigation step.
        step_variable: String,
    },
    /// A relation step named a variable that is not a relation.
    NotARelation {
        /// The derived variable declaring the source.
        variable: String,
        /// The named step variable.
        step_variable: String,
    },
    /// A source terminates in a variable kind that cannot be a source.
    InvalidSourceVariable {
        /// The derived variable declaring the source.
        variable: String,
        /// The invalid source variable.
        source: String,
    },
    /// A sequence step's signal variable is not a genuine variable.
    SignalNotGenuine {
        /// The derived variable declaring the source.
        variable: String,
        /// The declared signal variable.
        signal: String,
    },
    /// A stored value is sourced across a relation with no declared inverse.
    ///
    /// When a genuine value changes on entity `x`, the engine must find the
    /// dependents whose relation points at `x`; that requires the relation
    /// to declare an inverse accessor.
    MissingInverse {
        /// The derived variable declaring the source.
        variable: String,
        /// The relation lacking an inverse.
        relation: String,
    },
    /// A stored value is sourced through an inverse sequence step.
    ///
    /// The inverse relation cannot be navigated backwards, so changes to the
    /// source could not be routed to dependents.
    InverseStepOnStoredSource {
        /// The derived variable declaring the source.
        variable: String,
    },
    /// The fixed (never-removed) dependency edges contain at least one cycle.
    FixedDependencyLoop {
        /// Up to three offending cycles, each a list of `variable@entity`
        /// labels.
        cycles: Vec<Vec<String>>,
        /// Total number of fixed cycles found.
        total: usize,
    },
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndeclaredVariable { name } => {
                write!(f, "variable `{name}` is referenced but never declared")
            }
            Self::NoSources { variable } => {
                write!(f, "derived variable `{variable}` declares no sources")
            }
            Self::DerivedInsidePath {
                variable,
                step_variable,
            } => write!(
                f,
                "source of `{variable}` navigates through derived variable `{step_variable}`; \
                 only the final segment of a source may be derived"
            ),
            Self::NotARelation {
                variable,
                step_variable,
            } => write!(
                f,
                "source of `{variable}` uses `{step_variable}` as a relation step, \
                 but it is not a relation variable"
            ),
            Self::InvalidSourceVariable { variable, source } => write!(
                f,
                "source of `{variable}` terminates in `{source}`, \
                 which is not a value-bearing variable"
            ),
            Self::SignalNotGenuine { variable, signal } => write!(
                f,
                "sequence step of `{variable}` is signaled by `{signal}`, \
                 which is not a genuine variable"
            ),
            Self::MissingInverse { variable, relation } => write!(
                f,
                "source of `{variable}` reads a stored value across relation `{relation}`, \
                 which declares no inverse accessor"
            ),
            Self::InverseStepOnStoredSource { variable } => write!(
                f,
                "source of `{variable}` reads a stored value through an inverse sequence step, \
                 which cannot be navigated backwards"
            ),
            Self::FixedDependencyLoop { cycles, total } => {
                writeln!(
                    f,
                    "the fixed dependency edges contain {total} cycle(s); \
                     fixed cycles cannot be broken by any later change:"
                )?;
                for cycle in cycles {
                    write!(f, "  - [")?;
                    for (i, node) in cycle.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{node}")?;
                    }
                    writeln!(f, "]")?;
                }
                if *total > cycles.len() {
                    writeln!(f, "  - ...({} more)", total - cycles.len())?;
                }
                write!(
                    f,
                    "check whether two derived variables source each other, or whether a \
                     fact chain leads an entity's source back to itself"
                )
            }
        }
    }
}

impl core::error::Error for AssemblyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_loop_message_lists_cycles() {
        let error = AssemblyError::FixedDependencyLoop {
            cycles: vec![vec!["a@0".into(), "b@0".into()]],
            total: 4,
        };
        let message = error.to_string();
        assert!(message.contains("[a@0, b@0]"), "got: {message}");
        assert!(message.contains("(3 more)"), "got: {message}");
    }
}
