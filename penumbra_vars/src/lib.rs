// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Penumbra Vars: incremental maintenance of derived (shadow) variables.
//!
//! A *derived* value is computed from other values instead of assigned; a
//! *genuine* value is assigned directly. This crate keeps every derived
//! value of a mutating entity population consistent with its sources,
//! recomputing only what a change batch actually reached — the
//! incremental-evaluation core of a search engine that evaluates many
//! candidate moves per second.
//!
//! ## Model
//!
//! - **Entities** live in an arena ([`EntityArena`]) and are addressed by
//!   dense [`EntityId`]s; user-type equality is never consulted.
//! - **Variables** are declared once in a [`Registry`] via
//!   [`RegistryBuilder`]: genuine stored values, genuine relations, derived
//!   values with their calculator and declared [`Source`]s, session-local
//!   intermediates, and an optional entity consistency flag.
//! - **Sources** name the value a derived variable reads and the
//!   navigation [`Step`] that reaches it — the entity itself, a declared
//!   relation, the sequence oracle's `previous`/`next`/`inverse`, an
//!   immutable fact, or a group fan-in.
//! - A **session** ([`Session`], from [`SessionFactory`]) pairs one entity
//!   population with a reference graph. The caller routes genuine-value
//!   mutations through [`Session::change`] and calls
//!   [`Session::update_variables`] once per logical move.
//!
//! ## Propagation
//!
//! Structural analysis ([`GraphStructure`]) picks one of three graph
//! variants behind the [`ReferenceGraph`] trait: a no-op graph for empty
//! models, a successor-walk engine for single-directional chains, and the
//! general graph — reference-counted dependency edges over a
//! [`penumbra_order::TopologicalGraph`], drained as a topological wavefront.
//!
//! A dependency cycle among relationship values is not an error: affected
//! nodes are classified *looped*, their values forced to the unknown
//! sentinel (`None`), and their entities flagged inconsistent until a later
//! change breaks the cycle. Only cycles among *fixed* dependencies — which
//! no change could ever break — are rejected, at assembly time, as
//! [`AssemblyError::FixedDependencyLoop`].
//!
//! ## Example
//!
//! A chain of visits where each start time is the predecessor's start plus
//! one:
//!
//! ```
//! use penumbra_vars::{RegistryBuilder, SessionFactory, Source};
//!
//! #[derive(Default)]
//! struct Visit {
//!     base: Option<i64>,
//!     previous: Option<penumbra_vars::EntityId>,
//!     start: Option<i64>,
//! }
//!
//! let mut builder = RegistryBuilder::<Visit, i64>::new();
//! let base = builder.stored("base");
//! let previous = builder.relation("previous", |visit: &Visit| visit.previous);
//! let start = builder.id("start");
//! builder.derived(
//!     "start",
//!     |visit| visit.start,
//!     |visit, value| visit.start = value,
//!     move |context, id| match context.entity(id).previous {
//!         Some(parent) => context.value(start, parent).map(|start| start + 1),
//!         None => context.entity(id).base,
//!     },
//!     vec![Source::identity(base), Source::relation(previous, start)],
//! );
//!
//! let factory = SessionFactory::new(builder.build().unwrap());
//! let mut session = factory
//!     .session(vec![
//!         Visit { base: Some(0), ..Visit::default() },
//!         Visit::default(),
//!     ])
//!     .unwrap();
//! let ids: Vec<_> = session.entity_ids().collect();
//! session.change(previous, ids[1], |visit| visit.previous = Some(ids[0]));
//! session.update_variables();
//!
//! assert_eq!(session.value(start, ids[0]), Some(0));
//! assert_eq!(session.value(start, ids[1]), Some(1));
//! ```

mod arena;
mod builder;
mod chain;
mod empty;
mod error;
mod graph;
mod navigation;
mod node;
mod notifier;
mod oracle;
mod processor;
mod registry;
mod session;
mod state;
mod structure;
mod updater;
mod working;

pub use arena::{EntityArena, EntityId};
pub use chain::ChainGraph;
pub use empty::EmptyGraph;
pub use error::AssemblyError;
pub use graph::ReferenceGraph;
pub use navigation::{FactFn, GroupFn, Source, Step};
pub use notifier::{ChangeNotifier, NoopNotifier};
pub use oracle::{NoSequence, SequenceOracle};
pub use registry::{Registry, RegistryBuilder, VariableId};
pub use session::{Session, SessionFactory};
pub use state::{CalcContext, SessionState};
pub use structure::{Direction, GraphStructure};
pub use working::WorkingGraph;

pub use penumbra_order::NodeId;
