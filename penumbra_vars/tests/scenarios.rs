// Copyright 2025 the Penumbra Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end propagation scenarios against the session API.

use std::cell::RefCell;
use std::rc::Rc;

use penumbra_vars::{
    AssemblyError, ChangeNotifier, EmptyGraph, EntityArena, EntityId, NodeId, ReferenceGraph,
    RegistryBuilder, SequenceOracle, Session, SessionFactory, Source, VariableId,
};
use smallvec::SmallVec;

/// Records every notification the engine emits.
#[derive(Clone, Default)]
struct Recorder {
    events: Rc<RefCell<Vec<(VariableId, EntityId, &'static str)>>>,
}

impl Recorder {
    fn sink(&self) -> Box<dyn ChangeNotifier> {
        Box::new(self.clone())
    }

    fn take(&self) -> Vec<(VariableId, EntityId, &'static str)> {
        self.events.borrow_mut().drain(..).collect()
    }

    fn take_after(&self) -> Vec<(VariableId, EntityId)> {
        self.take()
            .into_iter()
            .filter(|&(_, _, phase)| phase == "after")
            .map(|(variable, entity, _)| (variable, entity))
            .collect()
    }
}

impl ChangeNotifier for Recorder {
    fn before_variable_changed(&mut self, variable: VariableId, entity: EntityId) {
        self.events.borrow_mut().push((variable, entity, "before"));
    }

    fn after_variable_changed(&mut self, variable: VariableId, entity: EntityId) {
        self.events.borrow_mut().push((variable, entity, "after"));
    }
}

const A: EntityId = EntityId::new(0);
const B: EntityId = EntityId::new(1);
const C: EntityId = EntityId::new(2);

// ---------------------------------------------------------------------------
// Linear chain over a relation: a <- b <- c, derived = predecessor + 1.
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Visit {
    base: Option<i64>,
    previous: Option<EntityId>,
    start: Option<i64>,
}

fn visit_session(recorder: &Recorder) -> (Session<Visit, i64>, VariableId, VariableId) {
    let mut builder = RegistryBuilder::<Visit, i64>::new();
    let base = builder.stored("base");
    let previous = builder.relation("previous", |visit: &Visit| visit.previous);
    let start = builder.id("start");
    builder.derived(
        "start",
        |visit| visit.start,
        |visit, value| visit.start = value,
        move |context, id| match context.entity(id).previous {
            Some(parent) => context.value(start, parent).map(|start| start + 1),
            None => context.entity(id).base,
        },
        vec![Source::identity(base), Source::relation(previous, start)],
    );
    let factory = SessionFactory::new(builder.build().unwrap());
    let session = factory
        .session_with_notifier(
            vec![
                Visit {
                    base: Some(0),
                    ..Visit::default()
                },
                Visit {
                    previous: Some(A),
                    ..Visit::default()
                },
                Visit {
                    previous: Some(B),
                    ..Visit::default()
                },
            ],
            recorder.sink(),
        )
        .unwrap();
    (session, base, start)
}

#[test]
fn chain_computes_initial_values() {
    let recorder = Recorder::default();
    let (mut session, _, start) = visit_session(&recorder);

    session.update_variables();
    assert_eq!(session.value(start, A), Some(0));
    assert_eq!(session.value(start, B), Some(1));
    assert_eq!(session.value(start, C), Some(2));
    assert_eq!(
        recorder.take_after(),
        vec![(start, A), (start, B), (start, C)],
    );
}

#[test]
fn chain_propagates_in_order_visiting_each_node_once() {
    let recorder = Recorder::default();
    let (mut session, base, start) = visit_session(&recorder);
    session.update_variables();
    let _ = recorder.take();

    session.change(base, A, |visit| visit.base = Some(5));
    session.update_variables();

    assert_eq!(session.value(start, A), Some(5));
    assert_eq!(session.value(start, B), Some(6));
    assert_eq!(session.value(start, C), Some(7));
    // Each downstream node recomputed exactly once, in topological order.
    assert_eq!(
        recorder.take(),
        vec![
            (start, A, "before"),
            (start, A, "after"),
            (start, B, "before"),
            (start, B, "after"),
            (start, C, "before"),
            (start, C, "after"),
        ],
    );
}

#[test]
fn empty_drain_is_a_no_op() {
    let recorder = Recorder::default();
    let (mut session, base, _) = visit_session(&recorder);
    session.update_variables();
    session.change(base, A, |visit| visit.base = Some(5));
    session.update_variables();
    let _ = recorder.take();

    // Nothing changed since the last drain.
    session.update_variables();
    assert!(recorder.take().is_empty());
}

// ---------------------------------------------------------------------------
// Mutual dependency through relations: a runtime loop, not an error.
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Mirror {
    mirror_of: Option<EntityId>,
    mirror: Option<i64>,
    broken: bool,
}

fn mirror_session(
    recorder: &Recorder,
    with_flag: bool,
    entities: Vec<Mirror>,
) -> (Session<Mirror, i64>, VariableId, VariableId) {
    let mut builder = RegistryBuilder::<Mirror, i64>::new();
    let mirror_of = builder.relation("mirror_of", |entity: &Mirror| entity.mirror_of);
    let mirror = builder.id("mirror");
    builder.derived(
        "mirror",
        |entity| entity.mirror,
        |entity, value| entity.mirror = value,
        move |context, id| match context.entity(id).mirror_of {
            Some(target) => context.value(mirror, target),
            None => Some(42),
        },
        vec![Source::relation(mirror_of, mirror)],
    );
    if with_flag {
        builder.consistency_flag(
            "broken",
            |entity| entity.broken,
            |entity, value| entity.broken = value,
        );
    }
    let factory = SessionFactory::new(builder.build().unwrap());
    let session = factory
        .session_with_notifier(entities, recorder.sink())
        .unwrap();
    (session, mirror_of, mirror)
}

#[test]
fn runtime_loop_forces_unknown_and_flags_entities() {
    let recorder = Recorder::default();
    let (mut session, _, mirror) = mirror_session(
        &recorder,
        true,
        vec![
            Mirror {
                mirror_of: Some(B),
                ..Mirror::default()
            },
            Mirror {
                mirror_of: Some(A),
                ..Mirror::default()
            },
            // Not part of the cycle, but downstream of it.
            Mirror {
                mirror_of: Some(A),
                ..Mirror::default()
            },
        ],
    );

    session.update_variables();
    for id in [A, B, C] {
        assert_eq!(session.value(mirror, id), None);
        assert!(session.is_entity_inconsistent(id), "{id:?} should be tainted");
        assert!(session.entity(id).broken);
    }
}

#[test]
fn breaking_the_loop_restores_consistency() {
    let recorder = Recorder::default();
    let (mut session, mirror_of, mirror) = mirror_session(
        &recorder,
        true,
        vec![
            Mirror {
                mirror_of: Some(B),
                ..Mirror::default()
            },
            Mirror {
                mirror_of: Some(A),
                ..Mirror::default()
            },
            Mirror {
                mirror_of: Some(A),
                ..Mirror::default()
            },
        ],
    );
    session.update_variables();

    session.change(mirror_of, B, |entity| entity.mirror_of = None);
    session.update_variables();

    for id in [A, B, C] {
        assert_eq!(session.value(mirror, id), Some(42));
        assert!(!session.is_entity_inconsistent(id));
        assert!(!session.entity(id).broken);
    }
}

#[test]
fn loop_flips_piggyback_on_derived_notifications_without_a_flag() {
    let recorder = Recorder::default();
    let (mut session, _, mirror) = mirror_session(
        &recorder,
        false,
        vec![
            Mirror {
                mirror_of: Some(B),
                ..Mirror::default()
            },
            Mirror {
                mirror_of: Some(A),
                ..Mirror::default()
            },
        ],
    );

    session.update_variables();
    assert!(session.is_entity_inconsistent(A));
    assert!(session.is_entity_inconsistent(B));

    // The looped values never change (None throughout), so the only
    // notifications are the piggybacked flip reports.
    let events = recorder.take();
    assert!(events.contains(&(mirror, A, "before")));
    assert!(events.contains(&(mirror, A, "after")));
    assert!(events.contains(&(mirror, B, "before")));
    assert!(events.contains(&(mirror, B, "after")));
}

// ---------------------------------------------------------------------------
// Mutual dependency through fixed (identity) sources: rejected at assembly.
// ---------------------------------------------------------------------------

#[test]
fn fixed_mutual_dependency_is_rejected() {
    #[derive(Default)]
    struct Pair {
        p: Option<i64>,
        q: Option<i64>,
    }

    let mut builder = RegistryBuilder::<Pair, i64>::new();
    let q = builder.id("q");
    let p = builder.derived(
        "p",
        |entity| entity.p,
        |entity, value| entity.p = value,
        move |context, id| context.value(q, id),
        vec![Source::identity(q)],
    );
    builder.derived(
        "q",
        |entity| entity.q,
        |entity, value| entity.q = value,
        move |context, id| context.value(p, id),
        vec![Source::identity(p)],
    );
    let factory = SessionFactory::new(builder.build().unwrap());

    let error = factory.session(vec![Pair::default()]).unwrap_err();
    assert!(matches!(
        error,
        AssemblyError::FixedDependencyLoop { total: 1, .. }
    ));
}

// ---------------------------------------------------------------------------
// Alias maintenance: re-pointing "my successor's value" edges.
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Link {
    base: Option<i64>,
    successor: Option<EntityId>,
    val: Option<i64>,
    echo: Option<i64>,
}

fn link_session(
    recorder: &Recorder,
) -> (Session<Link, i64>, VariableId, VariableId, VariableId, VariableId) {
    let mut builder = RegistryBuilder::<Link, i64>::new();
    let base = builder.stored("base");
    let successor = builder.relation("successor", |link: &Link| link.successor);
    let val = builder.derived(
        "val",
        |link| link.val,
        |link, value| link.val = value,
        |context, id| context.entity(id).base,
        vec![Source::identity(base)],
    );
    let echo = builder.derived(
        "echo",
        |link| link.echo,
        |link, value| link.echo = value,
        move |context, id| {
            context
                .entity(id)
                .successor
                .and_then(|successor| context.value(val, successor))
        },
        vec![Source::relation(successor, val)],
    );
    let factory = SessionFactory::new(builder.build().unwrap());
    let session = factory
        .session_with_notifier(
            vec![
                Link {
                    base: Some(10),
                    successor: Some(B),
                    ..Link::default()
                },
                Link {
                    base: Some(20),
                    successor: Some(C),
                    ..Link::default()
                },
                Link {
                    base: Some(30),
                    ..Link::default()
                },
            ],
            recorder.sink(),
        )
        .unwrap();
    (session, base, successor, val, echo)
}

#[test]
fn removing_an_element_repoints_alias_edges() {
    let recorder = Recorder::default();
    let (mut session, base, successor, val, echo) = link_session(&recorder);
    session.update_variables();
    assert_eq!(session.value(echo, A), Some(20));

    // Remove B from between A and C.
    session.change(successor, A, |link| link.successor = Some(C));
    session.change(successor, B, |link| link.successor = None);
    session.update_variables();
    assert_eq!(session.value(echo, A), Some(30));
    assert_eq!(session.value(echo, B), None);
    let _ = recorder.take();

    // B's value no longer feeds A.
    session.change(base, B, |link| link.base = Some(99));
    session.update_variables();
    assert_eq!(session.value(echo, A), Some(30));
    assert_eq!(recorder.take_after(), vec![(val, B)]);

    // C's value does.
    session.change(base, C, |link| link.base = Some(31));
    session.update_variables();
    assert_eq!(session.value(echo, A), Some(31));
    assert_eq!(recorder.take_after(), vec![(val, C), (echo, A)]);
}

// ---------------------------------------------------------------------------
// Single-directional chains: the successor-walk variant.
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Stop {
    prev: Option<EntityId>,
    next: Option<EntityId>,
    pos: usize,
    ready: Option<i64>,
    start: Option<i64>,
}

#[derive(Copy, Clone, Debug)]
struct FieldOracle;

impl SequenceOracle<Stop> for FieldOracle {
    fn previous(&self, arena: &EntityArena<Stop>, entity: EntityId) -> Option<EntityId> {
        arena.get(entity).prev
    }

    fn next(&self, arena: &EntityArena<Stop>, entity: EntityId) -> Option<EntityId> {
        arena.get(entity).next
    }

    fn inverse(&self, _arena: &EntityArena<Stop>, _entity: EntityId) -> Option<EntityId> {
        None
    }

    fn position(&self, arena: &EntityArena<Stop>, entity: EntityId) -> usize {
        arena.get(entity).pos
    }
}

fn stop_session(recorder: &Recorder) -> (Session<Stop, i64>, VariableId, VariableId) {
    let mut builder = RegistryBuilder::<Stop, i64>::new();
    let plan = builder.stored("plan");
    let ready = builder.stored("ready");
    let start = builder.id("start");
    builder.derived(
        "start",
        |stop| stop.start,
        |stop, value| stop.start = value,
        move |context, id| {
            let floor = context.entity(id).ready.unwrap_or(0);
            match context.previous(id) {
                Some(previous) => context
                    .value(start, previous)
                    .map(|start| (start + 1).max(floor)),
                None => Some(floor),
            }
        },
        vec![Source::identity(ready), Source::previous(start, plan)],
    );
    let factory = SessionFactory::new(builder.build().unwrap()).with_oracle(FieldOracle);
    let session = factory
        .session_with_notifier(
            vec![
                Stop {
                    ready: Some(0),
                    next: Some(B),
                    pos: 0,
                    ..Stop::default()
                },
                Stop {
                    ready: Some(10),
                    prev: Some(A),
                    next: Some(C),
                    pos: 1,
                    ..Stop::default()
                },
                Stop {
                    prev: Some(B),
                    pos: 2,
                    ..Stop::default()
                },
            ],
            recorder.sink(),
        )
        .unwrap();
    (session, ready, start)
}

#[test]
fn successor_walk_computes_the_chain() {
    let recorder = Recorder::default();
    let (mut session, _, start) = stop_session(&recorder);

    session.update_variables();
    assert_eq!(session.value(start, A), Some(0));
    assert_eq!(session.value(start, B), Some(10));
    assert_eq!(session.value(start, C), Some(11));
}

#[test]
fn successor_walk_stops_at_the_first_unchanged_element() {
    let recorder = Recorder::default();
    let (mut session, ready, start) = stop_session(&recorder);
    session.update_variables();
    let _ = recorder.take();

    // A moves from 0 to 5, but B's floor of 10 absorbs the shift.
    session.change(ready, A, |stop| stop.ready = Some(5));
    session.update_variables();
    assert_eq!(session.value(start, A), Some(5));
    assert_eq!(session.value(start, B), Some(10));
    assert_eq!(session.value(start, C), Some(11));
    assert_eq!(recorder.take_after(), vec![(start, A)]);

    // A large enough shift walks the whole chain.
    session.change(ready, A, |stop| stop.ready = Some(20));
    session.update_variables();
    assert_eq!(session.value(start, A), Some(20));
    assert_eq!(session.value(start, B), Some(21));
    assert_eq!(session.value(start, C), Some(22));
    assert_eq!(
        recorder.take_after(),
        vec![(start, A), (start, B), (start, C)],
    );
}

// ---------------------------------------------------------------------------
// Intermediates: invisible scratch values feeding visible ones.
// ---------------------------------------------------------------------------

#[test]
fn intermediates_feed_derived_values_silently() {
    #[derive(Default)]
    struct Item {
        base: Option<i64>,
        out: Option<i64>,
    }

    let recorder = Recorder::default();
    let mut builder = RegistryBuilder::<Item, i64>::new();
    let base = builder.stored("base");
    let half = builder.intermediate(
        "half",
        |context, id| context.entity(id).base.map(|base| base / 2),
        vec![Source::identity(base)],
    );
    let out = builder.derived(
        "out",
        |item| item.out,
        |item, value| item.out = value,
        move |context, id| context.value(half, id).map(|half| half + 1),
        vec![Source::identity(half)],
    );
    let factory = SessionFactory::new(builder.build().unwrap());
    let mut session = factory
        .session_with_notifier(
            vec![Item {
                base: Some(8),
                out: None,
            }],
            recorder.sink(),
        )
        .unwrap();

    session.update_variables();
    assert_eq!(session.value(half, A), Some(4));
    assert_eq!(session.value(out, A), Some(5));
    // Only the user-visible variable notifies.
    assert_eq!(recorder.take_after(), vec![(out, A)]);

    session.change(base, A, |item| item.base = Some(20));
    session.update_variables();
    assert_eq!(session.value(out, A), Some(11));
}

// ---------------------------------------------------------------------------
// Group fan-in.
// ---------------------------------------------------------------------------

#[test]
fn group_sources_fan_in_member_values() {
    #[derive(Default)]
    struct Task {
        members: Vec<EntityId>,
        weight: Option<i64>,
        val: Option<i64>,
        total: Option<i64>,
    }

    let recorder = Recorder::default();
    let mut builder = RegistryBuilder::<Task, i64>::new();
    let weight = builder.stored("weight");
    let val = builder.derived(
        "val",
        |task| task.val,
        |task, value| task.val = value,
        |context, id| context.entity(id).weight,
        vec![Source::identity(weight)],
    );
    let total = builder.derived(
        "total",
        |task| task.total,
        |task, value| task.total = value,
        move |context, id| {
            let members = &context.entity(id).members;
            if members.is_empty() {
                return None;
            }
            members
                .iter()
                .map(|&member| context.value(val, member))
                .sum()
        },
        vec![Source::group(
            |task: &Task| task.members.iter().copied().collect::<SmallVec<[EntityId; 4]>>(),
            val,
        )],
    );
    let factory = SessionFactory::new(builder.build().unwrap());
    let mut session = factory
        .session_with_notifier(
            vec![
                Task {
                    members: vec![B, C],
                    ..Task::default()
                },
                Task {
                    weight: Some(3),
                    ..Task::default()
                },
                Task {
                    weight: Some(4),
                    ..Task::default()
                },
            ],
            recorder.sink(),
        )
        .unwrap();

    session.update_variables();
    assert_eq!(session.value(total, A), Some(7));
    assert_eq!(session.value(total, B), None);
    let _ = recorder.take();

    session.change(weight, B, |task| task.weight = Some(5));
    session.update_variables();
    assert_eq!(session.value(total, A), Some(9));
    assert_eq!(recorder.take_after(), vec![(val, B), (total, A)]);
}

// ---------------------------------------------------------------------------
// Diamonds: one recomputation per node regardless of path count.
// ---------------------------------------------------------------------------

#[test]
fn diamond_dependencies_recompute_once() {
    #[derive(Default)]
    struct Diamond {
        base: Option<i64>,
        left: Option<i64>,
        right: Option<i64>,
        sum: Option<i64>,
    }

    let recorder = Recorder::default();
    let mut builder = RegistryBuilder::<Diamond, i64>::new();
    let base = builder.stored("base");
    let left = builder.derived(
        "left",
        |entity| entity.left,
        |entity, value| entity.left = value,
        |context, id| context.entity(id).base.map(|base| base + 1),
        vec![Source::identity(base)],
    );
    let right = builder.derived(
        "right",
        |entity| entity.right,
        |entity, value| entity.right = value,
        |context, id| context.entity(id).base.map(|base| base * 2),
        vec![Source::identity(base)],
    );
    let sum = builder.derived(
        "sum",
        |entity| entity.sum,
        |entity, value| entity.sum = value,
        move |context, id| {
            Some(context.value(left, id)? + context.value(right, id)?)
        },
        vec![Source::identity(left), Source::identity(right)],
    );
    let factory = SessionFactory::new(builder.build().unwrap());
    let mut session = factory
        .session_with_notifier(
            vec![Diamond {
                base: Some(1),
                ..Diamond::default()
            }],
            recorder.sink(),
        )
        .unwrap();
    session.update_variables();
    let _ = recorder.take();

    session.change(base, A, |entity| entity.base = Some(3));
    session.update_variables();

    assert_eq!(session.value(sum, A), Some(10));
    let after = recorder.take_after();
    assert_eq!(after.iter().filter(|&&(v, _)| v == sum).count(), 1);
    assert_eq!(after.iter().filter(|&&(v, _)| v == left).count(), 1);
    assert_eq!(after.iter().filter(|&&(v, _)| v == right).count(), 1);
}

// ---------------------------------------------------------------------------
// Degenerate graphs and protocol violations.
// ---------------------------------------------------------------------------

#[test]
fn a_model_without_derived_variables_gets_the_empty_graph() {
    struct Plain {
        #[expect(dead_code, reason = "the engine never reads it")]
        base: Option<i64>,
    }

    let mut builder = RegistryBuilder::<Plain, i64>::new();
    let base = builder.stored("base");
    let factory = SessionFactory::new(builder.build().unwrap());
    let mut session = factory.session(vec![Plain { base: Some(1) }]).unwrap();

    session.change(base, A, |entity| entity.base = Some(2));
    session.update_variables();
    assert!(!session.is_entity_inconsistent(A));
}

#[test]
#[should_panic(expected = "no nodes")]
fn empty_graph_mutators_fail_fast() {
    let mut graph = EmptyGraph;
    <EmptyGraph as ReferenceGraph<(), i64>>::mark_changed(&mut graph, NodeId::new(0));
}
