use serde::Serialize;

use gridsim_core::{DeferredQueue, EventFilter, Simulation, SourceFilter, TagFilter, TypeFilter};

#[derive(Clone, Serialize)]
struct Reply {
    transaction: u64,
}

#[derive(Clone, Serialize)]
struct Notice {}

fn collect(sim: &mut Simulation) -> DeferredQueue {
    let mut queue = DeferredQueue::new();
    while let Some(event) = sim.next_event() {
        queue.push(event);
    }
    queue
}

#[test]
fn type_filter_selects_by_payload_type() {
    let mut sim = Simulation::new(1);
    let mut ctx = sim.create_context("comp");
    ctx.emit_self(Reply { transaction: 1 }, 1.);
    ctx.emit_self(Notice {}, 2.);
    ctx.emit_self(Reply { transaction: 2 }, 3.);
    let mut queue = collect(&mut sim);
    assert_eq!(queue.count(&TypeFilter::<Reply>::new()), 2);
    let notices = queue.take_all(&TypeFilter::<Notice>::new());
    assert_eq!(notices.len(), 1);
    assert_eq!(queue.len(), 2);
}

#[test]
fn tag_filter_checks_payload_fields() {
    let mut sim = Simulation::new(1);
    let mut ctx = sim.create_context("comp");
    for tx in [5, 6, 5] {
        ctx.emit_self(Reply { transaction: tx }, tx as f64);
    }
    let mut queue = collect(&mut sim);
    let filter = TagFilter::new(|r: &Reply| r.transaction == 5);
    assert_eq!(queue.peek_first(&filter).map(|e| e.id), Some(0));
    let taken = queue.take_all(&filter);
    assert_eq!(taken.iter().map(|e| e.id).collect::<Vec<_>>(), vec![0, 2]);
    assert!(queue.take_first(&filter).is_none());
    assert_eq!(queue.len(), 1);
}

#[test]
fn combined_filters() {
    let mut sim = Simulation::new(1);
    let mut a = sim.create_context("a");
    let mut b = sim.create_context("b");
    let a_id = a.id();
    a.emit(Reply { transaction: 1 }, a_id, 1.);
    b.emit(Reply { transaction: 1 }, a_id, 1.);
    b.emit(Notice {}, a_id, 1.);
    let queue = collect(&mut sim);
    let from_b_replies = SourceFilter(b.id()).and(TypeFilter::<Reply>::new());
    assert_eq!(queue.count(&from_b_replies), 1);
    let notices_or_from_a = TypeFilter::<Notice>::new().or(SourceFilter(a_id));
    assert_eq!(queue.count(&notices_or_from_a), 2);
}

#[test]
fn simulation_cancels_matching_events() {
    let mut sim = Simulation::new(1);
    let mut ctx = sim.create_context("comp");
    ctx.emit_self(Reply { transaction: 1 }, 1.);
    ctx.emit_self(Reply { transaction: 2 }, 2.);
    let cancelled = sim.cancel_events(TagFilter::new(|r: &Reply| r.transaction == 2));
    assert_eq!(cancelled, 1);
    let queue = collect(&mut sim);
    assert_eq!(queue.len(), 1);
    assert_eq!(sim.time(), 1.);
}
