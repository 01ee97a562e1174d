//! Clock, pending events and random numbers shared by the simulation and all contexts.

use std::collections::{BinaryHeap, HashSet};

use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::component::Id;
use crate::event::{Event, EventData, EventId};
use crate::log::log_incorrect_event;

/// Tolerance for comparing simulation times.
pub const EPSILON: f64 = 1e-12;

pub(crate) struct Scheduler {
    now: f64,
    rng: Pcg64,
    pending: BinaryHeap<Event>,
    /// Cancelled events stay in the heap until they reach its top.
    cancelled: HashSet<EventId>,
    issued: u64,
}

impl Scheduler {
    pub fn new(seed: u64) -> Self {
        Self {
            now: 0.,
            rng: Pcg64::seed_from_u64(seed),
            pending: BinaryHeap::new(),
            cancelled: HashSet::new(),
            issued: 0,
        }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn rng(&mut self) -> &mut Pcg64 {
        &mut self.rng
    }

    /// Queues the payload for delivery to `dst` after `delay`.
    ///
    /// Delays below `-EPSILON` are a bug in the calling component and abort the simulation.
    pub fn schedule<T: EventData>(&mut self, data: T, src: Id, dst: Id, delay: f64) -> EventId {
        let event = Event {
            id: self.issued,
            time: self.now + delay.max(0.),
            src,
            dst,
            data: Box::new(data),
        };
        if delay < -EPSILON {
            log_incorrect_event(&event, &format!("negative delay {}", delay));
            panic!("event {} is scheduled {} s in the past", event.id, -delay);
        }
        self.issued += 1;
        let id = event.id;
        self.pending.push(event);
        id
    }

    fn drop_cancelled(&mut self) {
        while let Some(top) = self.pending.peek() {
            if !self.cancelled.remove(&top.id) {
                break;
            }
            self.pending.pop();
        }
    }

    /// Removes the earliest live event and moves the clock to its time.
    pub fn pop(&mut self) -> Option<Event> {
        self.drop_cancelled();
        let event = self.pending.pop()?;
        self.now = event.time;
        Some(event)
    }

    pub fn next_time(&mut self) -> Option<f64> {
        self.drop_cancelled();
        self.pending.peek().map(|e| e.time)
    }

    pub fn cancel(&mut self, id: EventId) {
        if self.pending.iter().any(|e| e.id == id) {
            self.cancelled.insert(id);
        }
    }

    pub fn cancel_matching(&mut self, pred: impl Fn(&Event) -> bool) -> usize {
        let matched: Vec<EventId> = self
            .pending
            .iter()
            .filter(|e| !self.cancelled.contains(&e.id) && pred(e))
            .map(|e| e.id)
            .collect();
        self.cancelled.extend(matched.iter().copied());
        matched.len()
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn live_count(&self) -> usize {
        self.pending.len() - self.cancelled.len()
    }
}
