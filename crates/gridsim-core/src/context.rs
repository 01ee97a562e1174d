//! Accessing simulation from components.

use std::cell::RefCell;
use std::rc::Rc;

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::distributions::Distribution;
use rand::Rng;

use crate::component::{Id, Registry};
use crate::event::{EventData, EventId};
use crate::filter::EventFilter;
use crate::scheduler::Scheduler;

/// Handle through which a component reads the clock, draws random numbers and sends events.
///
/// Every event sent through the context has the owning component as its source.
pub struct SimulationContext {
    id: Id,
    name: String,
    scheduler: Rc<RefCell<Scheduler>>,
    registry: Rc<RefCell<Registry>>,
}

impl SimulationContext {
    pub(crate) fn new(
        id: Id,
        name: &str,
        scheduler: Rc<RefCell<Scheduler>>,
        registry: Rc<RefCell<Registry>>,
    ) -> Self {
        Self {
            id,
            name: name.to_owned(),
            scheduler,
            registry,
        }
    }

    /// Id of the owning component.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Name of the owning component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.scheduler.borrow().now()
    }

    /// Draws a number from `range` with the seeded simulation generator.
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.scheduler.borrow_mut().rng().gen_range(range)
    }

    /// Draws a value from `dist` with the seeded simulation generator.
    pub fn sample_from_distribution<T, D: Distribution<T>>(&mut self, dist: &D) -> T {
        dist.sample(self.scheduler.borrow_mut().rng())
    }

    /// Sends the payload to `dst`, delivered `delay` seconds from now.
    pub fn emit<T: EventData>(&mut self, data: T, dst: Id, delay: f64) -> EventId {
        self.scheduler.borrow_mut().schedule(data, self.id, dst, delay)
    }

    /// Sends the payload to `dst` at the current time.
    pub fn emit_now<T: EventData>(&mut self, data: T, dst: Id) -> EventId {
        self.emit(data, dst, 0.)
    }

    /// Sends the payload to the owning component after `delay`, used for timers.
    pub fn emit_self<T: EventData>(&mut self, data: T, delay: f64) -> EventId {
        self.emit(data, self.id, delay)
    }

    /// Sends the payload to the owning component at the current time.
    pub fn emit_self_now<T: EventData>(&mut self, data: T) -> EventId {
        self.emit(data, self.id, 0.)
    }

    /// Cancels a pending event. Delivered or unknown ids are ignored.
    pub fn cancel_event(&mut self, id: EventId) {
        self.scheduler.borrow_mut().cancel(id);
    }

    /// Cancels pending events sent by this component that match the filter.
    ///
    /// Returns the number of cancelled events.
    pub fn cancel_events_matching<F: EventFilter>(&mut self, filter: &F) -> usize {
        let src = self.id;
        self.scheduler
            .borrow_mut()
            .cancel_matching(|e| e.src == src && filter.matches(e))
    }

    /// Name of the component with the given id, `#<id>` for unknown ids.
    pub fn lookup_name(&self, id: Id) -> String {
        match self.registry.borrow().name(id) {
            Some(name) => name.to_owned(),
            None => format!("#{}", id),
        }
    }
}
