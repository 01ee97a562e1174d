//! Simulation configuration and execution.

use std::cell::RefCell;
use std::rc::Rc;

use log::Level::Trace;
use log::{debug, log_enabled, trace};
use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::Rng;
use serde_json::json;

use crate::component::{Id, Registry};
use crate::context::SimulationContext;
use crate::event::Event;
use crate::filter::EventFilter;
use crate::handler::EventHandler;
use crate::log::{event_type_name, get_colored, log_undelivered_event};
use crate::scheduler::Scheduler;

/// Owns the components and delivers their events in time order.
pub struct Simulation {
    scheduler: Rc<RefCell<Scheduler>>,
    registry: Rc<RefCell<Registry>>,
    /// Handlers indexed by component id, `None` for contexts without a handler.
    handlers: Vec<Option<Rc<RefCell<dyn EventHandler>>>>,
}

impl Simulation {
    /// Creates an empty simulation whose random numbers are drawn from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            scheduler: Rc::new(RefCell::new(Scheduler::new(seed))),
            registry: Rc::new(RefCell::new(Registry::default())),
            handlers: Vec::new(),
        }
    }

    fn register(&mut self, name: &str, what: &str) -> Id {
        let id = self.registry.borrow_mut().register(name);
        if self.handlers.len() <= id as usize {
            self.handlers.resize_with(id as usize + 1, || None);
        }
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] {}: {}",
            self.time(),
            get_colored("DEBUG", colored::Color::Blue),
            what,
            json!({"name": name, "id": id})
        );
        id
    }

    /// Returns the id of the named component.
    ///
    /// Panics if no component has this name.
    pub fn lookup_id(&self, name: &str) -> Id {
        self.registry
            .borrow()
            .id(name)
            .unwrap_or_else(|| panic!("no component named {}", name))
    }

    /// Returns the name of the component, `#<id>` for unknown ids.
    pub fn lookup_name(&self, id: Id) -> String {
        match self.registry.borrow().name(id) {
            Some(name) => name.to_owned(),
            None => format!("#{}", id),
        }
    }

    /// Creates the context of a component. Contexts created with the same name share the id.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use gridsim_core::Simulation;
    ///
    /// let mut sim = Simulation::new(123);
    /// let gis_ctx = sim.create_context("gis");
    /// let resource_ctx = sim.create_context("resource");
    /// assert_eq!(gis_ctx.id(), 0);
    /// assert_eq!(resource_ctx.id(), 1);
    /// assert_eq!(sim.lookup_id("resource"), 1);
    /// ```
    pub fn create_context<S: AsRef<str>>(&mut self, name: S) -> SimulationContext {
        let name = name.as_ref();
        let id = self.register(name, "Created context");
        SimulationContext::new(id, name, self.scheduler.clone(), self.registry.clone())
    }

    /// Registers the handler receiving events of the named component and returns its id.
    pub fn add_handler<S: AsRef<str>>(&mut self, name: S, handler: Rc<RefCell<dyn EventHandler>>) -> Id {
        let id = self.register(name.as_ref(), "Added handler");
        self.handlers[id as usize] = Some(handler);
        id
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.scheduler.borrow().now()
    }

    /// Removes the next pending event and moves the clock to it, without delivering the event.
    pub fn next_event(&mut self) -> Option<Event> {
        self.scheduler.borrow_mut().pop()
    }

    fn deliver(&mut self, event: Event) {
        if log_enabled!(Trace) {
            let dst_name = self.lookup_name(event.dst);
            trace!(
                target: &dst_name,
                "[{:.3} {} {}] {}",
                event.time,
                get_colored("EVENT", colored::Color::BrightBlack),
                dst_name,
                json!({"type": event_type_name(&event), "data": event.data, "src": self.lookup_name(event.src)})
            );
        }
        match self.handlers.get(event.dst as usize).cloned().flatten() {
            Some(handler) => handler.borrow_mut().on(event),
            None => log_undelivered_event(event),
        }
    }

    /// Delivers the next pending event to its destination.
    ///
    /// Events to components without a handler are logged and dropped.
    /// Returns `false` if there was no pending event.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use serde::Serialize;
    /// use gridsim_core::Simulation;
    ///
    /// #[derive(Clone, Serialize)]
    /// pub struct Tick {}
    ///
    /// let mut sim = Simulation::new(123);
    /// let mut ctx = sim.create_context("clock");
    /// ctx.emit_self(Tick {}, 1.2);
    /// assert!(sim.step());
    /// assert_eq!(sim.time(), 1.2);
    /// assert!(!sim.step());
    /// ```
    pub fn step(&mut self) -> bool {
        match self.next_event() {
            Some(event) => {
                self.deliver(event);
                true
            }
            None => false,
        }
    }

    /// Performs up to `step_count` steps, returns `false` if the events ran out.
    pub fn steps(&mut self, step_count: u64) -> bool {
        (0..step_count).all(|_| self.step())
    }

    /// Runs the simulation until no events are left.
    pub fn step_until_no_events(&mut self) {
        while self.step() {}
    }

    /// Delivers events up to `time() + duration`, see [`step_until_time`](Self::step_until_time).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use serde::Serialize;
    /// use gridsim_core::Simulation;
    ///
    /// #[derive(Clone, Serialize)]
    /// pub struct Tick {}
    ///
    /// let mut sim = Simulation::new(123);
    /// let mut ctx = sim.create_context("clock");
    /// ctx.emit_self(Tick {}, 1.0);
    /// ctx.emit_self(Tick {}, 3.5);
    /// assert!(sim.step_for_duration(1.5));
    /// assert_eq!(sim.time(), 1.0);
    /// assert!(!sim.step_for_duration(3.0));
    /// assert_eq!(sim.time(), 3.5);
    /// ```
    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        self.step_until_time(self.time() + duration)
    }

    /// Delivers all events due at or before `time`.
    ///
    /// The clock stays at the last delivered event. Returns `true` if later events remain.
    pub fn step_until_time(&mut self, time: f64) -> bool {
        loop {
            let next_time = self.scheduler.borrow_mut().next_time();
            match next_time {
                Some(t) if t <= time => {
                    self.step();
                }
                Some(_) => return true,
                None => return false,
            }
        }
    }

    /// Draws a number from `range` with the seeded simulation generator.
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.scheduler.borrow_mut().rng().gen_range(range)
    }

    /// Number of events created so far, cancelled ones included.
    pub fn event_count(&self) -> u64 {
        self.scheduler.borrow().issued()
    }

    /// Number of events waiting for delivery.
    pub fn pending_event_count(&self) -> usize {
        self.scheduler.borrow().live_count()
    }

    /// Cancels pending events matching the filter, returns their number.
    pub fn cancel_events<F: EventFilter>(&mut self, filter: F) -> usize {
        self.scheduler.borrow_mut().cancel_matching(|e| filter.matches(e))
    }
}
