//! Event handling.

use crate::event::Event;

/// Component reacting to the events delivered to it.
///
/// Handlers are registered with [`Simulation::add_handler`](crate::Simulation::add_handler) and
/// usually keep their [`SimulationContext`](crate::SimulationContext) to answer or set timers.
///
/// # Examples
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use serde::Serialize;
/// use gridsim_core::{cast, Event, EventHandler, Simulation, SimulationContext};
///
/// #[derive(Clone, Serialize)]
/// pub struct Heartbeat {
///     free_pes: u32,
/// }
///
/// pub struct Registry {
///     free_pes: u32,
///     ctx: SimulationContext,
/// }
///
/// impl EventHandler for Registry {
///     fn on(&mut self, event: Event) {
///         cast!(match event.data {
///             Heartbeat { free_pes } => {
///                 self.free_pes = free_pes;
///             }
///         })
///     }
/// }
///
/// let mut sim = Simulation::new(123);
/// let mut resource_ctx = sim.create_context("resource");
/// let registry_ctx = sim.create_context("registry");
/// let registry = Rc::new(RefCell::new(Registry { free_pes: 0, ctx: registry_ctx }));
/// let registry_id = sim.add_handler("registry", registry.clone());
/// resource_ctx.emit(Heartbeat { free_pes: 4 }, registry_id, 0.5);
/// sim.step();
/// assert_eq!(registry.borrow().free_pes, 4);
/// ```
pub trait EventHandler {
    /// Handles an event addressed to the component.
    fn on(&mut self, event: Event);
}

/// Matches the payload of `event` against a list of payload types and binds their fields.
///
/// Arms are tried in order. A payload of any other type is logged as unhandled.
///
/// # Examples
///
/// ```rust
/// use serde::Serialize;
/// use gridsim_core::{cast, Event, EventHandler, SimulationContext};
///
/// #[derive(Clone, Serialize)]
/// pub struct JobSubmit {
///     length: f64,
///     num_pe: u32,
/// }
///
/// #[derive(Clone, Serialize)]
/// pub struct JobCancel {
///     job_id: u64,
/// }
///
/// pub struct Cluster {
///     queued: Vec<f64>,
///     ctx: SimulationContext,
/// }
///
/// impl EventHandler for Cluster {
///     fn on(&mut self, event: Event) {
///         cast!(match event.data {
///             JobSubmit { length, .. } => {
///                 self.queued.push(length);
///             }
///             JobCancel { job_id } => {
///                 self.queued.remove(job_id as usize);
///             }
///         })
///     }
/// }
/// ```
#[macro_export]
macro_rules! cast {
    ( match $event:ident.data { $( $type:ident { $($fields:tt)* } => { $($body:tt)* } )+ } ) => {
        $(
            if $event.data.is::<$type>() {
                if let Ok(__payload) = $event.data.downcast::<$type>() {
                    let $type { $($fields)* } = *__payload;
                    $($body)*
                }
            } else
        )*
        {
            $crate::log::log_unhandled_event($event);
        }
    }
}
