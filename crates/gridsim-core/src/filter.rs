//! Event filters and deferred event queue.
//!
//! A filter is a predicate over events. Typical filters check the payload type (the event tag)
//! and some payload field such as a transaction id. Filters are used to cancel pending events and
//! to pick events out of a [`DeferredQueue`] where a component parks the events it is not ready
//! to process yet.

use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::component::Id;
use crate::event::{Event, EventData};

/// Predicate over events.
pub trait EventFilter {
    /// Returns `true` if the event is selected by the filter.
    fn matches(&self, event: &Event) -> bool;

    /// Combines two filters, selecting events matched by both.
    fn and<G: EventFilter>(self, other: G) -> And<Self, G>
    where
        Self: Sized,
    {
        And(self, other)
    }

    /// Combines two filters, selecting events matched by any of them.
    fn or<G: EventFilter>(self, other: G) -> Or<Self, G>
    where
        Self: Sized,
    {
        Or(self, other)
    }
}

impl<F> EventFilter for F
where
    F: Fn(&Event) -> bool,
{
    fn matches(&self, event: &Event) -> bool {
        self(event)
    }
}

/// Selects events with payload of type `T`.
pub struct TypeFilter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: EventData> TypeFilter<T> {
    /// Creates a filter for payload type `T`.
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T: EventData> Default for TypeFilter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EventData> EventFilter for TypeFilter<T> {
    fn matches(&self, event: &Event) -> bool {
        event.is::<T>()
    }
}

/// Selects events with payload of type `T` whose fields satisfy the predicate.
pub struct TagFilter<T, F> {
    pred: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> TagFilter<T, F>
where
    T: EventData,
    F: Fn(&T) -> bool,
{
    /// Creates a filter for payload type `T` and payload predicate `pred`.
    pub fn new(pred: F) -> Self {
        Self {
            pred,
            _marker: PhantomData,
        }
    }
}

impl<T, F> EventFilter for TagFilter<T, F>
where
    T: EventData,
    F: Fn(&T) -> bool,
{
    fn matches(&self, event: &Event) -> bool {
        event.data_ref::<T>().map_or(false, |data| (self.pred)(data))
    }
}

/// Selects events emitted by the given component.
#[derive(Clone, Copy, Debug)]
pub struct SourceFilter(pub Id);

impl EventFilter for SourceFilter {
    fn matches(&self, event: &Event) -> bool {
        event.src == self.0
    }
}

/// Conjunction of two filters, see [`EventFilter::and`].
pub struct And<A, B>(A, B);

impl<A: EventFilter, B: EventFilter> EventFilter for And<A, B> {
    fn matches(&self, event: &Event) -> bool {
        self.0.matches(event) && self.1.matches(event)
    }
}

/// Disjunction of two filters, see [`EventFilter::or`].
pub struct Or<A, B>(A, B);

impl<A: EventFilter, B: EventFilter> EventFilter for Or<A, B> {
    fn matches(&self, event: &Event) -> bool {
        self.0.matches(event) || self.1.matches(event)
    }
}

/// Queue of received events kept in arrival order until the component asks for them.
///
/// # Examples
///
/// ```rust
/// use serde::Serialize;
/// use gridsim_core::{DeferredQueue, Simulation, TagFilter};
///
/// #[derive(Clone, Serialize)]
/// pub struct Reply {
///     transaction: u64,
/// }
///
/// let mut sim = Simulation::new(123);
/// let mut client = sim.create_context("client");
/// client.emit_self(Reply { transaction: 1 }, 1.);
/// client.emit_self(Reply { transaction: 2 }, 2.);
///
/// let mut deferred = DeferredQueue::new();
/// while let Some(event) = sim.next_event() {
///     deferred.push(event);
/// }
/// let second = deferred.take_first(&TagFilter::new(|r: &Reply| r.transaction == 2));
/// assert_eq!(second.map(|e| e.time), Some(2.));
/// assert_eq!(deferred.len(), 1);
/// ```
#[derive(Default)]
pub struct DeferredQueue {
    events: VecDeque<Event>,
}

impl DeferredQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self { events: VecDeque::new() }
    }

    /// Appends the event to the queue.
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Returns the number of deferred events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if there are no deferred events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the number of deferred events matching the filter.
    pub fn count<F: EventFilter>(&self, filter: &F) -> usize {
        self.events.iter().filter(|e| filter.matches(e)).count()
    }

    /// Returns the earliest deferred event matching the filter without removing it.
    pub fn peek_first<F: EventFilter>(&self, filter: &F) -> Option<&Event> {
        self.events.iter().find(|e| filter.matches(e))
    }

    /// Removes and returns the earliest deferred event matching the filter.
    pub fn take_first<F: EventFilter>(&mut self, filter: &F) -> Option<Event> {
        let pos = self.events.iter().position(|e| filter.matches(e))?;
        self.events.remove(pos)
    }

    /// Removes and returns all deferred events matching the filter in arrival order.
    pub fn take_all<F: EventFilter>(&mut self, filter: &F) -> Vec<Event> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.events.len());
        for event in self.events.drain(..) {
            if filter.matches(&event) {
                taken.push(event);
            } else {
                kept.push_back(event);
            }
        }
        self.events = kept;
        taken
    }
}
