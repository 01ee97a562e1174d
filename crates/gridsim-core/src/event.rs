//! Simulation events.

use std::cmp::Ordering;

use downcast_rs::{impl_downcast, Downcast};
use dyn_clone::{clone_trait_object, DynClone};
use serde::ser::Serialize;

use crate::component::Id;

/// Event identifier.
pub type EventId = u64;

/// Trait for event payloads.
///
/// The payload type acts as the event tag: handlers and filters dispatch on it.
/// Implemented automatically for every `Serialize + Clone + 'static` type.
pub trait EventData: Downcast + DynClone + erased_serde::Serialize {}

impl_downcast!(EventData);

clone_trait_object!(EventData);

erased_serde::serialize_trait_object!(EventData);

impl<T: Serialize + Clone + 'static> EventData for T {}

/// Event with its metadata and payload.
#[derive(Clone)]
pub struct Event {
    /// Unique event identifier, assigned in creation order.
    pub id: EventId,
    /// Time at which the event is delivered.
    pub time: f64,
    /// Component that emitted the event.
    pub src: Id,
    /// Component the event is destined to.
    pub dst: Id,
    /// Event payload.
    pub data: Box<dyn EventData>,
}

impl Event {
    /// Returns `true` if the payload has type `T`.
    pub fn is<T: EventData>(&self) -> bool {
        self.data.is::<T>()
    }

    /// Returns a reference to the payload if it has type `T`.
    pub fn data_ref<T: EventData>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

impl Eq for Event {}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// Inverted so that BinaryHeap pops the earliest event first.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other.time.total_cmp(&self.time).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
