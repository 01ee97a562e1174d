//! Filters selecting grid replies by transaction id or gridlet.

use std::marker::PhantomData;

use gridsim_core::component::Id;
use gridsim_core::{Event, EventData, EventFilter};

use crate::events::gis::ResourceList;
use crate::events::gridlet::{GridletActionAck, GridletReturn, GridletStatusReply, GridletSubmitAck};
use crate::events::reservation::{ReservationCreated, ReservationReply};
use crate::events::resource::{CharacteristicsReply, DynamicInfoReply};

/// Reply payload carrying the id of the request it answers.
pub trait Transactional {
    fn transaction(&self) -> u64;
}

macro_rules! impl_transactional {
    ($($type:ty),+) => {
        $(
            impl Transactional for $type {
                fn transaction(&self) -> u64 {
                    self.transaction
                }
            }
        )+
    };
}

impl_transactional!(
    GridletStatusReply,
    CharacteristicsReply,
    DynamicInfoReply,
    ResourceList,
    ReservationCreated,
    ReservationReply
);

/// Selects replies of type `T` to the given transaction.
pub struct TransactionFilter<T> {
    transaction: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Transactional + EventData> TransactionFilter<T> {
    pub fn new(transaction: u64) -> Self {
        Self {
            transaction,
            _marker: PhantomData,
        }
    }
}

impl<T: Transactional + EventData> EventFilter for TransactionFilter<T> {
    fn matches(&self, event: &Event) -> bool {
        event
            .data_ref::<T>()
            .map_or(false, |data| data.transaction() == self.transaction)
    }
}

/// Selects gridlet-related replies (returned gridlet, status, acks) for one gridlet of one user.
#[derive(Clone, Copy, Debug)]
pub struct GridletFilter {
    pub gridlet_id: u64,
    pub user_id: Id,
}

impl GridletFilter {
    pub fn new(gridlet_id: u64, user_id: Id) -> Self {
        Self { gridlet_id, user_id }
    }

    fn is(&self, gridlet_id: u64, user_id: Id) -> bool {
        self.gridlet_id == gridlet_id && self.user_id == user_id
    }
}

impl EventFilter for GridletFilter {
    fn matches(&self, event: &Event) -> bool {
        if let Some(r) = event.data_ref::<GridletReturn>() {
            self.is(r.gridlet.id(), r.gridlet.user_id())
        } else if let Some(r) = event.data_ref::<GridletStatusReply>() {
            self.is(r.gridlet_id, r.user_id)
        } else if let Some(r) = event.data_ref::<GridletActionAck>() {
            self.is(r.gridlet_id, r.user_id)
        } else if let Some(r) = event.data_ref::<GridletSubmitAck>() {
            self.is(r.gridlet_id, r.user_id)
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use gridsim_core::{DeferredQueue, Simulation};

    use super::*;
    use crate::gridlet::Gridlet;

    #[test]
    fn transaction_filter_matches_type_and_id() {
        let mut sim = Simulation::new(1);
        let mut ctx = sim.create_context("user");
        ctx.emit_self_now(ResourceList {
            transaction: 1,
            resources: vec![],
        });
        ctx.emit_self_now(ResourceList {
            transaction: 2,
            resources: vec![5],
        });
        let mut queue = DeferredQueue::new();
        while let Some(e) = sim.next_event() {
            queue.push(e);
        }
        let event = queue.take_first(&TransactionFilter::<ResourceList>::new(2)).unwrap();
        assert_eq!(event.data_ref::<ResourceList>().unwrap().resources, vec![5]);
        assert!(queue
            .take_first(&TransactionFilter::<ReservationReply>::new(1))
            .is_none());
    }

    #[test]
    fn gridlet_filter_matches_owner_and_id() {
        let mut sim = Simulation::new(1);
        let mut ctx = sim.create_context("user");
        ctx.emit_self_now(GridletReturn {
            gridlet: Gridlet::new(3, 0, 10., 0, 0),
        });
        ctx.emit_self_now(GridletReturn {
            gridlet: Gridlet::new(3, 1, 10., 0, 0),
        });
        let mut queue = DeferredQueue::new();
        while let Some(e) = sim.next_event() {
            queue.push(e);
        }
        assert_eq!(queue.count(&GridletFilter::new(3, 1)), 1);
        assert_eq!(queue.count(&GridletFilter::new(4, 1)), 0);
    }
}
