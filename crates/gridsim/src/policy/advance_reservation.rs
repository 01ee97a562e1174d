//! Space-shared policy with advance reservation support.

use std::collections::VecDeque;

use indexmap::IndexMap;
use log::warn;

use gridsim_core::component::Id;
use gridsim_core::EPSILON;

use crate::characteristics::AllocPolicyKind;
use crate::error::ReservationError;
use crate::gridlet::{Gridlet, GridletStatus};
use crate::machine::PeAllocation;
use crate::policy::space_shared::SpaceShared;
use crate::policy::{AllocPolicy, GridletList, PolicyEnv, ReservationPolicy, ResGridlet};
use crate::reservation::{Reservation, ReservationBook, ReservationStatus};

/// Execution state of one reservation.
#[derive(Default)]
struct Slot {
    /// Reserved PEs not used by a gridlet, one PE per allocation.
    pool: Vec<PeAllocation>,
    waiting: VecDeque<ResGridlet>,
    running: Vec<ResGridlet>,
}

impl Slot {
    /// Number of reserved PEs held by the slot, in the pool or by running gridlets.
    fn held(&self) -> u32 {
        let in_use: u32 = self
            .running
            .iter()
            .flat_map(|rg| rg.allocations.iter())
            .map(|a| a.num_pe())
            .sum();
        self.pool.len() as u32 + in_use
    }

    fn schedule(&mut self, env: &mut PolicyEnv) {
        loop {
            let num_pe = match self.waiting.front() {
                Some(rg) => rg.num_pe() as usize,
                None => break,
            };
            if self.pool.len() < num_pe {
                break;
            }
            if let Some(mut rg) = self.waiting.pop_front() {
                rg.allocations = self.pool.split_off(self.pool.len() - num_pe);
                rg.start(env.speed(num_pe as u32), env.time);
                self.running.push(rg);
            }
        }
    }

    /// Stops a running gridlet, its PEs go back to the pool.
    fn stop(&mut self, mut rg: ResGridlet, status: GridletStatus, env: &mut PolicyEnv) -> Gridlet {
        rg.advance(env.time);
        self.pool.append(&mut rg.allocations);
        rg.stop(status, env);
        rg.gridlet
    }

    fn update(&mut self, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let mut finished = Vec::new();
        let mut still_running = Vec::with_capacity(self.running.len());
        for mut rg in std::mem::take(&mut self.running) {
            rg.advance(env.time);
            if rg.is_done() {
                finished.push(self.stop(rg, GridletStatus::Success, env));
            } else {
                rg.rate = env.speed(rg.num_pe());
                still_running.push(rg);
            }
        }
        self.running = still_running;
        self.schedule(env);
        finished
    }

    /// Terminates every gridlet of the slot and releases its PEs to the resource.
    fn close(mut self, status: GridletStatus, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let mut gridlets = Vec::new();
        for mut rg in std::mem::take(&mut self.running) {
            rg.advance(env.time);
            let status = if rg.is_done() { GridletStatus::Success } else { status };
            gridlets.push(self.stop(rg, status, env));
        }
        for rg in self.waiting.drain(..) {
            gridlets.push(rg.into_gridlet(status, env.time));
        }
        for allocation in self.pool.iter() {
            env.machines.release(allocation);
        }
        gridlets
    }

    fn find(&self, gridlet_id: u64, user_id: Id) -> Option<&ResGridlet> {
        self.waiting
            .iter()
            .chain(self.running.iter())
            .find(|rg| rg.is(gridlet_id, user_id))
    }

    fn remove(&mut self, gridlet_id: u64, user_id: Id, status: GridletStatus, env: &mut PolicyEnv) -> Option<Gridlet> {
        if let Some(rg) = self.waiting.remove_matching(gridlet_id, user_id) {
            return Some(rg.into_gridlet(status, env.time));
        }
        let rg = self.running.remove_matching(gridlet_id, user_id)?;
        let gridlet = self.stop(rg, status, env);
        self.schedule(env);
        Some(gridlet)
    }
}

/// Space-shared scheduling of best-effort gridlets plus reserved PEs for booked windows.
///
/// When a committed reservation starts, it takes its PEs from the free ones, preempting
/// best-effort gridlets if needed. Gridlets bound to the reservation then run on these PEs only,
/// in FCFS order. When the window ends, the PEs return to best-effort use and unfinished bound
/// gridlets fail.
pub struct AdvanceReservation {
    best_effort: SpaceShared,
    book: ReservationBook,
    slots: IndexMap<u64, Slot>,
}

impl AdvanceReservation {
    /// Creates the policy, uncommitted reservations expire after `expiry_period` seconds.
    pub fn new(expiry_period: f64) -> Self {
        Self {
            best_effort: SpaceShared::new(),
            book: ReservationBook::new(expiry_period),
            slots: IndexMap::new(),
        }
    }

    pub fn book(&self) -> &ReservationBook {
        &self.book
    }

    fn activate(&mut self, id: u64, env: &mut PolicyEnv) {
        let num_pe = match self.book.get(id) {
            Some(r) => r.num_pe,
            None => return,
        };
        self.book.set_status(id, ReservationStatus::Active);
        if env.machines.num_free_pe() < num_pe {
            self.best_effort.preempt(num_pe, env);
        }
        let slot = self.slots.entry(id).or_default();
        Self::fill(slot, num_pe, env);
        if slot.held() < num_pe {
            warn!(target: "policy", "reservation {} got {} of {} PEs", id, slot.held(), num_pe);
        }
        slot.schedule(env);
    }

    fn fill(slot: &mut Slot, num_pe: u32, env: &mut PolicyEnv) {
        while slot.held() < num_pe {
            match env.machines.allocate(1) {
                Some(allocation) => slot.pool.push(allocation),
                None => break,
            }
        }
    }

    /// Gives free PEs to active reservations holding fewer PEs than they booked.
    fn refill(&mut self, env: &mut PolicyEnv) {
        for (id, slot) in self.slots.iter_mut() {
            let num_pe = match self.book.get(*id) {
                Some(r) if r.status == ReservationStatus::Active => r.num_pe,
                _ => continue,
            };
            if slot.held() < num_pe {
                Self::fill(slot, num_pe, env);
                slot.schedule(env);
            }
        }
    }

    /// Closes the reservation slot and gives freed PEs to other reservations and best-effort gridlets.
    fn close(&mut self, id: u64, status: GridletStatus, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let gridlets = match self.slots.shift_remove(&id) {
            Some(slot) => slot.close(status, env),
            None => Vec::new(),
        };
        self.refill(env);
        self.best_effort.schedule(env);
        gridlets
    }

    /// Completes active reservations whose window is over.
    ///
    /// Runs on every update, so a window ending at the same instant as another one starts has
    /// released its PEs before the start is handled.
    fn complete_ended(&mut self, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let ended: Vec<u64> = self
            .slots
            .keys()
            .copied()
            .filter(|id| {
                self.book.get(*id).map_or(false, |r| {
                    r.status == ReservationStatus::Active && r.end_time() <= env.time + EPSILON
                })
            })
            .collect();
        let mut gridlets = Vec::new();
        for id in ended {
            self.book.set_status(id, ReservationStatus::Completed);
            gridlets.extend(self.close(id, GridletStatus::Failed, env));
        }
        gridlets
    }

    fn submit_reserved(&mut self, mut rg: ResGridlet, reservation_id: u64, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let (status, num_pe) = match self.book.get(reservation_id) {
            Some(r) if r.user_id == rg.gridlet.user_id() => (r.status, r.num_pe),
            _ => return vec![rg.into_gridlet(GridletStatus::Failed, env.time)],
        };
        if !status.is_alive() || rg.num_pe() > num_pe {
            return vec![rg.into_gridlet(GridletStatus::Failed, env.time)];
        }
        let slot = self.slots.entry(reservation_id).or_default();
        rg.set_status(GridletStatus::Queued, env.time);
        slot.waiting.push_back(rg);
        if status == ReservationStatus::Active {
            slot.schedule(env);
        }
        Vec::new()
    }
}

impl AllocPolicy for AdvanceReservation {
    fn kind(&self) -> AllocPolicyKind {
        AllocPolicyKind::AdvanceReservation
    }

    fn submit(&mut self, gridlet: Gridlet, env: &mut PolicyEnv) -> Vec<Gridlet> {
        match gridlet.reservation_id() {
            Some(reservation_id) => {
                let rg = ResGridlet::new(gridlet, env.time);
                self.submit_reserved(rg, reservation_id, env)
            }
            None => self.best_effort.submit(gridlet, env),
        }
    }

    fn cancel(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> Option<Gridlet> {
        if let Some(gridlet) = self.best_effort.cancel(gridlet_id, user_id, env) {
            return Some(gridlet);
        }
        self.slots
            .values_mut()
            .find_map(|slot| slot.remove(gridlet_id, user_id, GridletStatus::Canceled, env))
    }

    fn take(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> Option<Gridlet> {
        // bound gridlets cannot leave their reservation
        self.best_effort.take(gridlet_id, user_id, env)
    }

    fn pause(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> bool {
        self.best_effort.pause(gridlet_id, user_id, env)
    }

    fn resume(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> bool {
        self.best_effort.resume(gridlet_id, user_id, env)
    }

    fn status(&self, gridlet_id: u64, user_id: Id) -> Option<GridletStatus> {
        self.best_effort.status(gridlet_id, user_id).or_else(|| {
            self.slots
                .values()
                .find_map(|slot| slot.find(gridlet_id, user_id))
                .map(|rg| rg.gridlet.status())
        })
    }

    fn update(&mut self, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let mut finished = Vec::new();
        for slot in self.slots.values_mut() {
            finished.extend(slot.update(env));
        }
        finished.extend(self.complete_ended(env));
        // reserved windows take recovered or released PEs before best-effort gridlets
        self.refill(env);
        finished.extend(self.best_effort.update(env));
        finished
    }

    fn next_completion(&self) -> Option<f64> {
        self.slots
            .values()
            .flat_map(|slot| slot.running.iter())
            .filter_map(|rg| rg.completion_time())
            .chain(self.best_effort.next_completion_time())
            .min_by(|a, b| a.total_cmp(b))
    }

    fn machines_failed(&mut self, machine_ids: &[u32], env: &mut PolicyEnv) -> Vec<Gridlet> {
        let mut lost = Vec::new();
        for slot in self.slots.values_mut() {
            let mut still_running = Vec::with_capacity(slot.running.len());
            for rg in std::mem::take(&mut slot.running) {
                if rg.uses_machines(machine_ids) {
                    lost.push(slot.stop(rg, GridletStatus::FailedResourceUnavailable, env));
                } else {
                    still_running.push(rg);
                }
            }
            slot.running = still_running;
            slot.pool.retain(|a| !machine_ids.contains(&a.machine_id));
            slot.schedule(env);
        }
        lost.extend(self.best_effort.machines_failed(machine_ids, env));
        lost
    }

    fn queue_len(&self) -> usize {
        self.best_effort.queue_len() + self.slots.values().map(|slot| slot.waiting.len()).sum::<usize>()
    }

    fn running_len(&self) -> usize {
        self.best_effort.running_len() + self.slots.values().map(|slot| slot.running.len()).sum::<usize>()
    }

    fn as_reservation(&mut self) -> Option<&mut dyn ReservationPolicy> {
        Some(self)
    }
}

impl ReservationPolicy for AdvanceReservation {
    fn create(
        &mut self,
        user_id: Id,
        start_time: f64,
        duration: f64,
        num_pe: u32,
        env: &mut PolicyEnv,
    ) -> Result<Reservation, ReservationError> {
        let total_pe = env.machines.num_pe();
        self.book
            .create(user_id, start_time, duration, num_pe, total_pe, env.time)
            .cloned()
    }

    fn commit(&mut self, id: u64, user_id: Id, env: &mut PolicyEnv) -> Result<ReservationStatus, ReservationError> {
        let (status, start_time, end_time) = {
            let r = self.book.commit(id, user_id)?;
            (r.status, r.start_time, r.end_time())
        };
        if status == ReservationStatus::Committed && start_time <= env.time && env.time < end_time {
            self.activate(id, env);
            return Ok(ReservationStatus::Active);
        }
        Ok(status)
    }

    fn cancel(&mut self, id: u64, user_id: Id, env: &mut PolicyEnv) -> Result<Vec<Gridlet>, ReservationError> {
        self.book.cancel(id, user_id)?;
        Ok(self.close(id, GridletStatus::Canceled, env))
    }

    fn query(&self, id: u64, user_id: Id) -> Result<ReservationStatus, ReservationError> {
        self.book.query(id, user_id)
    }

    fn available_pes(&self, from: f64, to: f64, env: &PolicyEnv) -> u32 {
        self.book.available_pes(from, to, env.machines.num_pe())
    }

    fn on_start(&mut self, id: u64, env: &mut PolicyEnv) -> Vec<Gridlet> {
        if let Some(ReservationStatus::Committed) = self.book.get(id).map(|r| r.status) {
            self.activate(id, env);
        }
        Vec::new()
    }

    fn on_end(&mut self, id: u64, env: &mut PolicyEnv) -> Vec<Gridlet> {
        match self.book.get(id).map(|r| r.status) {
            Some(ReservationStatus::Active) => {
                self.book.set_status(id, ReservationStatus::Completed);
                self.close(id, GridletStatus::Failed, env)
            }
            Some(ReservationStatus::NotCommitted) | Some(ReservationStatus::Committed) => {
                self.book.set_status(id, ReservationStatus::Expired);
                self.close(id, GridletStatus::Failed, env)
            }
            _ => Vec::new(),
        }
    }

    fn on_expire(&mut self, id: u64, env: &mut PolicyEnv) -> Vec<Gridlet> {
        match self.book.get(id).map(|r| r.status) {
            Some(ReservationStatus::NotCommitted) => {
                self.book.set_status(id, ReservationStatus::Expired);
                self.close(id, GridletStatus::Failed, env)
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineList;

    fn gridlet(id: u64, length: f64) -> Gridlet {
        Gridlet::new(id, 7, length, 0, 0)
    }

    #[test]
    fn reservation_preempts_best_effort() {
        let mut machines = MachineList::homogeneous(1, 2, 10.);
        let mut policy = AdvanceReservation::new(100.);
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        assert!(policy.submit(gridlet(0, 100.), &mut env).is_empty());
        assert!(policy.submit(gridlet(1, 100.), &mut env).is_empty());
        assert_eq!(policy.running_len(), 2);

        let r = policy.create(7, 5., 10., 1, &mut env).unwrap();
        assert_eq!(policy.commit(r.id, 7, &mut env), Ok(ReservationStatus::Committed));

        let mut env = PolicyEnv::new(5., 0., &mut machines);
        assert!(policy.update(&mut env).is_empty());
        policy.on_start(r.id, &mut env);
        assert_eq!(policy.query(r.id, 7), Ok(ReservationStatus::Active));
        assert_eq!(policy.running_len(), 1);
        assert_eq!(policy.queue_len(), 1);
        assert_eq!(policy.status(1, 7), Some(GridletStatus::Queued));
    }

    #[test]
    fn bound_gridlet_fails_at_reservation_end() {
        let mut machines = MachineList::homogeneous(1, 2, 10.);
        let mut policy = AdvanceReservation::new(100.);
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        let r = policy.create(7, 0., 5., 2, &mut env).unwrap();
        assert_eq!(policy.commit(r.id, 7, &mut env), Ok(ReservationStatus::Active));
        let bound = gridlet(0, 1000.).with_reservation(r.id);
        assert!(policy.submit(bound, &mut env).is_empty());
        assert_eq!(policy.status(0, 7), Some(GridletStatus::InExec));
        assert_eq!(env.machines.num_free_pe(), 0);

        let mut env = PolicyEnv::new(5., 0., &mut machines);
        let failed = policy.update(&mut env);
        assert!(policy.on_end(r.id, &mut env).is_empty());
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status(), GridletStatus::Failed);
        assert_eq!(env.machines.num_free_pe(), 2);
        assert_eq!(policy.query(r.id, 7), Ok(ReservationStatus::Completed));
    }

    #[test]
    fn gridlet_with_unknown_reservation_fails() {
        let mut machines = MachineList::homogeneous(1, 2, 10.);
        let mut policy = AdvanceReservation::new(100.);
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        let returned = policy.submit(gridlet(0, 10.).with_reservation(42), &mut env);
        assert_eq!(returned.len(), 1);
        assert_eq!(returned[0].status(), GridletStatus::Failed);
    }

    #[test]
    fn uncommitted_reservation_expires() {
        let mut machines = MachineList::homogeneous(1, 4, 10.);
        let mut policy = AdvanceReservation::new(10.);
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        let r = policy.create(7, 50., 10., 4, &mut env).unwrap();
        assert_eq!(r.expiry_time, 10.);
        assert_eq!(policy.available_pes(50., 60., &env), 0);
        let mut env = PolicyEnv::new(10., 0., &mut machines);
        policy.on_expire(r.id, &mut env);
        assert_eq!(policy.query(r.id, 7), Ok(ReservationStatus::Expired));
        assert_eq!(policy.available_pes(50., 60., &env), 4);
        assert_eq!(
            policy.commit(r.id, 7, &mut env),
            Err(ReservationError::InvalidStatus {
                id: r.id,
                status: ReservationStatus::Expired
            })
        );
    }

    #[test]
    fn adjacent_reservations_hand_over_pes() {
        let mut machines = MachineList::homogeneous(1, 2, 10.);
        let mut policy = AdvanceReservation::new(100.);
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        let later = policy.create(7, 10., 10., 2, &mut env).unwrap();
        let earlier = policy.create(8, 5., 5., 2, &mut env).unwrap();
        policy.commit(later.id, 7, &mut env).unwrap();
        policy.commit(earlier.id, 8, &mut env).unwrap();

        let mut env = PolicyEnv::new(5., 0., &mut machines);
        policy.update(&mut env);
        policy.on_start(earlier.id, &mut env);
        let bound = Gridlet::new(0, 8, 10., 0, 0).with_reservation(earlier.id);
        assert!(policy.submit(bound, &mut env).is_empty());

        // the later window starts before the end of the earlier one is handled
        let mut env = PolicyEnv::new(10., 0., &mut machines);
        let finished = policy.update(&mut env);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status(), GridletStatus::Success);
        assert_eq!(policy.query(earlier.id, 8), Ok(ReservationStatus::Completed));
        policy.on_start(later.id, &mut env);
        assert!(policy.on_end(earlier.id, &mut env).is_empty());
        assert_eq!(policy.query(later.id, 7), Ok(ReservationStatus::Active));

        let bound = Gridlet::new(0, 7, 10., 0, 0).with_reservation(later.id);
        assert!(policy.submit(bound, &mut env).is_empty());
        assert_eq!(policy.status(0, 7), Some(GridletStatus::InExec));
        assert_eq!(env.machines.num_free_pe(), 0);
    }
}
