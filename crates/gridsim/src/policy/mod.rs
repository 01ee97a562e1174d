//! Policies sharing resource PEs between gridlets.

pub mod advance_reservation;
pub mod space_shared;
pub mod time_shared;

use log::error;

use gridsim_core::component::Id;

use crate::characteristics::AllocPolicyKind;
use crate::error::ReservationError;
use crate::gridlet::{Gridlet, GridletStatus};
use crate::machine::{MachineList, PeAllocation};
use crate::reservation::{Reservation, ReservationStatus};

pub use advance_reservation::AdvanceReservation;
pub use space_shared::SpaceShared;
pub use time_shared::TimeShared;

/// Relative precision used to decide that a gridlet has no work left.
const FINISH_PRECISION: f64 = 1e-9;

/// Resource state passed to the policy on each call.
pub struct PolicyEnv<'a> {
    /// Current simulation time.
    pub time: f64,
    /// Background load in `[0, 1]`, delivered MIPS are scaled by `1 - load`.
    pub load: f64,
    pub machines: &'a mut MachineList,
}

impl<'a> PolicyEnv<'a> {
    pub fn new(time: f64, load: f64, machines: &'a mut MachineList) -> Self {
        Self { time, load, machines }
    }

    /// Processing speed of `num_pe` dedicated PEs.
    pub fn speed(&self, num_pe: u32) -> f64 {
        self.machines.mips_of_one_pe() * num_pe as f64 * (1. - self.load)
    }
}

/// Allocation policy of a grid resource.
///
/// The policy owns the gridlets present on the resource. The resource calls
/// [`update`](AllocPolicy::update) before any other operation at a given time, so other calls see
/// progress that is already current. Gridlets reaching a terminal state are handed back to the
/// caller, which returns them to their owners. After each call the resource asks for
/// [`next_completion`](AllocPolicy::next_completion) and schedules a wake-up at that time.
pub trait AllocPolicy {
    fn kind(&self) -> AllocPolicyKind;

    /// Accepts a gridlet that has just arrived. Gridlets that can never run are returned at once.
    fn submit(&mut self, gridlet: Gridlet, env: &mut PolicyEnv) -> Vec<Gridlet>;

    /// Removes the gridlet from the resource and returns it with `Canceled` status.
    fn cancel(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> Option<Gridlet>;

    /// Removes the gridlet from the resource keeping its status, used to move it elsewhere.
    fn take(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> Option<Gridlet>;

    fn pause(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> bool;

    fn resume(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> bool;

    fn status(&self, gridlet_id: u64, user_id: Id) -> Option<GridletStatus>;

    /// Advances running gridlets to `env.time`, returns finished ones and starts waiting ones.
    fn update(&mut self, env: &mut PolicyEnv) -> Vec<Gridlet>;

    /// Absolute time of the next gridlet completion.
    fn next_completion(&self) -> Option<f64>;

    /// Handles machines that have just failed (already marked in `env.machines`).
    ///
    /// Returns gridlets lost with the machines.
    fn machines_failed(&mut self, machine_ids: &[u32], env: &mut PolicyEnv) -> Vec<Gridlet>;

    /// Handles machines that have just been recovered (already marked in `env.machines`).
    fn machines_recovered(&mut self, env: &mut PolicyEnv) -> Vec<Gridlet> {
        self.update(env)
    }

    fn queue_len(&self) -> usize;

    fn running_len(&self) -> usize;

    /// Returns the reservation interface if the policy supports advance reservation.
    fn as_reservation(&mut self) -> Option<&mut dyn ReservationPolicy> {
        None
    }
}

/// Advance reservation operations of a policy.
pub trait ReservationPolicy {
    fn create(
        &mut self,
        user_id: Id,
        start_time: f64,
        duration: f64,
        num_pe: u32,
        env: &mut PolicyEnv,
    ) -> Result<Reservation, ReservationError>;

    /// Commits the reservation, activating it if its window has already begun.
    fn commit(&mut self, id: u64, user_id: Id, env: &mut PolicyEnv) -> Result<ReservationStatus, ReservationError>;

    /// Cancels the reservation, returns its gridlets with `Canceled` status.
    fn cancel(&mut self, id: u64, user_id: Id, env: &mut PolicyEnv) -> Result<Vec<Gridlet>, ReservationError>;

    fn query(&self, id: u64, user_id: Id) -> Result<ReservationStatus, ReservationError>;

    /// Number of PEs that can still be reserved for `[from, to)`.
    fn available_pes(&self, from: f64, to: f64, env: &PolicyEnv) -> u32;

    /// Reservation window begins.
    fn on_start(&mut self, id: u64, env: &mut PolicyEnv) -> Vec<Gridlet>;

    /// Reservation window ends, returns gridlets that did not finish in time.
    fn on_end(&mut self, id: u64, env: &mut PolicyEnv) -> Vec<Gridlet>;

    /// Expiry time of an uncommitted reservation has come.
    fn on_expire(&mut self, id: u64, env: &mut PolicyEnv) -> Vec<Gridlet>;
}

/// Gridlet held by a policy together with its processing progress.
pub(crate) struct ResGridlet {
    pub gridlet: Gridlet,
    pub allocations: Vec<PeAllocation>,
    /// Processing speed in MIPS, zero while not running.
    pub rate: f64,
    pub last_update: f64,
    /// Work done in MI, including work done on previous resources.
    pub done: f64,
    /// Execution time on this resource.
    pub cpu_time: f64,
}

impl ResGridlet {
    pub fn new(gridlet: Gridlet, time: f64) -> Self {
        let done = gridlet.finished_so_far();
        let cpu_time = gridlet.actual_cpu_time();
        Self {
            gridlet,
            allocations: Vec::new(),
            rate: 0.,
            last_update: time,
            done,
            cpu_time,
        }
    }

    pub fn is(&self, gridlet_id: u64, user_id: Id) -> bool {
        self.gridlet.id() == gridlet_id && self.gridlet.user_id() == user_id
    }

    pub fn num_pe(&self) -> u32 {
        self.gridlet.num_pe()
    }

    pub fn remaining(&self) -> f64 {
        (self.gridlet.length() - self.done).max(0.)
    }

    pub fn is_done(&self) -> bool {
        self.remaining() <= FINISH_PRECISION * self.gridlet.length().max(1.)
    }

    /// Brings the progress up to `time` at the current rate.
    pub fn advance(&mut self, time: f64) {
        let elapsed = (time - self.last_update).max(0.);
        if self.gridlet.status() == GridletStatus::InExec {
            self.done = (self.done + self.rate * elapsed).min(self.gridlet.length());
            self.cpu_time += elapsed;
        }
        self.last_update = time;
    }

    pub fn completion_time(&self) -> Option<f64> {
        if self.gridlet.status() == GridletStatus::InExec && self.rate > 0. {
            Some(self.last_update + self.remaining() / self.rate)
        } else {
            None
        }
    }

    pub fn set_status(&mut self, status: GridletStatus, time: f64) {
        self.gridlet.set_progress(self.done, self.cpu_time);
        if let Err(e) = self.gridlet.set_status(status, time) {
            error!(target: "policy", "{}", e);
        }
    }

    pub fn start(&mut self, rate: f64, time: f64) {
        self.last_update = time;
        self.rate = rate;
        self.set_status(GridletStatus::InExec, time);
    }

    /// Stops execution, releasing the PEs held by the gridlet.
    pub fn stop(&mut self, status: GridletStatus, env: &mut PolicyEnv) {
        self.advance(env.time);
        for allocation in self.allocations.drain(..) {
            env.machines.release(&allocation);
        }
        self.rate = 0.;
        self.set_status(status, env.time);
    }

    /// Returns `true` if the gridlet holds a PE of one of the machines.
    pub fn uses_machines(&self, machine_ids: &[u32]) -> bool {
        self.allocations.iter().any(|a| machine_ids.contains(&a.machine_id))
    }

    pub fn into_gridlet(mut self, status: GridletStatus, time: f64) -> Gridlet {
        self.set_status(status, time);
        self.gridlet
    }
}

/// Lookup by `(gridlet_id, user_id)` over the containers used by policies.
pub(crate) trait GridletList {
    fn remove_matching(&mut self, gridlet_id: u64, user_id: Id) -> Option<ResGridlet>;
}

impl GridletList for Vec<ResGridlet> {
    fn remove_matching(&mut self, gridlet_id: u64, user_id: Id) -> Option<ResGridlet> {
        let pos = self.iter().position(|rg| rg.is(gridlet_id, user_id))?;
        Some(self.remove(pos))
    }
}

impl GridletList for std::collections::VecDeque<ResGridlet> {
    fn remove_matching(&mut self, gridlet_id: u64, user_id: Id) -> Option<ResGridlet> {
        let pos = self.iter().position(|rg| rg.is(gridlet_id, user_id))?;
        self.remove(pos)
    }
}
