//! Time-shared policy: all gridlets run at once and share the resource MIPS.

use gridsim_core::component::Id;

use crate::characteristics::AllocPolicyKind;
use crate::gridlet::{Gridlet, GridletStatus};
use crate::policy::{AllocPolicy, GridletList, PolicyEnv, ResGridlet};

/// Processor sharing over the working PEs of a resource.
///
/// Each running gridlet is served at `min(num_pe * mips_of_one_pe, total_mips / running)`, scaled
/// by the background load. Rates are recomputed whenever the set of running gridlets or the
/// resource capacity changes.
#[derive(Default)]
pub struct TimeShared {
    running: Vec<ResGridlet>,
    paused: Vec<ResGridlet>,
}

impl TimeShared {
    pub fn new() -> Self {
        Self::default()
    }

    fn recompute_rates(&mut self, env: &mut PolicyEnv) {
        let mut used_pes = 0;
        if !self.running.is_empty() {
            let share = env.machines.mips_rating() * (1. - env.load) / self.running.len() as f64;
            for rg in self.running.iter_mut() {
                rg.rate = env.speed(rg.num_pe()).min(share);
                used_pes += rg.num_pe();
            }
        }
        env.machines.occupy(used_pes);
    }

    fn start(&mut self, mut rg: ResGridlet, env: &mut PolicyEnv) {
        rg.start(0., env.time);
        self.running.push(rg);
        self.recompute_rates(env);
    }

    fn find(&self, gridlet_id: u64, user_id: Id) -> Option<&ResGridlet> {
        self.running
            .iter()
            .chain(self.paused.iter())
            .find(|rg| rg.is(gridlet_id, user_id))
    }

    fn remove(&mut self, gridlet_id: u64, user_id: Id, status: GridletStatus, env: &mut PolicyEnv) -> Option<Gridlet> {
        if let Some(mut rg) = self.running.remove_matching(gridlet_id, user_id) {
            rg.stop(status, env);
            self.recompute_rates(env);
            return Some(rg.gridlet);
        }
        self.paused
            .remove_matching(gridlet_id, user_id)
            .map(|rg| rg.into_gridlet(status, env.time))
    }
}

impl AllocPolicy for TimeShared {
    fn kind(&self) -> AllocPolicyKind {
        AllocPolicyKind::TimeShared
    }

    fn submit(&mut self, gridlet: Gridlet, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let rg = ResGridlet::new(gridlet, env.time);
        if env.machines.num_working_pe() == 0 {
            return vec![rg.into_gridlet(GridletStatus::FailedResourceUnavailable, env.time)];
        }
        self.start(rg, env);
        Vec::new()
    }

    fn cancel(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> Option<Gridlet> {
        self.remove(gridlet_id, user_id, GridletStatus::Canceled, env)
    }

    fn take(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> Option<Gridlet> {
        self.remove(gridlet_id, user_id, GridletStatus::Ready, env)
    }

    fn pause(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> bool {
        match self.running.remove_matching(gridlet_id, user_id) {
            Some(mut rg) => {
                rg.stop(GridletStatus::Paused, env);
                self.paused.push(rg);
                self.recompute_rates(env);
                true
            }
            None => false,
        }
    }

    fn resume(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> bool {
        match self.paused.remove_matching(gridlet_id, user_id) {
            Some(mut rg) => {
                rg.set_status(GridletStatus::Resumed, env.time);
                self.start(rg, env);
                true
            }
            None => false,
        }
    }

    fn status(&self, gridlet_id: u64, user_id: Id) -> Option<GridletStatus> {
        self.find(gridlet_id, user_id).map(|rg| rg.gridlet.status())
    }

    fn update(&mut self, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let mut finished = Vec::new();
        let mut still_running = Vec::with_capacity(self.running.len());
        for mut rg in self.running.drain(..) {
            rg.advance(env.time);
            if rg.is_done() {
                rg.stop(GridletStatus::Success, env);
                finished.push(rg.gridlet);
            } else {
                still_running.push(rg);
            }
        }
        self.running = still_running;
        self.recompute_rates(env);
        finished
    }

    fn next_completion(&self) -> Option<f64> {
        self.running
            .iter()
            .filter_map(|rg| rg.completion_time())
            .min_by(|a, b| a.total_cmp(b))
    }

    fn machines_failed(&mut self, _machine_ids: &[u32], env: &mut PolicyEnv) -> Vec<Gridlet> {
        if env.machines.num_working_pe() > 0 {
            self.recompute_rates(env);
            return Vec::new();
        }
        let mut lost = Vec::new();
        for mut rg in self.running.drain(..).chain(self.paused.drain(..)) {
            rg.stop(GridletStatus::FailedResourceUnavailable, env);
            lost.push(rg.gridlet);
        }
        lost
    }

    fn queue_len(&self) -> usize {
        0
    }

    fn running_len(&self) -> usize {
        self.running.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineList;

    #[test]
    fn gridlets_share_capacity() {
        let mut machines = MachineList::homogeneous(1, 1, 10.);
        let mut policy = TimeShared::new();
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        policy.submit(Gridlet::new(0, 1, 50., 0, 0), &mut env);
        policy.submit(Gridlet::new(1, 1, 100., 0, 0), &mut env);
        // both run at 5 MIPS until the first one finishes
        assert_eq!(policy.next_completion(), Some(10.));

        let mut env = PolicyEnv::new(10., 0., &mut machines);
        let finished = policy.update(&mut env);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id(), 0);
        assert_eq!(policy.next_completion(), Some(15.));
    }

    #[test]
    fn rate_is_capped_by_own_pes() {
        let mut machines = MachineList::homogeneous(1, 4, 10.);
        let mut policy = TimeShared::new();
        let mut env = PolicyEnv::new(0., 0.5, &mut machines);
        policy.submit(Gridlet::new(0, 1, 50., 0, 0), &mut env);
        assert_eq!(policy.next_completion(), Some(10.));
        assert_eq!(env.machines.num_busy_pe(), 1);
    }

    #[test]
    fn losing_all_machines_fails_gridlets() {
        let mut machines = MachineList::homogeneous(1, 2, 10.);
        let mut policy = TimeShared::new();
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        policy.submit(Gridlet::new(0, 1, 50., 0, 0), &mut env);
        env.machines.fail_machine(0);
        let lost = policy.machines_failed(&[0], &mut env);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].status(), GridletStatus::FailedResourceUnavailable);
        assert_eq!(policy.running_len(), 0);
    }
}
