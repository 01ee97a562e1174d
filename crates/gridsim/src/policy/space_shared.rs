//! Space-shared policy: each gridlet gets dedicated PEs of one machine, others wait in FCFS order.

use std::collections::VecDeque;

use gridsim_core::component::Id;

use crate::characteristics::AllocPolicyKind;
use crate::gridlet::{Gridlet, GridletStatus};
use crate::policy::{AllocPolicy, GridletList, PolicyEnv, ResGridlet};

#[derive(Default)]
pub struct SpaceShared {
    pub(crate) queue: VecDeque<ResGridlet>,
    pub(crate) running: Vec<ResGridlet>,
    pub(crate) paused: Vec<ResGridlet>,
}

impl SpaceShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if some machine is large enough to run the gridlet.
    ///
    /// With `working_only` set, failed machines are not considered.
    pub(crate) fn fits_resource(gridlet: &Gridlet, env: &PolicyEnv, working_only: bool) -> bool {
        env.machines
            .machines()
            .iter()
            .filter(|m| !(working_only && m.is_failed()))
            .any(|m| m.num_pe() >= gridlet.num_pe())
    }

    pub(crate) fn enqueue(&mut self, mut rg: ResGridlet, time: f64) {
        rg.set_status(GridletStatus::Queued, time);
        self.queue.push_back(rg);
    }

    /// Starts queued gridlets in FCFS order while the head of the queue fits on free PEs.
    pub(crate) fn schedule(&mut self, env: &mut PolicyEnv) {
        loop {
            let num_pe = match self.queue.front() {
                Some(rg) => rg.num_pe(),
                None => break,
            };
            let allocation = match env.machines.allocate(num_pe) {
                Some(allocation) => allocation,
                None => break,
            };
            if let Some(mut rg) = self.queue.pop_front() {
                rg.allocations.push(allocation);
                rg.start(env.speed(num_pe), env.time);
                self.running.push(rg);
            }
        }
    }

    /// Stops the most recently started gridlets until `needed` PEs are free.
    ///
    /// Preempted gridlets keep their progress and go back to the head of the queue.
    pub(crate) fn preempt(&mut self, needed: u32, env: &mut PolicyEnv) -> usize {
        let mut preempted = 0;
        while env.machines.num_free_pe() < needed {
            match self.running.pop() {
                Some(mut rg) => {
                    rg.stop(GridletStatus::Queued, env);
                    self.queue.push_front(rg);
                    preempted += 1;
                }
                None => break,
            }
        }
        preempted
    }

    fn collect_finished(&mut self, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let mut finished = Vec::new();
        let mut still_running = Vec::with_capacity(self.running.len());
        for mut rg in self.running.drain(..) {
            rg.advance(env.time);
            if rg.is_done() {
                rg.stop(GridletStatus::Success, env);
                finished.push(rg.gridlet);
            } else {
                rg.rate = env.speed(rg.num_pe());
                still_running.push(rg);
            }
        }
        self.running = still_running;
        finished
    }

    fn find(&self, gridlet_id: u64, user_id: Id) -> Option<&ResGridlet> {
        self.queue
            .iter()
            .chain(self.running.iter())
            .chain(self.paused.iter())
            .find(|rg| rg.is(gridlet_id, user_id))
    }

    /// Removes the gridlet from any list, stopping it if it runs.
    fn remove(&mut self, gridlet_id: u64, user_id: Id, status: GridletStatus, env: &mut PolicyEnv) -> Option<Gridlet> {
        if let Some(rg) = self.queue.remove_matching(gridlet_id, user_id) {
            return Some(rg.into_gridlet(status, env.time));
        }
        if let Some(mut rg) = self.running.remove_matching(gridlet_id, user_id) {
            rg.stop(status, env);
            self.schedule(env);
            return Some(rg.gridlet);
        }
        self.paused
            .remove_matching(gridlet_id, user_id)
            .map(|rg| rg.into_gridlet(status, env.time))
    }

    pub(crate) fn next_completion_time(&self) -> Option<f64> {
        self.running
            .iter()
            .filter_map(|rg| rg.completion_time())
            .min_by(|a, b| a.total_cmp(b))
    }
}

impl AllocPolicy for SpaceShared {
    fn kind(&self) -> AllocPolicyKind {
        AllocPolicyKind::SpaceShared
    }

    fn submit(&mut self, gridlet: Gridlet, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let rg = ResGridlet::new(gridlet, env.time);
        if !Self::fits_resource(&rg.gridlet, env, true) {
            // a machine large enough exists but is down
            let status = if Self::fits_resource(&rg.gridlet, env, false) {
                GridletStatus::FailedResourceUnavailable
            } else {
                GridletStatus::Failed
            };
            return vec![rg.into_gridlet(status, env.time)];
        }
        self.enqueue(rg, env.time);
        self.schedule(env);
        Vec::new()
    }

    fn cancel(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> Option<Gridlet> {
        self.remove(gridlet_id, user_id, GridletStatus::Canceled, env)
    }

    fn take(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> Option<Gridlet> {
        self.remove(gridlet_id, user_id, GridletStatus::Ready, env)
    }

    fn pause(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> bool {
        if let Some(mut rg) = self.queue.remove_matching(gridlet_id, user_id) {
            rg.set_status(GridletStatus::Paused, env.time);
            self.paused.push(rg);
            return true;
        }
        if let Some(mut rg) = self.running.remove_matching(gridlet_id, user_id) {
            rg.stop(GridletStatus::Paused, env);
            self.paused.push(rg);
            self.schedule(env);
            return true;
        }
        false
    }

    fn resume(&mut self, gridlet_id: u64, user_id: Id, env: &mut PolicyEnv) -> bool {
        match self.paused.remove_matching(gridlet_id, user_id) {
            Some(mut rg) => {
                rg.set_status(GridletStatus::Resumed, env.time);
                self.enqueue(rg, env.time);
                self.schedule(env);
                true
            }
            None => false,
        }
    }

    fn status(&self, gridlet_id: u64, user_id: Id) -> Option<GridletStatus> {
        self.find(gridlet_id, user_id).map(|rg| rg.gridlet.status())
    }

    fn update(&mut self, env: &mut PolicyEnv) -> Vec<Gridlet> {
        let finished = self.collect_finished(env);
        self.schedule(env);
        finished
    }

    fn next_completion(&self) -> Option<f64> {
        self.next_completion_time()
    }

    fn machines_failed(&mut self, machine_ids: &[u32], env: &mut PolicyEnv) -> Vec<Gridlet> {
        let mut lost = Vec::new();
        let mut still_running = Vec::with_capacity(self.running.len());
        for mut rg in self.running.drain(..) {
            if rg.uses_machines(machine_ids) {
                rg.stop(GridletStatus::FailedResourceUnavailable, env);
                lost.push(rg.gridlet);
            } else {
                still_running.push(rg);
            }
        }
        self.running = still_running;
        // waiting gridlets that no working machine can hold are lost as well
        let (queue, paused) = (std::mem::take(&mut self.queue), std::mem::take(&mut self.paused));
        for rg in queue {
            if Self::fits_resource(&rg.gridlet, env, true) {
                self.queue.push_back(rg);
            } else {
                lost.push(rg.into_gridlet(GridletStatus::FailedResourceUnavailable, env.time));
            }
        }
        for rg in paused {
            if Self::fits_resource(&rg.gridlet, env, true) {
                self.paused.push(rg);
            } else {
                lost.push(rg.into_gridlet(GridletStatus::FailedResourceUnavailable, env.time));
            }
        }
        self.schedule(env);
        lost
    }

    fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn running_len(&self) -> usize {
        self.running.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Machine, MachineList};

    #[test]
    fn queued_gridlet_starts_when_pes_are_freed() {
        let mut machines = MachineList::homogeneous(1, 2, 10.);
        let mut policy = SpaceShared::new();
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        policy.submit(Gridlet::new(0, 1, 100., 0, 0).with_num_pe(2), &mut env);
        policy.submit(Gridlet::new(1, 1, 50., 0, 0), &mut env);
        assert_eq!(policy.running_len(), 1);
        assert_eq!(policy.queue_len(), 1);
        assert_eq!(policy.next_completion(), Some(5.));

        let mut env = PolicyEnv::new(5., 0., &mut machines);
        let finished = policy.update(&mut env);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status(), GridletStatus::Success);
        assert_eq!(policy.status(1, 1), Some(GridletStatus::InExec));
        assert_eq!(policy.next_completion(), Some(10.));
    }

    #[test]
    fn oversized_gridlet_fails_immediately() {
        let mut machines = MachineList::homogeneous(2, 2, 10.);
        let mut policy = SpaceShared::new();
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        let returned = policy.submit(Gridlet::new(0, 1, 100., 0, 0).with_num_pe(3), &mut env);
        assert_eq!(returned.len(), 1);
        assert_eq!(returned[0].status(), GridletStatus::Failed);
    }

    #[test]
    fn paused_gridlet_keeps_progress() {
        let mut machines = MachineList::homogeneous(1, 1, 10.);
        let mut policy = SpaceShared::new();
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        policy.submit(Gridlet::new(0, 1, 100., 0, 0), &mut env);

        let mut env = PolicyEnv::new(4., 0., &mut machines);
        policy.update(&mut env);
        assert!(policy.pause(0, 1, &mut env));
        assert_eq!(policy.status(0, 1), Some(GridletStatus::Paused));
        assert_eq!(policy.next_completion(), None);

        let mut env = PolicyEnv::new(10., 0., &mut machines);
        policy.update(&mut env);
        assert!(policy.resume(0, 1, &mut env));
        assert_eq!(policy.next_completion(), Some(16.));
    }

    #[test]
    fn machine_failure_returns_running_gridlets() {
        let mut machines = MachineList::homogeneous(2, 1, 10.);
        let mut policy = SpaceShared::new();
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        policy.submit(Gridlet::new(0, 1, 100., 0, 0), &mut env);
        policy.submit(Gridlet::new(1, 1, 100., 0, 0), &mut env);
        env.machines.fail_machine(0);
        let lost = policy.machines_failed(&[0], &mut env);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].id(), 0);
        assert_eq!(lost[0].status(), GridletStatus::FailedResourceUnavailable);
        assert_eq!(policy.running_len(), 1);
    }

    #[test]
    fn gridlet_too_large_for_working_machines_is_lost() {
        let mut machines = MachineList::new(vec![
            Machine::with_identical_pes(0, 4, 10.),
            Machine::with_identical_pes(1, 1, 20.),
        ]);
        let mut policy = SpaceShared::new();
        let mut env = PolicyEnv::new(0., 0., &mut machines);
        policy.submit(Gridlet::new(0, 1, 100., 0, 0).with_num_pe(4), &mut env);
        policy.submit(Gridlet::new(1, 1, 100., 0, 0).with_num_pe(2), &mut env);
        assert_eq!(policy.queue_len(), 1);

        env.machines.fail_machine(0);
        let lost = policy.machines_failed(&[0], &mut env);
        assert_eq!(lost.len(), 2);
        assert!(lost
            .iter()
            .all(|g| g.status() == GridletStatus::FailedResourceUnavailable));

        let returned = policy.submit(Gridlet::new(2, 1, 100., 0, 0).with_num_pe(2), &mut env);
        assert_eq!(returned[0].status(), GridletStatus::FailedResourceUnavailable);
        let returned = policy.submit(Gridlet::new(3, 1, 100., 0, 0).with_num_pe(8), &mut env);
        assert_eq!(returned[0].status(), GridletStatus::Failed);

        // speed follows the working machine
        assert_eq!(env.speed(1), 20.);
        assert!(policy.submit(Gridlet::new(4, 1, 100., 0, 0), &mut env).is_empty());
        assert_eq!(policy.next_completion(), Some(5.));
    }
}
