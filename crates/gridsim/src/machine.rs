//! Machines and processing elements (PEs) of a grid resource.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeStatus {
    Free,
    Busy,
    Failed,
}

/// Processing element (CPU core) with a MIPS rating.
#[derive(Clone, Debug, Serialize)]
pub struct Pe {
    pub id: u32,
    pub mips: f64,
    pub status: PeStatus,
}

impl Pe {
    pub fn new(id: u32, mips: f64) -> Self {
        Self {
            id,
            mips,
            status: PeStatus::Free,
        }
    }
}

/// Machine composed of one or more PEs.
#[derive(Clone, Debug, Serialize)]
pub struct Machine {
    id: u32,
    pes: Vec<Pe>,
    failed: bool,
}

impl Machine {
    pub fn new(id: u32, pes: Vec<Pe>) -> Self {
        Self { id, pes, failed: false }
    }

    /// Creates a machine with `num_pe` identical PEs.
    pub fn with_identical_pes(id: u32, num_pe: u32, mips: f64) -> Self {
        Self::new(id, (0..num_pe).map(|pe_id| Pe::new(pe_id, mips)).collect())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pes(&self) -> &[Pe] {
        &self.pes
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn num_pe(&self) -> u32 {
        self.pes.len() as u32
    }

    pub fn num_free_pe(&self) -> u32 {
        self.count(PeStatus::Free)
    }

    pub fn num_busy_pe(&self) -> u32 {
        self.count(PeStatus::Busy)
    }

    fn count(&self, status: PeStatus) -> u32 {
        self.pes.iter().filter(|pe| pe.status == status).count() as u32
    }

    /// Total MIPS of working PEs.
    pub fn mips_rating(&self) -> f64 {
        self.pes
            .iter()
            .filter(|pe| pe.status != PeStatus::Failed)
            .map(|pe| pe.mips)
            .sum()
    }

    pub fn set_pe_status(&mut self, pe_id: u32, status: PeStatus) -> bool {
        match self.pes.iter_mut().find(|pe| pe.id == pe_id) {
            Some(pe) => {
                pe.status = status;
                true
            }
            None => false,
        }
    }

    fn set_failed(&mut self, failed: bool) {
        self.failed = failed;
        let status = if failed { PeStatus::Failed } else { PeStatus::Free };
        for pe in self.pes.iter_mut() {
            pe.status = status;
        }
    }
}

/// PEs of one machine held by a running gridlet or an active reservation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeAllocation {
    pub machine_id: u32,
    pub pe_ids: Vec<u32>,
}

impl PeAllocation {
    pub fn num_pe(&self) -> u32 {
        self.pe_ids.len() as u32
    }
}

/// All machines of a resource.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MachineList {
    machines: Vec<Machine>,
}

impl MachineList {
    pub fn new(machines: Vec<Machine>) -> Self {
        Self { machines }
    }

    /// Creates `count` machines with `pes_per_machine` identical PEs each.
    pub fn homogeneous(count: u32, pes_per_machine: u32, mips: f64) -> Self {
        Self::new(
            (0..count)
                .map(|id| Machine::with_identical_pes(id, pes_per_machine, mips))
                .collect(),
        )
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    pub fn machine(&self, machine_id: u32) -> Option<&Machine> {
        self.machines.iter().find(|m| m.id == machine_id)
    }

    fn machine_mut(&mut self, machine_id: u32) -> Option<&mut Machine> {
        self.machines.iter_mut().find(|m| m.id == machine_id)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Total number of PEs, failed ones included.
    pub fn num_pe(&self) -> u32 {
        self.machines.iter().map(|m| m.num_pe()).sum()
    }

    /// Number of PEs on machines that have not failed.
    pub fn num_working_pe(&self) -> u32 {
        self.machines
            .iter()
            .filter(|m| !m.failed)
            .map(|m| m.num_pe())
            .sum()
    }

    pub fn num_free_pe(&self) -> u32 {
        self.machines.iter().map(|m| m.num_free_pe()).sum()
    }

    pub fn num_busy_pe(&self) -> u32 {
        self.machines.iter().map(|m| m.num_busy_pe()).sum()
    }

    pub fn num_failed_machines(&self) -> u32 {
        self.machines.iter().filter(|m| m.failed).count() as u32
    }

    /// MIPS rating of the first PE of the first working machine.
    ///
    /// Falls back to the first machine when all machines have failed.
    pub fn mips_of_one_pe(&self) -> f64 {
        self.machines
            .iter()
            .find(|m| !m.failed)
            .or_else(|| self.machines.first())
            .and_then(|m| m.pes.first())
            .map_or(0., |pe| pe.mips)
    }

    /// Total MIPS of working PEs.
    pub fn mips_rating(&self) -> f64 {
        self.machines.iter().map(|m| m.mips_rating()).sum()
    }

    pub fn set_pe_status(&mut self, machine_id: u32, pe_id: u32, status: PeStatus) -> bool {
        self.machine_mut(machine_id)
            .map_or(false, |m| m.set_pe_status(pe_id, status))
    }

    /// Returns a working machine with at least `num_pe` free PEs.
    pub fn machine_with_free_pe(&self, num_pe: u32) -> Option<&Machine> {
        self.machines
            .iter()
            .find(|m| !m.failed && m.num_free_pe() >= num_pe)
    }

    /// Marks `num_pe` free PEs of one machine as busy.
    pub fn allocate(&mut self, num_pe: u32) -> Option<PeAllocation> {
        let machine_id = self.machine_with_free_pe(num_pe)?.id;
        let machine = self.machine_mut(machine_id)?;
        let mut pe_ids = Vec::with_capacity(num_pe as usize);
        for pe in machine.pes.iter_mut().filter(|pe| pe.status == PeStatus::Free) {
            if pe_ids.len() == num_pe as usize {
                break;
            }
            pe.status = PeStatus::Busy;
            pe_ids.push(pe.id);
        }
        Some(PeAllocation { machine_id, pe_ids })
    }

    /// Marks the first `count` working PEs as busy and the other working PEs as free.
    ///
    /// Used by policies that do not bind gridlets to particular PEs.
    pub fn occupy(&mut self, count: u32) {
        let mut left = count;
        for machine in self.machines.iter_mut().filter(|m| !m.failed) {
            for pe in machine.pes.iter_mut() {
                if left > 0 {
                    pe.status = PeStatus::Busy;
                    left -= 1;
                } else {
                    pe.status = PeStatus::Free;
                }
            }
        }
    }

    /// Marks allocated PEs as free unless their machine has failed meanwhile.
    pub fn release(&mut self, allocation: &PeAllocation) {
        if let Some(machine) = self.machine_mut(allocation.machine_id) {
            if machine.failed {
                return;
            }
            for pe_id in allocation.pe_ids.iter() {
                machine.set_pe_status(*pe_id, PeStatus::Free);
            }
        }
    }

    /// Marks the machine and all its PEs as failed, returns `false` if it was already failed or is unknown.
    pub fn fail_machine(&mut self, machine_id: u32) -> bool {
        match self.machine_mut(machine_id) {
            Some(machine) if !machine.failed => {
                machine.set_failed(true);
                true
            }
            _ => false,
        }
    }

    /// Brings a failed machine back with all PEs free, returns `false` if it was not failed.
    pub fn recover_machine(&mut self, machine_id: u32) -> bool {
        match self.machine_mut(machine_id) {
            Some(machine) if machine.failed => {
                machine.set_failed(false);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_uses_single_machine() {
        let mut machines = MachineList::homogeneous(2, 2, 100.);
        let a = machines.allocate(2).unwrap();
        assert_eq!(a.machine_id, 0);
        assert_eq!(a.pe_ids, vec![0, 1]);
        let b = machines.allocate(1).unwrap();
        assert_eq!(b.machine_id, 1);
        assert!(machines.allocate(2).is_none());
        assert_eq!(machines.num_free_pe(), 1);
        assert_eq!(machines.num_busy_pe(), 3);
        machines.release(&a);
        assert_eq!(machines.num_free_pe(), 3);
    }

    #[test]
    fn failed_machine_is_excluded() {
        let mut machines = MachineList::homogeneous(2, 4, 50.);
        let a = machines.allocate(3).unwrap();
        assert!(machines.fail_machine(a.machine_id));
        assert!(!machines.fail_machine(a.machine_id));
        machines.release(&a);
        assert_eq!(machines.num_pe(), 8);
        assert_eq!(machines.num_working_pe(), 4);
        assert_eq!(machines.num_free_pe(), 4);
        assert_eq!(machines.num_failed_machines(), 1);
        assert_eq!(machines.mips_rating(), 200.);
        assert!(machines.recover_machine(a.machine_id));
        assert_eq!(machines.num_free_pe(), 8);
    }

    #[test]
    fn occupy_skips_failed_machines() {
        let mut machines = MachineList::homogeneous(2, 2, 10.);
        machines.fail_machine(0);
        machines.occupy(5);
        assert_eq!(machines.num_busy_pe(), 2);
        machines.occupy(1);
        assert_eq!(machines.num_busy_pe(), 1);
        assert_eq!(machines.num_free_pe(), 1);
    }

    #[test]
    fn pe_status_can_be_set() {
        let mut machines = MachineList::homogeneous(1, 2, 10.);
        assert!(machines.set_pe_status(0, 1, PeStatus::Busy));
        assert!(!machines.set_pe_status(0, 5, PeStatus::Busy));
        assert!(!machines.set_pe_status(3, 0, PeStatus::Busy));
        assert_eq!(machines.num_busy_pe(), 1);
    }
}
