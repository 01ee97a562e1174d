//! Static and dynamic properties of a grid resource.

use serde::{Deserialize, Serialize};

use gridsim_core::component::Id;

use crate::machine::{MachineList, PeStatus};

/// How a resource shares its PEs between gridlets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocPolicyKind {
    /// All gridlets run at once and share the PEs.
    TimeShared,
    /// Each gridlet gets dedicated PEs, others wait in a queue.
    SpaceShared,
    /// Space-shared with support for advance reservations.
    AdvanceReservation,
}

/// Characteristics of a grid resource: architecture, OS, machines, policy, cost and time zone.
#[derive(Clone, Debug, Serialize)]
pub struct ResourceCharacteristics {
    pub architecture: String,
    pub os: String,
    pub machines: MachineList,
    pub policy: AllocPolicyKind,
    /// Price of using one PE for one second.
    pub cost_per_sec: f64,
    /// Offset from GMT in hours.
    pub time_zone: f64,
    /// Id of the resource component, set when the resource is created.
    pub resource_id: Option<Id>,
}

impl ResourceCharacteristics {
    pub fn new(
        architecture: &str,
        os: &str,
        machines: MachineList,
        policy: AllocPolicyKind,
        time_zone: f64,
        cost_per_sec: f64,
    ) -> Self {
        Self {
            architecture: architecture.to_owned(),
            os: os.to_owned(),
            machines,
            policy,
            cost_per_sec,
            time_zone,
            resource_id: None,
        }
    }

    pub fn num_pe(&self) -> u32 {
        self.machines.num_pe()
    }

    pub fn num_working_pe(&self) -> u32 {
        self.machines.num_working_pe()
    }

    pub fn num_free_pe(&self) -> u32 {
        self.machines.num_free_pe()
    }

    pub fn num_busy_pe(&self) -> u32 {
        self.machines.num_busy_pe()
    }

    pub fn num_machines(&self) -> u32 {
        self.machines.len() as u32
    }

    pub fn num_failed_machines(&self) -> u32 {
        self.machines.num_failed_machines()
    }

    pub fn mips_of_one_pe(&self) -> f64 {
        self.machines.mips_of_one_pe()
    }

    /// Total MIPS of working PEs.
    pub fn mips_rating(&self) -> f64 {
        self.machines.mips_rating()
    }

    /// Time needed to process `length` MI on one PE under the given background load.
    ///
    /// Returns infinity if the PE is fully loaded or has no capacity.
    pub fn cpu_time(&self, length: f64, load: f64) -> f64 {
        let speed = self.mips_of_one_pe() * (1. - load);
        if speed <= 0. {
            f64::INFINITY
        } else {
            length / speed
        }
    }

    /// Price of processing one MI on one PE.
    pub fn cost_per_mi(&self) -> f64 {
        let mips = self.mips_of_one_pe();
        if mips > 0. {
            self.cost_per_sec / mips
        } else {
            0.
        }
    }

    pub fn set_status_pe(&mut self, machine_id: u32, pe_id: u32, status: PeStatus) -> bool {
        self.machines.set_pe_status(machine_id, pe_id, status)
    }

    pub fn supports_reservation(&self) -> bool {
        self.policy == AllocPolicyKind::AdvanceReservation
    }

    /// Returns `true` while at least one machine is working.
    pub fn is_available(&self) -> bool {
        self.num_failed_machines() < self.num_machines()
    }
}
