//! Random and scheduled machine failures.

use rand_distr::Exp;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use gridsim_core::cast;
use gridsim_core::component::Id;
use gridsim_core::context::SimulationContext;
use gridsim_core::event::Event;
use gridsim_core::handler::EventHandler;
use gridsim_core::{log_debug, log_info};

use crate::error::ConfigError;
use crate::events::resource::{MachineFailure, MachineRecovery};

/// Parameters of random failure injection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureModel {
    /// Mean time between two failures in the whole grid.
    pub mean_time_between_failures: f64,
    /// Mean time needed to repair failed machines.
    pub mean_repair_time: f64,
    /// Upper bound on the number of machines failing at once.
    pub max_failed_machines: u32,
    /// No failures are injected after this time.
    pub until: f64,
}

#[derive(Clone, Serialize)]
struct InjectFailure {}

#[derive(Clone, Serialize)]
struct FailMachines {
    resource: Id,
    machine_ids: Vec<u32>,
    repair_after: Option<f64>,
}

#[derive(Clone, Serialize)]
struct RepairMachines {
    resource: Id,
    machine_ids: Vec<u32>,
}

/// Resource subject to failures, with the ids of its machines.
#[derive(Clone, Debug)]
struct Target {
    resource: Id,
    machine_ids: Vec<u32>,
}

/// Component failing random machines of random resources.
///
/// Inter-failure and repair times are exponentially distributed. Each failure picks a resource
/// and from one up to `max_failed_machines` of its working machines.
///
/// Failures of machines that are already down are ignored, so each failed machine is repaired
/// exactly once by the failure that brought it down.
pub struct FailureInjector {
    targets: Vec<Target>,
    down: FxHashSet<(Id, u32)>,
    model: Option<FailureModel>,
    interval: Option<Exp<f64>>,
    repair: Option<Exp<f64>>,
    injected: u64,
    ctx: SimulationContext,
}

impl FailureInjector {
    /// Creates an injector that only runs explicitly scheduled failures.
    pub fn new(ctx: SimulationContext) -> Self {
        Self {
            targets: Vec::new(),
            down: FxHashSet::default(),
            model: None,
            interval: None,
            repair: None,
            injected: 0,
            ctx,
        }
    }

    /// Creates an injector producing random failures according to the model.
    pub fn with_model(model: FailureModel, ctx: SimulationContext) -> Result<Self, ConfigError> {
        if !(model.mean_time_between_failures > 0.) || !(model.mean_repair_time > 0.) {
            return Err(ConfigError::Invalid(format!(
                "failure model times must be positive, got {} and {}",
                model.mean_time_between_failures, model.mean_repair_time
            )));
        }
        let invalid = |e: rand_distr::ExpError| ConfigError::Invalid(e.to_string());
        let interval = Exp::new(1. / model.mean_time_between_failures).map_err(invalid)?;
        let repair = Exp::new(1. / model.mean_repair_time).map_err(invalid)?;
        Ok(Self {
            targets: Vec::new(),
            down: FxHashSet::default(),
            model: Some(model),
            interval: Some(interval),
            repair: Some(repair),
            injected: 0,
            ctx,
        })
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Number of failures injected so far.
    pub fn injected(&self) -> u64 {
        self.injected
    }

    /// Adds a resource which machines can fail.
    pub fn add_target(&mut self, resource: Id, machine_ids: Vec<u32>) {
        if !machine_ids.is_empty() {
            self.targets.push(Target { resource, machine_ids });
        }
    }

    /// Whether the machine was failed by this injector and is not repaired yet.
    pub fn is_down(&self, resource: Id, machine_id: u32) -> bool {
        self.down.contains(&(resource, machine_id))
    }

    /// Starts random failure injection.
    pub fn start(&mut self) {
        if let Some(interval) = &self.interval {
            let delay = self.ctx.sample_from_distribution(interval);
            self.ctx.emit_self(InjectFailure {}, delay);
        }
    }

    /// Fails the machines of the resource after `delay`, repairing them `repair_after` seconds later.
    pub fn schedule_failure(&mut self, resource: Id, machine_ids: Vec<u32>, delay: f64, repair_after: Option<f64>) {
        self.ctx.emit_self(
            FailMachines {
                resource,
                machine_ids,
                repair_after,
            },
            delay,
        );
    }

    fn fail(&mut self, resource: Id, machine_ids: Vec<u32>, repair_after: Option<f64>) {
        let machine_ids: Vec<u32> = machine_ids
            .into_iter()
            .filter(|&machine_id| self.down.insert((resource, machine_id)))
            .collect();
        if machine_ids.is_empty() {
            log_debug!(
                self.ctx,
                "machines of {} are already down, failure ignored",
                self.ctx.lookup_name(resource)
            );
            return;
        }
        self.ctx.emit_now(
            MachineFailure {
                machine_ids: machine_ids.clone(),
            },
            resource,
        );
        if let Some(repair_after) = repair_after {
            self.ctx.emit_self(RepairMachines { resource, machine_ids }, repair_after);
        }
    }

    fn repair(&mut self, resource: Id, machine_ids: Vec<u32>) {
        log_debug!(
            self.ctx,
            "repairing machines {:?} of {}",
            machine_ids,
            self.ctx.lookup_name(resource)
        );
        for machine_id in machine_ids.iter() {
            self.down.remove(&(resource, *machine_id));
        }
        self.ctx.emit_now(MachineRecovery { machine_ids }, resource);
    }

    fn inject(&mut self) {
        let (until, max_failed_machines) = match &self.model {
            Some(model) => (model.until, model.max_failed_machines),
            None => return,
        };
        if self.ctx.time() > until || self.targets.is_empty() {
            return;
        }
        let target = self.ctx.gen_range(0..self.targets.len());
        let resource = self.targets[target].resource;
        let mut machine_ids: Vec<u32> = self.targets[target]
            .machine_ids
            .iter()
            .copied()
            .filter(|&machine_id| !self.down.contains(&(resource, machine_id)))
            .collect();
        if !machine_ids.is_empty() {
            let max_failed = max_failed_machines.clamp(1, machine_ids.len() as u32);
            let count = self.ctx.gen_range(1..=max_failed) as usize;
            // partial Fisher-Yates shuffle
            for i in 0..count {
                let j = self.ctx.gen_range(i..machine_ids.len());
                machine_ids.swap(i, j);
            }
            machine_ids.truncate(count);
            machine_ids.sort_unstable();

            if let Some(repair) = &self.repair {
                let repair_after = self.ctx.sample_from_distribution(repair);
                log_info!(
                    self.ctx,
                    "failing machines {:?} of {} for {:.3}s",
                    machine_ids,
                    self.ctx.lookup_name(resource),
                    repair_after
                );
                self.injected += 1;
                self.fail(resource, machine_ids, Some(repair_after));
            }
        }

        if let Some(interval) = &self.interval {
            let delay = self.ctx.sample_from_distribution(interval);
            self.ctx.emit_self(InjectFailure {}, delay);
        }
    }
}

impl EventHandler for FailureInjector {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            InjectFailure {} => {
                self.inject();
            }
            FailMachines {
                resource,
                machine_ids,
                repair_after,
            } => {
                self.fail(resource, machine_ids, repair_after);
            }
            RepairMachines { resource, machine_ids } => {
                self.repair(resource, machine_ids);
            }
        })
    }
}
