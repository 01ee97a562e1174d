//! Facade for building and running grid simulations.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use sugars::{rc, refcell};

use gridsim_core::component::Id;
use gridsim_core::simulation::Simulation;

use crate::calendar::ResourceCalendar;
use crate::characteristics::ResourceCharacteristics;
use crate::config::{instance_names, ResourceConfig, SimulationConfig, UserConfig};
use crate::error::ConfigError;
use crate::failure::FailureInjector;
use crate::gis::GridInformationService;
use crate::machine::MachineList;
use crate::network::NetworkModel;
use crate::policy::AllocPolicy;
use crate::resource::{make_policy, GridResource};
use crate::user::{GridUser, UserOptions, UserSummary};

/// Grid simulation with a GIS, resources, users and a failure injector.
pub struct GridSimulation {
    gis: Rc<RefCell<GridInformationService>>,
    gis_id: Id,
    failures: Rc<RefCell<FailureInjector>>,
    resources: IndexMap<Id, Rc<RefCell<GridResource>>>,
    users: IndexMap<Id, Rc<RefCell<GridUser>>>,
    network: NetworkModel,
    config: SimulationConfig,
    sim: Simulation,
}

impl GridSimulation {
    /// Creates a simulation with the GIS and the failure injector described by the config.
    ///
    /// Resources and users from the config are not created, see [`from_config`](Self::from_config).
    pub fn new(mut sim: Simulation, config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let network = NetworkModel::new(config.network_latency);
        let gis = rc!(refcell!(GridInformationService::new(
            network.latency,
            sim.create_context("gis")
        )));
        let gis_id = sim.add_handler("gis", gis.clone());
        let failures_ctx = sim.create_context("failures");
        let failures = match config.failures.clone() {
            Some(model) => FailureInjector::with_model(model, failures_ctx)?,
            None => FailureInjector::new(failures_ctx),
        };
        let failures = rc!(refcell!(failures));
        sim.add_handler("failures", failures.clone());
        Ok(Self {
            gis,
            gis_id,
            failures,
            resources: IndexMap::new(),
            users: IndexMap::new(),
            network,
            config,
            sim,
        })
    }

    /// Builds the whole simulation described by the config.
    pub fn from_config(config: SimulationConfig) -> Result<Self, ConfigError> {
        let sim = Simulation::new(config.seed);
        let mut grid = Self::new(sim, config.clone())?;
        let mut resource_ids = IndexMap::new();
        for resource in config.resources.iter() {
            for name in instance_names(&resource.name, &resource.name_prefix, resource.count)? {
                let id = grid.add_resource_from_config(&name, resource);
                resource_ids.insert(name, id);
            }
        }
        for user in config.users.iter() {
            for name in instance_names(&user.name, &user.name_prefix, user.count)? {
                grid.add_user_from_config(&name, user);
            }
        }
        for failure in config.scheduled_failures.iter() {
            let resource = *resource_ids
                .get(&failure.resource)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown resource {}", failure.resource)))?;
            grid.schedule_failure(resource, failure.machines.clone(), failure.time, failure.repair_after);
        }
        grid.failures.borrow_mut().start();
        Ok(grid)
    }

    fn add_resource_from_config(&mut self, name: &str, config: &ResourceConfig) -> Id {
        let time_zone = config.time_zone.unwrap_or(0.);
        let characteristics = ResourceCharacteristics::new(
            config.architecture.as_deref().unwrap_or("x86"),
            config.os.as_deref().unwrap_or("Linux"),
            MachineList::homogeneous(config.machines, config.pes_per_machine, config.mips),
            config.policy,
            time_zone,
            config.cost_per_sec.unwrap_or(1.),
        );
        let mut calendar = ResourceCalendar::new(
            time_zone,
            config.peak_load.unwrap_or(0.),
            config.off_peak_load.unwrap_or(0.),
            config.holiday_load.unwrap_or(0.),
        );
        if let Some(weekends) = &config.weekends {
            calendar = calendar.with_weekends(weekends.clone());
        }
        if let Some(holidays) = &config.holidays {
            calendar = calendar.with_holidays(holidays.clone());
        }
        self.add_resource(name, characteristics, calendar, config.baud_rate.unwrap_or(0.))
    }

    fn add_user_from_config(&mut self, name: &str, config: &UserConfig) -> Id {
        let options = UserOptions {
            baud_rate: config.baud_rate.unwrap_or(0.),
            reservation: config.reservation.clone(),
            resubmit_failed: config.resubmit_failed.unwrap_or(false),
            max_resubmissions: config.max_resubmissions.unwrap_or(3),
            retry_interval: config.retry_interval.unwrap_or(60.),
            acknowledge_submissions: config.acknowledge_submissions.unwrap_or(false),
        };
        let id = self.add_user(name, options);
        let deviation = config.length_deviation.unwrap_or(0.).clamp(0., 1.);
        for _ in 0..config.gridlets {
            let length = if deviation > 0. {
                config.length * self.sim.gen_range(1. - deviation..=1. + deviation)
            } else {
                config.length
            };
            self.users[&id].borrow_mut().add_gridlet(
                length,
                config.file_size.unwrap_or(0),
                config.output_size.unwrap_or(0),
                config.num_pe.unwrap_or(1),
            );
        }
        self.start_user(id, config.start_time.unwrap_or(0.));
        id
    }

    /// Adds a resource using the policy declared in its characteristics.
    pub fn add_resource(
        &mut self,
        name: &str,
        characteristics: ResourceCharacteristics,
        calendar: ResourceCalendar,
        baud_rate: f64,
    ) -> Id {
        let policy = make_policy(characteristics.policy, self.config.reservation_expiry);
        self.add_resource_with_policy(name, characteristics, calendar, policy, baud_rate)
    }

    /// Adds a resource with a custom allocation policy and registers it with the GIS.
    pub fn add_resource_with_policy(
        &mut self,
        name: &str,
        characteristics: ResourceCharacteristics,
        calendar: ResourceCalendar,
        policy: Box<dyn AllocPolicy>,
        baud_rate: f64,
    ) -> Id {
        let machine_ids: Vec<u32> = characteristics.machines.machines().iter().map(|m| m.id()).collect();
        let resource = rc!(refcell!(GridResource::new(
            characteristics,
            calendar,
            policy,
            baud_rate,
            self.network,
            self.sim.create_context(name),
        )));
        let id = self.sim.add_handler(name, resource.clone());
        resource.borrow_mut().register(self.gis_id);
        self.failures.borrow_mut().add_target(id, machine_ids);
        self.resources.insert(id, resource);
        id
    }

    /// Adds a user without gridlets, gridlets are added through [`user`](Self::user).
    pub fn add_user(&mut self, name: &str, options: UserOptions) -> Id {
        let user = rc!(refcell!(GridUser::new(
            self.gis_id,
            self.network,
            options,
            self.sim.create_context(name)
        )));
        let id = self.sim.add_handler(name, user.clone());
        self.users.insert(id, user);
        id
    }

    /// Starts the user after `delay` seconds.
    pub fn start_user(&mut self, id: Id, delay: f64) {
        if let Some(user) = self.users.get(&id) {
            user.borrow_mut().start(delay);
        }
    }

    /// Fails the machines of the resource after `delay`, optionally recovering them later.
    pub fn schedule_failure(&mut self, resource: Id, machine_ids: Vec<u32>, delay: f64, repair_after: Option<f64>) {
        self.failures
            .borrow_mut()
            .schedule_failure(resource, machine_ids, delay, repair_after);
    }

    pub fn gis(&self) -> Rc<RefCell<GridInformationService>> {
        self.gis.clone()
    }

    pub fn gis_id(&self) -> Id {
        self.gis_id
    }

    pub fn failures(&self) -> Rc<RefCell<FailureInjector>> {
        self.failures.clone()
    }

    pub fn resource(&self, id: Id) -> Option<Rc<RefCell<GridResource>>> {
        self.resources.get(&id).cloned()
    }

    pub fn resource_ids(&self) -> Vec<Id> {
        self.resources.keys().copied().collect()
    }

    pub fn user(&self, id: Id) -> Option<Rc<RefCell<GridUser>>> {
        self.users.get(&id).cloned()
    }

    pub fn user_ids(&self) -> Vec<Id> {
        self.users.keys().copied().collect()
    }

    pub fn lookup_id(&self, name: &str) -> Id {
        self.sim.lookup_id(name)
    }

    pub fn lookup_name(&self, id: Id) -> String {
        self.sim.lookup_name(id)
    }

    /// Returns `true` when every user got all its gridlets back.
    pub fn all_users_done(&self) -> bool {
        self.users.values().all(|user| user.borrow().is_done())
    }

    /// Returns user summaries by user name.
    pub fn user_summaries(&self) -> Vec<(String, UserSummary)> {
        self.users
            .iter()
            .map(|(id, user)| (self.sim.lookup_name(*id), user.borrow().summary().clone()))
            .collect()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn current_time(&self) -> f64 {
        self.sim.time()
    }

    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    pub fn step(&mut self) -> bool {
        self.sim.step()
    }

    pub fn steps(&mut self, step_count: u64) -> bool {
        self.sim.steps(step_count)
    }

    pub fn step_until_no_events(&mut self) {
        self.sim.step_until_no_events()
    }

    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        self.sim.step_for_duration(duration)
    }

    pub fn step_until_time(&mut self, time: f64) -> bool {
        self.sim.step_until_time(time)
    }

    pub fn sim(&mut self) -> &mut Simulation {
        &mut self.sim
    }
}
