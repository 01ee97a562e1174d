//! Grid resource: machines, allocation policy and the protocol spoken with users and the GIS.

use serde::Serialize;

use gridsim_core::cast;
use gridsim_core::component::Id;
use gridsim_core::context::SimulationContext;
use gridsim_core::event::{Event, EventId};
use gridsim_core::handler::EventHandler;
use gridsim_core::{log_debug, log_error, log_info, log_warn};

use crate::calendar::ResourceCalendar;
use crate::characteristics::{AllocPolicyKind, ResourceCharacteristics};
use crate::error::ReservationError;
use crate::events::gis::{DeregisterResource, RegisterResource};
use crate::events::gridlet::{
    GridletAction, GridletActionAck, GridletCancel, GridletMove, GridletPause, GridletResume, GridletReturn,
    GridletStatusReply, GridletStatusRequest, GridletSubmit, GridletSubmitAck,
};
use crate::events::reservation::{
    ReservationCancel, ReservationCommit, ReservationCreate, ReservationCreated, ReservationQuery, ReservationReply,
};
use crate::events::resource::{
    CharacteristicsReply, CharacteristicsRequest, DynamicInfoReply, DynamicInfoRequest, MachineFailure,
    MachineRecovery,
};
use crate::gridlet::{Gridlet, GridletStatus};
use crate::network::NetworkModel;
use crate::policy::{AllocPolicy, AdvanceReservation, PolicyEnv, ReservationPolicy, SpaceShared, TimeShared};
use crate::reservation::ReservationStatus;

// INTERNAL EVENTS /////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Serialize)]
struct PolicyTick {}

#[derive(Clone, Serialize)]
struct ReservationStart {
    id: u64,
}

#[derive(Clone, Serialize)]
struct ReservationEnd {
    id: u64,
}

#[derive(Clone, Serialize)]
struct ReservationExpire {
    id: u64,
}

// STATS ///////////////////////////////////////////////////////////////////////////////////////////

/// Accumulated resource statistics.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ResourceStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub canceled: u64,
    pub moved: u64,
    /// Integral of the number of busy PEs over time (PE-seconds).
    pub busy_pe_time: f64,
    /// Total cost charged for successfully completed gridlets.
    pub revenue: f64,
}

// RESOURCE ////////////////////////////////////////////////////////////////////////////////////////

/// Creates the policy matching the kind declared in resource characteristics.
pub fn make_policy(kind: AllocPolicyKind, reservation_expiry: f64) -> Box<dyn AllocPolicy> {
    match kind {
        AllocPolicyKind::SpaceShared => Box::new(SpaceShared::new()),
        AllocPolicyKind::TimeShared => Box::new(TimeShared::new()),
        AllocPolicyKind::AdvanceReservation => Box::new(AdvanceReservation::new(reservation_expiry)),
    }
}

/// Grid resource composed of machines, processing gridlets with its allocation policy.
///
/// Gridlets reaching a terminal state are sent back to their owners after the output transfer
/// delay. The resource registers itself with the GIS, deregisters when all its machines have
/// failed and registers again once a machine is recovered.
pub struct GridResource {
    characteristics: ResourceCharacteristics,
    calendar: ResourceCalendar,
    policy: Box<dyn AllocPolicy>,
    baud_rate: f64,
    network: NetworkModel,
    gis: Option<Id>,
    registered: bool,
    tick: Option<EventId>,
    last_stats_update: f64,
    stats: ResourceStats,
    ctx: SimulationContext,
}

impl GridResource {
    pub fn new(
        mut characteristics: ResourceCharacteristics,
        calendar: ResourceCalendar,
        policy: Box<dyn AllocPolicy>,
        baud_rate: f64,
        network: NetworkModel,
        ctx: SimulationContext,
    ) -> Self {
        characteristics.resource_id = Some(ctx.id());
        Self {
            characteristics,
            calendar,
            policy,
            baud_rate,
            network,
            gis: None,
            registered: false,
            tick: None,
            last_stats_update: 0.,
            stats: ResourceStats::default(),
            ctx,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn characteristics(&self) -> &ResourceCharacteristics {
        &self.characteristics
    }

    pub fn calendar(&self) -> &ResourceCalendar {
        &self.calendar
    }

    pub fn baud_rate(&self) -> f64 {
        self.baud_rate
    }

    pub fn stats(&self) -> &ResourceStats {
        &self.stats
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn queue_len(&self) -> usize {
        self.policy.queue_len()
    }

    pub fn running_len(&self) -> usize {
        self.policy.running_len()
    }

    pub fn gridlet_status(&self, gridlet_id: u64, user_id: Id) -> Option<GridletStatus> {
        self.policy.status(gridlet_id, user_id)
    }

    /// Registers the resource with the GIS.
    pub fn register(&mut self, gis: Id) {
        self.gis = Some(gis);
        self.send_registration();
    }

    fn send_registration(&mut self) {
        if let Some(gis) = self.gis {
            self.ctx.emit_now(
                RegisterResource {
                    resource_id: self.ctx.id(),
                    num_pe: self.characteristics.num_pe(),
                    supports_reservation: self.characteristics.supports_reservation(),
                },
                gis,
            );
            self.registered = true;
        }
    }

    fn send_deregistration(&mut self) {
        if let Some(gis) = self.gis {
            self.ctx.emit_now(
                DeregisterResource {
                    resource_id: self.ctx.id(),
                },
                gis,
            );
            self.registered = false;
        }
    }

    fn reply_delay(&self) -> f64 {
        self.network.delay(0, self.baud_rate)
    }

    /// Calls the policy with the current machine state and background load.
    fn with_policy<R>(&mut self, f: impl FnOnce(&mut dyn AllocPolicy, &mut PolicyEnv) -> R) -> R {
        let time = self.ctx.time();
        let load = self.calendar.current_load(time);
        let mut env = PolicyEnv::new(time, load, &mut self.characteristics.machines);
        f(self.policy.as_mut(), &mut env)
    }

    fn with_reservations<R>(
        &mut self,
        f: impl FnOnce(&mut dyn ReservationPolicy, &mut PolicyEnv) -> Result<R, ReservationError>,
    ) -> Result<R, ReservationError> {
        self.with_policy(|policy, env| match policy.as_reservation() {
            Some(reservations) => f(reservations, env),
            None => Err(ReservationError::NotSupported),
        })
    }

    /// Brings the policy state up to the current time, returning finished gridlets.
    fn update(&mut self) {
        let time = self.ctx.time();
        self.stats.busy_pe_time += self.characteristics.num_busy_pe() as f64 * (time - self.last_stats_update);
        self.last_stats_update = time;
        let finished = self.with_policy(|policy, env| policy.update(env));
        self.return_gridlets(finished);
    }

    /// Schedules the wake-up at the next gridlet completion, replacing the previous one.
    fn schedule_tick(&mut self) {
        if let Some(tick) = self.tick.take() {
            self.ctx.cancel_event(tick);
        }
        if let Some(completion) = self.policy.next_completion() {
            let delay = (completion - self.ctx.time()).max(0.);
            self.tick = Some(self.ctx.emit_self(PolicyTick {}, delay));
        }
    }

    fn return_gridlets(&mut self, gridlets: Vec<Gridlet>) {
        for gridlet in gridlets {
            self.return_gridlet(gridlet);
        }
    }

    fn return_gridlet(&mut self, gridlet: Gridlet) {
        match gridlet.status() {
            GridletStatus::Success => {
                self.stats.completed += 1;
                if let Some(record) = gridlet.current_record() {
                    self.stats.revenue += record.actual_cpu_time * record.cost_per_sec;
                }
            }
            GridletStatus::Canceled => self.stats.canceled += 1,
            _ => self.stats.failed += 1,
        }
        log_debug!(
            self.ctx,
            "gridlet {} of {} returned with status {:?}",
            gridlet.id(),
            self.ctx.lookup_name(gridlet.user_id()),
            gridlet.status()
        );
        let owner = gridlet.user_id();
        let delay = self.network.delay(gridlet.output_size(), self.baud_rate);
        self.ctx.emit(GridletReturn { gridlet }, owner, delay);
    }

    fn submit(&mut self, mut gridlet: Gridlet, ack: bool, src: Id) {
        let time = self.ctx.time();
        let (gridlet_id, user_id) = (gridlet.id(), gridlet.user_id());
        self.stats.submitted += 1;
        gridlet.set_resource_parameter(self.ctx.id(), self.ctx.name(), self.characteristics.cost_per_sec, time);
        let rejected = if self.characteristics.num_working_pe() == 0 {
            if let Err(e) = gridlet.set_status(GridletStatus::FailedResourceUnavailable, time) {
                log_error!(self.ctx, "{}", e);
            }
            vec![gridlet]
        } else {
            log_debug!(self.ctx, "gridlet {} of {} arrived", gridlet_id, self.ctx.lookup_name(user_id));
            self.with_policy(|policy, env| policy.submit(gridlet, env))
        };
        let accepted = !rejected.iter().any(|g| g.id() == gridlet_id && g.user_id() == user_id);
        self.return_gridlets(rejected);
        if ack {
            self.ctx.emit(
                GridletSubmitAck {
                    gridlet_id,
                    user_id,
                    accepted,
                },
                src,
                self.reply_delay(),
            );
        }
    }

    fn ack_action(&mut self, gridlet_id: u64, user_id: Id, action: GridletAction, success: bool, dst: Id) {
        self.ctx.emit(
            GridletActionAck {
                gridlet_id,
                user_id,
                action,
                success,
            },
            dst,
            self.reply_delay(),
        );
    }

    fn move_gridlet(&mut self, gridlet_id: u64, user_id: Id, dst_resource: Id, src: Id) {
        let taken = self.with_policy(|policy, env| policy.take(gridlet_id, user_id, env));
        let success = match taken {
            Some(gridlet) => {
                self.stats.moved += 1;
                log_debug!(
                    self.ctx,
                    "gridlet {} of {} moved to {}",
                    gridlet_id,
                    self.ctx.lookup_name(user_id),
                    self.ctx.lookup_name(dst_resource)
                );
                let delay = self.network.delay(gridlet.file_size(), self.baud_rate);
                self.ctx.emit(GridletSubmit { gridlet, ack: false }, dst_resource, delay);
                true
            }
            None => false,
        };
        self.ack_action(gridlet_id, user_id, GridletAction::Move, success, src);
    }

    fn create_reservation(&mut self, transaction: u64, start_time: f64, duration: f64, num_pe: u32, src: Id) {
        let result = self.with_reservations(|reservations, env| {
            reservations.create(src, start_time, duration, num_pe, env)
        });
        let reply = match result {
            Ok(reservation) => {
                let now = self.ctx.time();
                log_info!(
                    self.ctx,
                    "reservation {} of {} PEs for [{:.3}, {:.3}) created",
                    reservation.id,
                    reservation.num_pe,
                    reservation.start_time,
                    reservation.end_time()
                );
                let id = reservation.id;
                self.ctx.emit_self(ReservationStart { id }, (reservation.start_time - now).max(0.));
                self.ctx.emit_self(ReservationEnd { id }, reservation.end_time() - now);
                self.ctx.emit_self(ReservationExpire { id }, reservation.expiry_time - now);
                ReservationCreated {
                    transaction,
                    result: Ok(id),
                    expiry_time: Some(reservation.expiry_time),
                }
            }
            Err(e) => {
                log_debug!(self.ctx, "reservation request from {} rejected: {}", self.ctx.lookup_name(src), e);
                ReservationCreated {
                    transaction,
                    result: Err(e),
                    expiry_time: None,
                }
            }
        };
        self.ctx.emit(reply, src, self.reply_delay());
    }

    fn reply_reservation(
        &mut self,
        transaction: u64,
        reservation_id: u64,
        result: Result<ReservationStatus, ReservationError>,
        dst: Id,
    ) {
        self.ctx.emit(
            ReservationReply {
                transaction,
                reservation_id,
                result,
            },
            dst,
            self.reply_delay(),
        );
    }

    fn fail_machines(&mut self, machine_ids: Vec<u32>) {
        let failed: Vec<u32> = machine_ids
            .into_iter()
            .filter(|id| self.characteristics.machines.fail_machine(*id))
            .collect();
        if failed.is_empty() {
            return;
        }
        log_warn!(self.ctx, "machines {:?} failed", failed);
        let lost = self.with_policy(|policy, env| policy.machines_failed(&failed, env));
        self.return_gridlets(lost);
        if self.characteristics.num_working_pe() == 0 && self.registered {
            log_warn!(self.ctx, "all machines failed");
            self.send_deregistration();
        }
    }

    fn recover_machines(&mut self, machine_ids: Vec<u32>) {
        let recovered: Vec<u32> = machine_ids
            .into_iter()
            .filter(|id| self.characteristics.machines.recover_machine(*id))
            .collect();
        if recovered.is_empty() {
            return;
        }
        log_info!(self.ctx, "machines {:?} recovered", recovered);
        let finished = self.with_policy(|policy, env| policy.machines_recovered(env));
        self.return_gridlets(finished);
        if !self.registered {
            self.send_registration();
        }
    }
}

impl EventHandler for GridResource {
    fn on(&mut self, event: Event) {
        self.update();
        let src = event.src;
        cast!(match event.data {
            PolicyTick {} => {
                self.tick = None;
            }
            GridletSubmit { gridlet, ack } => {
                self.submit(gridlet, ack, src);
            }
            GridletCancel { gridlet_id, user_id } => {
                match self.with_policy(|policy, env| policy.cancel(gridlet_id, user_id, env)) {
                    Some(gridlet) => self.return_gridlet(gridlet),
                    None => self.ack_action(gridlet_id, user_id, GridletAction::Cancel, false, src),
                }
            }
            GridletPause { gridlet_id, user_id } => {
                let success = self.with_policy(|policy, env| policy.pause(gridlet_id, user_id, env));
                self.ack_action(gridlet_id, user_id, GridletAction::Pause, success, src);
            }
            GridletResume { gridlet_id, user_id } => {
                let success = self.with_policy(|policy, env| policy.resume(gridlet_id, user_id, env));
                self.ack_action(gridlet_id, user_id, GridletAction::Resume, success, src);
            }
            GridletMove {
                gridlet_id,
                user_id,
                dst_resource,
            } => {
                self.move_gridlet(gridlet_id, user_id, dst_resource, src);
            }
            GridletStatusRequest {
                transaction,
                gridlet_id,
                user_id,
            } => {
                let status = self.policy.status(gridlet_id, user_id);
                self.ctx.emit(
                    GridletStatusReply {
                        transaction,
                        gridlet_id,
                        user_id,
                        status,
                    },
                    src,
                    self.reply_delay(),
                );
            }
            CharacteristicsRequest { transaction } => {
                self.ctx.emit(
                    CharacteristicsReply {
                        transaction,
                        resource_id: self.ctx.id(),
                        characteristics: self.characteristics.clone(),
                    },
                    src,
                    self.reply_delay(),
                );
            }
            DynamicInfoRequest { transaction } => {
                self.ctx.emit(
                    DynamicInfoReply {
                        transaction,
                        resource_id: self.ctx.id(),
                        free_pe: self.characteristics.num_free_pe(),
                        queued: self.policy.queue_len(),
                        running: self.policy.running_len(),
                        load: self.calendar.current_load(self.ctx.time()),
                    },
                    src,
                    self.reply_delay(),
                );
            }
            ReservationCreate {
                transaction,
                start_time,
                duration,
                num_pe,
            } => {
                self.create_reservation(transaction, start_time, duration, num_pe, src);
            }
            ReservationCommit {
                transaction,
                reservation_id,
            } => {
                let result = self.with_reservations(|reservations, env| reservations.commit(reservation_id, src, env));
                self.reply_reservation(transaction, reservation_id, result, src);
            }
            ReservationCancel {
                transaction,
                reservation_id,
            } => {
                let result = self.with_reservations(|reservations, env| reservations.cancel(reservation_id, src, env));
                let result = result.map(|gridlets| {
                    self.return_gridlets(gridlets);
                    ReservationStatus::Canceled
                });
                self.reply_reservation(transaction, reservation_id, result, src);
            }
            ReservationQuery {
                transaction,
                reservation_id,
            } => {
                let result = self.with_reservations(|reservations, _| reservations.query(reservation_id, src));
                self.reply_reservation(transaction, reservation_id, result, src);
            }
            ReservationStart { id } => {
                let gridlets = self
                    .with_reservations(|reservations, env| Ok(reservations.on_start(id, env)))
                    .unwrap_or_default();
                self.return_gridlets(gridlets);
            }
            ReservationEnd { id } => {
                let gridlets = self
                    .with_reservations(|reservations, env| Ok(reservations.on_end(id, env)))
                    .unwrap_or_default();
                self.return_gridlets(gridlets);
            }
            ReservationExpire { id } => {
                let gridlets = self
                    .with_reservations(|reservations, env| Ok(reservations.on_expire(id, env)))
                    .unwrap_or_default();
                self.return_gridlets(gridlets);
            }
            MachineFailure { machine_ids } => {
                self.fail_machines(machine_ids);
            }
            MachineRecovery { machine_ids } => {
                self.recover_machines(machine_ids);
            }
        });
        self.schedule_tick();
    }
}
