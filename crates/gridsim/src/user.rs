//! Grid user: discovers resources, submits its gridlets and collects the results.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use gridsim_core::cast;
use gridsim_core::component::Id;
use gridsim_core::context::SimulationContext;
use gridsim_core::event::{Event, EventData};
use gridsim_core::filter::{DeferredQueue, EventFilter};
use gridsim_core::handler::EventHandler;
use gridsim_core::{log_debug, log_error, log_info, log_warn};

use crate::events::gis::{ResourceList, ResourceListRequest};
use crate::events::gridlet::{
    GridletAction, GridletActionAck, GridletCancel, GridletMove, GridletPause, GridletResume, GridletReturn,
    GridletStatusRequest, GridletSubmit, GridletSubmitAck,
};
use crate::events::reservation::{
    ReservationCancel, ReservationCommit, ReservationCreate, ReservationCreated, ReservationQuery, ReservationReply,
};
use crate::events::resource::{CharacteristicsRequest, DynamicInfoRequest};
use crate::events::user::StartUser;
use crate::filter::TransactionFilter;
use crate::gridlet::{Gridlet, GridletStatus};
use crate::network::NetworkModel;

/// Reservation made by a user before submitting its gridlets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Start of the window, zero means "as soon as possible".
    pub start_time: f64,
    pub duration: f64,
    pub num_pe: u32,
    /// Number of gridlets (taken from the start of the workload) bound to the reservation.
    pub bound_gridlets: Option<usize>,
}

/// Behaviour settings of a user.
#[derive(Clone, Debug, PartialEq)]
pub struct UserOptions {
    /// Bytes per second of the user link.
    pub baud_rate: f64,
    pub reservation: Option<ReservationRequest>,
    /// Submit gridlets lost with failed resources again.
    pub resubmit_failed: bool,
    pub max_resubmissions: u32,
    /// Delay before asking the GIS again when no resource is available for resubmission.
    pub retry_interval: f64,
    /// Ask resources to acknowledge each submitted gridlet.
    pub acknowledge_submissions: bool,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            baud_rate: 0.,
            reservation: None,
            resubmit_failed: false,
            max_resubmissions: 3,
            retry_interval: 60.,
            acknowledge_submissions: false,
        }
    }
}

/// Results collected by a user.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UserSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
    pub resubmitted: usize,
    pub total_cost: f64,
    /// Time when the last gridlet came back.
    pub finish_time: Option<f64>,
}

#[derive(Clone, Serialize)]
struct RetryDiscovery {}

#[derive(Debug, PartialEq)]
enum Stage {
    Idle,
    Discovering { all_tx: u64, reservation_tx: Option<u64> },
    Reserving { tx: u64, resource: Id },
    Committing { tx: u64, resource: Id, reservation_id: u64 },
    Running,
}

/// User entity running a fixed workload of gridlets.
///
/// On start the user asks the GIS for resources. If configured, it then creates and commits a
/// reservation on the first resource supporting advance reservation and binds part of its
/// workload to it. The rest of the gridlets is distributed round-robin over all discovered
/// resources.
///
/// Acknowledgements of submissions and control operations are handled by the user itself.
/// Replies to the `request_*` queries and to reservation operations are kept in a deferred queue
/// until the caller takes them with [`take_reply`](GridUser::take_reply).
pub struct GridUser {
    gis: Id,
    network: NetworkModel,
    options: UserOptions,
    workload: Vec<Gridlet>,
    stage: Stage,
    next_transaction: u64,
    replies: DeferredQueue,
    resources: Vec<Id>,
    /// Resource currently holding each submitted gridlet.
    locations: FxHashMap<u64, Id>,
    /// Destinations of requested moves not acknowledged yet.
    pending_moves: FxHashMap<u64, Id>,
    action_results: FxHashMap<u64, (GridletAction, bool)>,
    submission_acks: FxHashMap<u64, bool>,
    /// Committed reservation and the resource holding it.
    reservation: Option<(Id, u64)>,
    attempts: FxHashMap<u64, u32>,
    awaiting_resubmission: Vec<Gridlet>,
    resubmission_tx: Option<u64>,
    returned: Vec<Gridlet>,
    summary: UserSummary,
    ctx: SimulationContext,
}

impl GridUser {
    pub fn new(gis: Id, network: NetworkModel, options: UserOptions, ctx: SimulationContext) -> Self {
        Self {
            gis,
            network,
            options,
            workload: Vec::new(),
            stage: Stage::Idle,
            next_transaction: 0,
            replies: DeferredQueue::new(),
            resources: Vec::new(),
            locations: FxHashMap::default(),
            pending_moves: FxHashMap::default(),
            action_results: FxHashMap::default(),
            submission_acks: FxHashMap::default(),
            reservation: None,
            attempts: FxHashMap::default(),
            awaiting_resubmission: Vec::new(),
            resubmission_tx: None,
            returned: Vec::new(),
            summary: UserSummary::default(),
            ctx,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Adds a gridlet to the workload, gridlets added after the start are not submitted.
    pub fn add_gridlet(&mut self, length: f64, file_size: u64, output_size: u64, num_pe: u32) -> u64 {
        let id = self.summary.total as u64;
        self.workload
            .push(Gridlet::new(id, self.ctx.id(), length, file_size, output_size).with_num_pe(num_pe));
        self.summary.total += 1;
        id
    }

    /// Schedules the start of the user after `delay`.
    pub fn start(&mut self, delay: f64) {
        self.ctx.emit_self(StartUser {}, delay);
    }

    pub fn resources(&self) -> &[Id] {
        &self.resources
    }

    pub fn returned_gridlets(&self) -> &[Gridlet] {
        &self.returned
    }

    pub fn summary(&self) -> &UserSummary {
        &self.summary
    }

    /// Returns `true` when all gridlets of the workload have come back.
    pub fn is_done(&self) -> bool {
        self.summary.total > 0 && self.returned.len() == self.summary.total
    }

    /// Resource currently holding the gridlet.
    ///
    /// A moved gridlet changes its location once the source resource acknowledges the move.
    pub fn gridlet_location(&self, gridlet_id: u64) -> Option<Id> {
        self.locations.get(&gridlet_id).copied()
    }

    /// Outcome of the last acknowledged control operation on the gridlet.
    pub fn action_result(&self, gridlet_id: u64) -> Option<(GridletAction, bool)> {
        self.action_results.get(&gridlet_id).copied()
    }

    /// Whether the resource accepted the last submission of the gridlet.
    ///
    /// Known only with [`acknowledge_submissions`](UserOptions::acknowledge_submissions) set.
    pub fn submission_accepted(&self, gridlet_id: u64) -> Option<bool> {
        self.submission_acks.get(&gridlet_id).copied()
    }

    /// Committed reservation as `(resource, reservation id)`.
    pub fn reservation(&self) -> Option<(Id, u64)> {
        self.reservation
    }

    fn new_transaction(&mut self) -> u64 {
        let tx = self.next_transaction;
        self.next_transaction += 1;
        tx
    }

    fn control_delay(&self) -> f64 {
        self.network.delay(0, self.options.baud_rate)
    }

    /// Asks the resource holding the gridlet to cancel it after `delay`.
    ///
    /// Returns `false` if the gridlet is not on a resource.
    pub fn cancel_gridlet(&mut self, gridlet_id: u64, delay: f64) -> bool {
        self.send_control(gridlet_id, delay, |gridlet_id, user_id| GridletCancel { gridlet_id, user_id })
    }

    pub fn pause_gridlet(&mut self, gridlet_id: u64, delay: f64) -> bool {
        self.send_control(gridlet_id, delay, |gridlet_id, user_id| GridletPause { gridlet_id, user_id })
    }

    pub fn resume_gridlet(&mut self, gridlet_id: u64, delay: f64) -> bool {
        self.send_control(gridlet_id, delay, |gridlet_id, user_id| GridletResume { gridlet_id, user_id })
    }

    /// Asks the resource holding the gridlet to move it to `dst_resource` after `delay`.
    pub fn move_gridlet(&mut self, gridlet_id: u64, dst_resource: Id, delay: f64) -> bool {
        let sent = self.send_control(gridlet_id, delay, |gridlet_id, user_id| GridletMove {
            gridlet_id,
            user_id,
            dst_resource,
        });
        if sent {
            self.pending_moves.insert(gridlet_id, dst_resource);
        }
        sent
    }

    /// Asks the resource to cancel the committed reservation after `delay`.
    ///
    /// Returns the transaction id of the `ReservationReply`, `None` without a reservation.
    pub fn cancel_reservation(&mut self, delay: f64) -> Option<u64> {
        let (resource, reservation_id) = self.reservation?;
        let transaction = self.new_transaction();
        let delay = delay + self.control_delay();
        self.ctx.emit(
            ReservationCancel {
                transaction,
                reservation_id,
            },
            resource,
            delay,
        );
        Some(transaction)
    }

    /// Requests the status of the committed reservation, returns the transaction id of the reply.
    pub fn request_reservation_status(&mut self) -> Option<u64> {
        let (resource, reservation_id) = self.reservation?;
        let transaction = self.new_transaction();
        self.ctx.emit(
            ReservationQuery {
                transaction,
                reservation_id,
            },
            resource,
            self.control_delay(),
        );
        Some(transaction)
    }

    fn send_control<T, F>(&mut self, gridlet_id: u64, delay: f64, make: F) -> bool
    where
        T: EventData,
        F: FnOnce(u64, Id) -> T,
    {
        match self.locations.get(&gridlet_id).copied() {
            Some(resource) => {
                let delay = delay + self.control_delay();
                self.ctx.emit(make(gridlet_id, self.ctx.id()), resource, delay);
                true
            }
            None => false,
        }
    }

    /// Requests the gridlet status, returns the transaction id of the request.
    pub fn request_gridlet_status(&mut self, gridlet_id: u64) -> Option<u64> {
        let resource = self.locations.get(&gridlet_id).copied()?;
        let transaction = self.new_transaction();
        let request = GridletStatusRequest {
            transaction,
            gridlet_id,
            user_id: self.ctx.id(),
        };
        self.ctx.emit(request, resource, self.control_delay());
        Some(transaction)
    }

    pub fn request_characteristics(&mut self, resource: Id) -> u64 {
        let transaction = self.new_transaction();
        self.ctx
            .emit(CharacteristicsRequest { transaction }, resource, self.control_delay());
        transaction
    }

    pub fn request_dynamic_info(&mut self, resource: Id) -> u64 {
        let transaction = self.new_transaction();
        self.ctx
            .emit(DynamicInfoRequest { transaction }, resource, self.control_delay());
        transaction
    }

    /// Takes the first received reply matching the filter.
    pub fn take_reply<F: EventFilter>(&mut self, filter: &F) -> Option<Event> {
        self.replies.take_first(filter)
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }

    fn request_resources(&mut self, reservation_only: bool) -> u64 {
        let transaction = self.new_transaction();
        self.ctx.emit(
            ResourceListRequest {
                transaction,
                reservation_only,
            },
            self.gis,
            self.control_delay(),
        );
        transaction
    }

    fn on_start(&mut self) {
        log_info!(self.ctx, "started with {} gridlets", self.workload.len());
        let all_tx = self.request_resources(false);
        let reservation_tx = self.options.reservation.is_some().then(|| self.request_resources(true));
        self.stage = Stage::Discovering { all_tx, reservation_tx };
    }

    /// Advances the user protocol with the replies received so far.
    fn process_replies(&mut self) {
        loop {
            let progressed = match self.stage {
                Stage::Discovering { all_tx, reservation_tx } => self.on_discovery(all_tx, reservation_tx),
                Stage::Reserving { tx, resource } => self.on_reservation_created(tx, resource),
                Stage::Committing {
                    tx,
                    resource,
                    reservation_id,
                } => self.on_reservation_committed(tx, resource, reservation_id),
                Stage::Running => self.on_resubmission_list(),
                Stage::Idle => false,
            };
            if !progressed {
                break;
            }
        }
    }

    fn take_resource_list(&mut self, tx: u64) -> Option<Vec<Id>> {
        let event = self.replies.take_first(&TransactionFilter::<ResourceList>::new(tx))?;
        event.data_ref::<ResourceList>().map(|list| list.resources.clone())
    }

    fn on_discovery(&mut self, all_tx: u64, reservation_tx: Option<u64>) -> bool {
        let all_filter = TransactionFilter::<ResourceList>::new(all_tx);
        if self.replies.count(&all_filter) == 0 {
            return false;
        }
        if let Some(tx) = reservation_tx {
            if self.replies.count(&TransactionFilter::<ResourceList>::new(tx)) == 0 {
                return false;
            }
        }
        self.resources = self.take_resource_list(all_tx).unwrap_or_default();
        log_debug!(self.ctx, "discovered {} resources", self.resources.len());
        let reservation_resource = reservation_tx
            .and_then(|tx| self.take_resource_list(tx))
            .and_then(|list| list.first().copied());
        match (self.options.reservation.clone(), reservation_resource) {
            (Some(request), Some(resource)) => {
                let tx = self.new_transaction();
                self.ctx.emit(
                    ReservationCreate {
                        transaction: tx,
                        start_time: request.start_time,
                        duration: request.duration,
                        num_pe: request.num_pe,
                    },
                    resource,
                    self.control_delay(),
                );
                self.stage = Stage::Reserving { tx, resource };
            }
            (Some(_), None) => {
                log_warn!(self.ctx, "no resource supports advance reservation");
                self.submit_workload(None);
            }
            _ => self.submit_workload(None),
        }
        true
    }

    fn on_reservation_created(&mut self, tx: u64, resource: Id) -> bool {
        let event = match self
            .replies
            .take_first(&TransactionFilter::<ReservationCreated>::new(tx))
        {
            Some(event) => event,
            None => return false,
        };
        match event.data_ref::<ReservationCreated>().map(|reply| reply.result.clone()) {
            Some(Ok(reservation_id)) => {
                let tx = self.new_transaction();
                self.ctx.emit(
                    ReservationCommit {
                        transaction: tx,
                        reservation_id,
                    },
                    resource,
                    self.control_delay(),
                );
                self.stage = Stage::Committing {
                    tx,
                    resource,
                    reservation_id,
                };
            }
            Some(Err(e)) => {
                log_warn!(self.ctx, "reservation rejected by {}: {}", self.ctx.lookup_name(resource), e);
                self.submit_workload(None);
            }
            None => self.submit_workload(None),
        }
        true
    }

    fn on_reservation_committed(&mut self, tx: u64, resource: Id, reservation_id: u64) -> bool {
        let event = match self.replies.take_first(&TransactionFilter::<ReservationReply>::new(tx)) {
            Some(event) => event,
            None => return false,
        };
        match event.data_ref::<ReservationReply>().map(|reply| reply.result.clone()) {
            Some(Ok(status)) => {
                log_info!(self.ctx, "reservation {} committed ({:?})", reservation_id, status);
                self.reservation = Some((resource, reservation_id));
                self.submit_workload(Some((resource, reservation_id)));
            }
            Some(Err(e)) => {
                log_warn!(self.ctx, "reservation {} commit failed: {}", reservation_id, e);
                self.submit_workload(None);
            }
            None => self.submit_workload(None),
        }
        true
    }

    /// Submits the workload, binding its head to the reservation if there is one.
    fn submit_workload(&mut self, reservation: Option<(Id, u64)>) {
        self.stage = Stage::Running;
        let workload = std::mem::take(&mut self.workload);
        if self.resources.is_empty() && reservation.is_none() {
            log_warn!(self.ctx, "no resources available, {} gridlets not submitted", workload.len());
            for mut gridlet in workload {
                if let Err(e) = gridlet.set_status(GridletStatus::Failed, self.ctx.time()) {
                    log_error!(self.ctx, "{}", e);
                }
                self.collect(gridlet);
            }
            return;
        }
        let bound = match (&reservation, &self.options.reservation) {
            (Some(_), Some(request)) => request.bound_gridlets.unwrap_or(workload.len()),
            _ => 0,
        };
        let targets = match reservation {
            Some((resource, _)) if self.resources.is_empty() => vec![resource],
            _ => self.resources.clone(),
        };
        let mut next = 0;
        for (i, mut gridlet) in workload.into_iter().enumerate() {
            let resource = match reservation {
                Some((resource, reservation_id)) if i < bound => {
                    gridlet.set_reservation_id(Some(reservation_id));
                    resource
                }
                _ => {
                    let resource = targets[next % targets.len()];
                    next += 1;
                    resource
                }
            };
            self.submit(gridlet, resource);
        }
    }

    fn submit(&mut self, mut gridlet: Gridlet, resource: Id) {
        if let Err(e) = gridlet.set_status(GridletStatus::Ready, self.ctx.time()) {
            log_error!(self.ctx, "{}", e);
        }
        log_debug!(
            self.ctx,
            "submitting gridlet {} to {}",
            gridlet.id(),
            self.ctx.lookup_name(resource)
        );
        self.locations.insert(gridlet.id(), resource);
        let delay = self.network.delay(gridlet.file_size(), self.options.baud_rate);
        let ack = self.options.acknowledge_submissions;
        self.ctx.emit(GridletSubmit { gridlet, ack }, resource, delay);
    }

    fn on_action_ack(&mut self, gridlet_id: u64, action: GridletAction, success: bool, src: Id) {
        if action == GridletAction::Move {
            if let Some(dst) = self.pending_moves.remove(&gridlet_id) {
                // a gridlet already returned has no location to update
                if success && self.locations.contains_key(&gridlet_id) {
                    self.locations.insert(gridlet_id, dst);
                }
            }
        }
        if !success {
            log_warn!(
                self.ctx,
                "{:?} of gridlet {} refused by {}",
                action,
                gridlet_id,
                self.ctx.lookup_name(src)
            );
        }
        self.action_results.insert(gridlet_id, (action, success));
    }

    fn on_gridlet_return(&mut self, gridlet: Gridlet, src: Id) {
        let gridlet_id = gridlet.id();
        let attempts = self.attempts.get(&gridlet_id).copied().unwrap_or(0);
        if gridlet.status() == GridletStatus::FailedResourceUnavailable
            && self.options.resubmit_failed
            && attempts < self.options.max_resubmissions
        {
            log_info!(
                self.ctx,
                "gridlet {} lost with {}, resubmitting",
                gridlet_id,
                self.ctx.lookup_name(src)
            );
            self.attempts.insert(gridlet_id, attempts + 1);
            self.awaiting_resubmission.push(gridlet);
            if self.resubmission_tx.is_none() {
                self.resubmission_tx = Some(self.request_resources(false));
            }
            return;
        }
        self.collect(gridlet);
    }

    fn on_resubmission_list(&mut self) -> bool {
        let tx = match self.resubmission_tx {
            Some(tx) => tx,
            None => return false,
        };
        let resources = match self.take_resource_list(tx) {
            Some(resources) => resources,
            None => return false,
        };
        self.resubmission_tx = None;
        if resources.is_empty() {
            log_warn!(self.ctx, "no resources for resubmission, retrying later");
            self.ctx.emit_self(RetryDiscovery {}, self.options.retry_interval);
            return true;
        }
        self.resources = resources;
        for (i, mut gridlet) in std::mem::take(&mut self.awaiting_resubmission).into_iter().enumerate() {
            let previous = gridlet.resource_id();
            // prefer a resource other than the one that failed
            let candidates: Vec<Id> = self
                .resources
                .iter()
                .copied()
                .filter(|r| Some(*r) != previous)
                .collect();
            let pool = if candidates.is_empty() { self.resources.clone() } else { candidates };
            let resource = pool[i % pool.len()];
            if gridlet.reset_for_resubmission().is_ok() {
                gridlet.set_reservation_id(None);
                self.summary.resubmitted += 1;
                self.submit(gridlet, resource);
            } else {
                self.collect(gridlet);
            }
        }
        true
    }

    fn collect(&mut self, gridlet: Gridlet) {
        match gridlet.status() {
            GridletStatus::Success => self.summary.completed += 1,
            GridletStatus::Canceled => self.summary.canceled += 1,
            _ => self.summary.failed += 1,
        }
        self.summary.total_cost += gridlet.processing_cost();
        self.locations.remove(&gridlet.id());
        self.returned.push(gridlet);
        if self.is_done() {
            self.summary.finish_time = Some(self.ctx.time());
            log_info!(
                self.ctx,
                "all {} gridlets returned: {} completed, {} failed, {} canceled, cost {:.2}",
                self.summary.total,
                self.summary.completed,
                self.summary.failed,
                self.summary.canceled,
                self.summary.total_cost
            );
        }
    }
}

impl EventHandler for GridUser {
    fn on(&mut self, event: Event) {
        if event.is::<StartUser>() {
            self.on_start();
        } else if event.is::<RetryDiscovery>() {
            if self.resubmission_tx.is_none() && !self.awaiting_resubmission.is_empty() {
                self.resubmission_tx = Some(self.request_resources(false));
            }
        } else if event.is::<GridletReturn>() || event.is::<GridletActionAck>() || event.is::<GridletSubmitAck>() {
            let src = event.src;
            cast!(match event.data {
                GridletReturn { gridlet } => {
                    self.on_gridlet_return(gridlet, src);
                }
                GridletActionAck {
                    gridlet_id,
                    action,
                    success,
                    ..
                } => {
                    self.on_action_ack(gridlet_id, action, success, src);
                }
                GridletSubmitAck {
                    gridlet_id, accepted, ..
                } => {
                    if !accepted {
                        log_warn!(self.ctx, "gridlet {} rejected by {}", gridlet_id, self.ctx.lookup_name(src));
                    }
                    self.submission_acks.insert(gridlet_id, accepted);
                }
            })
        } else {
            self.replies.push(event);
        }
        self.process_replies();
    }
}
