use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_abs_diff_eq;

use gridsim_core::context::SimulationContext;
use gridsim_core::event::Event;
use gridsim_core::handler::EventHandler;
use gridsim_core::simulation::Simulation;

use gridsim::calendar::ResourceCalendar;
use gridsim::characteristics::{AllocPolicyKind, ResourceCharacteristics};
use gridsim::config::SimulationConfig;
use gridsim::error::ReservationError;
use gridsim::events::gridlet::GridletAction;
use gridsim::events::reservation::{
    ReservationCommit, ReservationCreate, ReservationCreated, ReservationQuery, ReservationReply,
};
use gridsim::filter::TransactionFilter;
use gridsim::gridlet::GridletStatus;
use gridsim::machine::MachineList;
use gridsim::reservation::ReservationStatus;
use gridsim::simulation::GridSimulation;
use gridsim::user::{ReservationRequest, UserOptions};

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn grid() -> GridSimulation {
    let config = SimulationConfig::from_file(&name_wrapper("config.yaml")).unwrap();
    GridSimulation::new(Simulation::new(config.seed), config).unwrap()
}

fn add_resource(grid: &mut GridSimulation, name: &str, policy: AllocPolicyKind, pes: u32) -> u32 {
    grid.add_resource(
        name,
        ResourceCharacteristics::new("x86", "Linux", MachineList::homogeneous(1, pes, 100.), policy, 0., 1.),
        ResourceCalendar::idle(0.),
        0.,
    )
}

fn add_user(
    grid: &mut GridSimulation,
    name: &str,
    reservation: Option<ReservationRequest>,
    gridlets: &[f64],
) -> u32 {
    let options = UserOptions {
        reservation,
        ..UserOptions::default()
    };
    let user_id = grid.add_user(name, options);
    let user = grid.user(user_id).unwrap();
    for length in gridlets {
        user.borrow_mut().add_gridlet(*length, 0, 0, 1);
    }
    grid.start_user(user_id, 0.);
    user_id
}

fn reservation(start_time: f64, duration: f64, num_pe: u32) -> Option<ReservationRequest> {
    Some(ReservationRequest {
        start_time,
        duration,
        num_pe,
        bound_gridlets: None,
    })
}

#[test]
// Immediate reservation is activated on commit and its gridlets run on the reserved PEs.
fn test_immediate_reservation() {
    let mut grid = grid();
    let r = add_resource(&mut grid, "r", AllocPolicyKind::AdvanceReservation, 2);
    let u = add_user(&mut grid, "u", reservation(0., 100., 2), &[1000., 1000.]);
    grid.step_until_no_events();

    let user = grid.user(u).unwrap();
    let user = user.borrow();
    assert_eq!(user.summary().completed, 2);
    assert_eq!(user.summary().finish_time, Some(10.));
    assert!(user.returned_gridlets().iter().all(|g| g.reservation_id() == Some(0)));
    // reservation has ended and released its PEs
    assert_eq!(grid.current_time(), 100.);
    let resource = grid.resource(r).unwrap();
    assert_eq!(resource.borrow().characteristics().num_free_pe(), 2);
}

#[test]
// At its start the reservation takes a PE from a running best-effort gridlet,
// which goes back to the queue and continues later from where it stopped.
fn test_reservation_preempts_best_effort() {
    let mut grid = grid();
    add_resource(&mut grid, "r", AllocPolicyKind::AdvanceReservation, 2);
    let be = add_user(&mut grid, "best_effort", None, &[1000., 1000.]);
    let ar = add_user(&mut grid, "reserved", reservation(5., 20., 1), &[500.]);
    grid.step_until_no_events();

    let ar_user = grid.user(ar).unwrap();
    assert_eq!(ar_user.borrow().summary().completed, 1);
    assert_eq!(ar_user.borrow().summary().finish_time, Some(10.));
    let ar_user_ref = ar_user.borrow();
    let gridlet = &ar_user_ref.returned_gridlets()[0];
    assert_eq!(gridlet.exec_start_time(), Some(5.));

    let be_user = grid.user(be).unwrap();
    let be_user = be_user.borrow();
    assert_eq!(be_user.summary().completed, 2);
    assert_eq!(be_user.summary().finish_time, Some(15.));
    let preempted = &be_user.returned_gridlets()[1];
    assert_eq!(preempted.id(), 1);
    assert_eq!(preempted.exec_start_time(), Some(0.));
    assert_abs_diff_eq!(preempted.actual_cpu_time(), 10., epsilon = 1e-9);
}

#[test]
// The second request overlaps the first one and is rejected, its gridlet waits as best effort
// until the reserved PEs are released.
fn test_rejected_reservation_falls_back_to_best_effort() {
    let mut grid = grid();
    add_resource(&mut grid, "r", AllocPolicyKind::AdvanceReservation, 2);
    let u1 = add_user(&mut grid, "u1", reservation(0., 30., 2), &[1000.]);
    let u2 = add_user(&mut grid, "u2", reservation(0., 30., 2), &[1000.]);
    grid.step_until_no_events();

    let u1 = grid.user(u1).unwrap();
    assert_eq!(u1.borrow().summary().finish_time, Some(10.));
    assert_eq!(u1.borrow().returned_gridlets()[0].reservation_id(), Some(0));

    let u2 = grid.user(u2).unwrap();
    let u2 = u2.borrow();
    assert_eq!(u2.summary().completed, 1);
    assert_eq!(u2.returned_gridlets()[0].reservation_id(), None);
    assert_eq!(u2.returned_gridlets()[0].exec_start_time(), Some(30.));
    assert_eq!(u2.summary().finish_time, Some(40.));
}

#[test]
// Gridlets that do not finish within the reserved window fail.
fn test_gridlet_fails_when_reservation_ends() {
    let mut grid = grid();
    add_resource(&mut grid, "r", AllocPolicyKind::AdvanceReservation, 1);
    let u = add_user(&mut grid, "u", reservation(0., 5., 1), &[1000.]);
    grid.step_until_no_events();

    let user = grid.user(u).unwrap();
    let user = user.borrow();
    assert_eq!(user.summary().failed, 1);
    let gridlet = &user.returned_gridlets()[0];
    assert_eq!(gridlet.status(), GridletStatus::Failed);
    assert_abs_diff_eq!(gridlet.finished_so_far(), 500., epsilon = 1e-9);
    assert_eq!(gridlet.finish_time(), Some(5.));
}

#[test]
// Without resources supporting reservations the workload is submitted as best effort.
fn test_reservation_without_capable_resource() {
    let mut grid = grid();
    add_resource(&mut grid, "r", AllocPolicyKind::SpaceShared, 1);
    let u = add_user(&mut grid, "u", reservation(0., 100., 1), &[1000.]);
    grid.step_until_no_events();

    let user = grid.user(u).unwrap();
    assert_eq!(user.borrow().summary().completed, 1);
    assert_eq!(user.borrow().returned_gridlets()[0].reservation_id(), None);
}

#[test]
// The later reservation is booked first; at the shared boundary the earlier one
// hands its PEs over before the later one starts.
fn test_adjacent_reservations() {
    let mut grid = grid();
    add_resource(&mut grid, "r", AllocPolicyKind::AdvanceReservation, 2);
    let ub = add_user(&mut grid, "ub", reservation(10., 10., 2), &[500.]);
    let ua = add_user(&mut grid, "ua", reservation(5., 5., 2), &[100.]);
    grid.step_until_no_events();

    let ua = grid.user(ua).unwrap();
    let ua = ua.borrow();
    assert_eq!(ua.summary().completed, 1);
    assert_eq!(ua.returned_gridlets()[0].status(), GridletStatus::Success);
    assert_eq!(ua.summary().finish_time, Some(6.));

    let ub = grid.user(ub).unwrap();
    let ub = ub.borrow();
    assert_eq!(ub.summary().completed, 1);
    let gridlet = &ub.returned_gridlets()[0];
    assert_eq!(gridlet.status(), GridletStatus::Success);
    assert_eq!(gridlet.exec_start_time(), Some(10.));
    assert_eq!(gridlet.finish_time(), Some(15.));
}

#[test]
fn test_cancel_reservation() {
    let mut grid = grid();
    let r = add_resource(&mut grid, "r", AllocPolicyKind::AdvanceReservation, 1);
    let u = add_user(&mut grid, "u", reservation(0., 100., 1), &[1000.]);
    grid.step_until_time(0.);

    let user = grid.user(u).unwrap();
    assert_eq!(user.borrow().reservation(), Some((r, 0)));
    let tx = user.borrow_mut().cancel_reservation(4.).unwrap();
    grid.step_until_time(5.);
    let reply = user
        .borrow_mut()
        .take_reply(&TransactionFilter::<ReservationReply>::new(tx))
        .unwrap();
    assert_eq!(
        reply.data_ref::<ReservationReply>().unwrap().result,
        Ok(ReservationStatus::Canceled)
    );

    let tx = user.borrow_mut().request_reservation_status().unwrap();
    grid.step_until_no_events();
    let reply = user
        .borrow_mut()
        .take_reply(&TransactionFilter::<ReservationReply>::new(tx))
        .unwrap();
    assert_eq!(
        reply.data_ref::<ReservationReply>().unwrap().result,
        Ok(ReservationStatus::Canceled)
    );
    assert_eq!(user.borrow().pending_replies(), 0);

    let user = user.borrow();
    assert_eq!(user.summary().canceled, 1);
    let gridlet = &user.returned_gridlets()[0];
    assert_eq!(gridlet.status(), GridletStatus::Canceled);
    assert_abs_diff_eq!(gridlet.finished_so_far(), 400., epsilon = 1e-9);
}

/// Sends raw reservation requests and keeps every reply.
struct Client {
    replies: Vec<Event>,
    ctx: SimulationContext,
}

impl EventHandler for Client {
    fn on(&mut self, event: Event) {
        self.replies.push(event);
    }
}

fn reservation_result(client: &Client, tx: u64) -> Result<ReservationStatus, ReservationError> {
    client
        .replies
        .iter()
        .filter_map(|e| e.data_ref::<ReservationReply>())
        .find(|reply| reply.transaction == tx)
        .unwrap()
        .result
        .clone()
}

#[test]
// A reservation that is never committed expires and can no longer be committed.
fn test_uncommitted_reservation_expires() {
    let mut grid = grid();
    let r = add_resource(&mut grid, "r", AllocPolicyKind::AdvanceReservation, 2);
    let ctx = grid.sim().create_context("client");
    let client = Rc::new(RefCell::new(Client {
        replies: Vec::new(),
        ctx,
    }));
    grid.sim().add_handler("client", client.clone());
    {
        let mut client = client.borrow_mut();
        let request = ReservationCreate {
            transaction: 0,
            start_time: 200.,
            duration: 10.,
            num_pe: 2,
        };
        client.ctx.emit(request, r, 0.);
        let query = |transaction| ReservationQuery {
            transaction,
            reservation_id: 0,
        };
        client.ctx.emit(query(1), r, 50.);
        client.ctx.emit(query(2), r, 150.);
        let commit = ReservationCommit {
            transaction: 3,
            reservation_id: 0,
        };
        client.ctx.emit(commit, r, 160.);
    }
    grid.step_until_no_events();

    let client = client.borrow();
    let created = client.replies[0].data_ref::<ReservationCreated>().unwrap();
    assert_eq!(created.result, Ok(0));
    assert_eq!(created.expiry_time, Some(100.));
    assert_eq!(reservation_result(&client, 1), Ok(ReservationStatus::NotCommitted));
    assert_eq!(reservation_result(&client, 2), Ok(ReservationStatus::Expired));
    assert_eq!(
        reservation_result(&client, 3),
        Err(ReservationError::InvalidStatus {
            id: 0,
            status: ReservationStatus::Expired
        })
    );
    let resource = grid.resource(r).unwrap();
    assert_eq!(resource.borrow().characteristics().num_free_pe(), 2);
}

#[test]
// A gridlet bound to a reservation stays where it is, later control operations still reach it.
fn test_bound_gridlet_cannot_move() {
    let mut grid = grid();
    let r = add_resource(&mut grid, "r", AllocPolicyKind::AdvanceReservation, 1);
    let r1 = add_resource(&mut grid, "r1", AllocPolicyKind::SpaceShared, 1);
    let u = add_user(&mut grid, "u", reservation(0., 100., 1), &[1000.]);
    grid.step_until_time(0.);

    let user = grid.user(u).unwrap();
    assert!(user.borrow_mut().move_gridlet(0, r1, 2.));
    assert_eq!(user.borrow().gridlet_location(0), Some(r));
    grid.step_until_time(3.);
    assert_eq!(user.borrow().gridlet_location(0), Some(r));
    assert_eq!(user.borrow().action_result(0), Some((GridletAction::Move, false)));

    // the clock stays at the last processed event
    assert_eq!(grid.current_time(), 2.);
    assert!(user.borrow_mut().cancel_gridlet(0, 2.));
    grid.step_until_no_events();

    let user = user.borrow();
    assert_eq!(user.summary().canceled, 1);
    let gridlet = &user.returned_gridlets()[0];
    assert_eq!(gridlet.status(), GridletStatus::Canceled);
    assert_eq!(gridlet.resource_id(), Some(r));
    assert_abs_diff_eq!(gridlet.finished_so_far(), 400., epsilon = 1e-9);
    assert_eq!(grid.resource(r1).unwrap().borrow().stats().submitted, 0);
}
