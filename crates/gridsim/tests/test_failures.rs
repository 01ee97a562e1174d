use approx::assert_abs_diff_eq;

use gridsim_core::simulation::Simulation;

use gridsim::calendar::ResourceCalendar;
use gridsim::characteristics::{AllocPolicyKind, ResourceCharacteristics};
use gridsim::config::SimulationConfig;
use gridsim::gridlet::GridletStatus;
use gridsim::machine::MachineList;
use gridsim::simulation::GridSimulation;
use gridsim::user::UserOptions;

fn grid() -> GridSimulation {
    let config = SimulationConfig::from_file("test-configs/config.yaml").unwrap();
    GridSimulation::new(Simulation::new(config.seed), config).unwrap()
}

fn add_resource(grid: &mut GridSimulation, name: &str, policy: AllocPolicyKind, machines: u32) -> u32 {
    grid.add_resource(
        name,
        ResourceCharacteristics::new(
            "x86",
            "Linux",
            MachineList::homogeneous(machines, 1, 100.),
            policy,
            0.,
            1.,
        ),
        ResourceCalendar::idle(0.),
        0.,
    )
}

fn add_user(grid: &mut GridSimulation, resubmit_failed: bool, gridlets: usize) -> u32 {
    let options = UserOptions {
        resubmit_failed,
        ..UserOptions::default()
    };
    let user_id = grid.add_user("u", options);
    for _ in 0..gridlets {
        grid.user(user_id).unwrap().borrow_mut().add_gridlet(1000., 0, 0, 1);
    }
    grid.start_user(user_id, 0.);
    user_id
}

#[test]
// Gridlet lost with a failed machine is resubmitted to another resource and keeps its progress.
fn test_resubmission_after_failure() {
    let mut grid = grid();
    let r0 = add_resource(&mut grid, "r0", AllocPolicyKind::SpaceShared, 2);
    let r1 = add_resource(&mut grid, "r1", AllocPolicyKind::SpaceShared, 1);
    let u = add_user(&mut grid, true, 3);
    grid.schedule_failure(r0, vec![0], 4., None);
    grid.step_until_no_events();

    let user = grid.user(u).unwrap();
    let user = user.borrow();
    let summary = user.summary();
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.resubmitted, 1);
    assert_eq!(summary.finish_time, Some(16.));

    let gridlet = user.returned_gridlets().iter().find(|g| g.id() == 0).unwrap();
    assert_eq!(gridlet.history().len(), 2);
    assert_eq!(gridlet.history()[0].resource_id, r0);
    assert_eq!(gridlet.resource_id(), Some(r1));
    assert_eq!(gridlet.exec_start_time(), Some(10.));

    let stats = grid.resource(r0).unwrap().borrow().stats().clone();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
}

#[test]
fn test_lost_gridlet_without_resubmission() {
    let mut grid = grid();
    let r = add_resource(&mut grid, "r", AllocPolicyKind::TimeShared, 1);
    let u = add_user(&mut grid, false, 1);
    grid.schedule_failure(r, vec![0], 3., Some(5.));
    grid.step_until_no_events();

    let user = grid.user(u).unwrap();
    let user = user.borrow();
    assert_eq!(user.summary().failed, 1);
    let gridlet = &user.returned_gridlets()[0];
    assert_eq!(gridlet.status(), GridletStatus::FailedResourceUnavailable);
    assert_abs_diff_eq!(gridlet.finished_so_far(), 300., epsilon = 1e-9);
}

#[test]
// A resource without working machines leaves the GIS and comes back after recovery.
fn test_deregistration_on_total_failure() {
    let mut grid = grid();
    let r0 = add_resource(&mut grid, "r0", AllocPolicyKind::SpaceShared, 1);
    let r1 = add_resource(&mut grid, "r1", AllocPolicyKind::SpaceShared, 1);
    grid.schedule_failure(r0, vec![0], 2., Some(10.));

    grid.step_until_time(3.);
    assert_eq!(grid.gis().borrow().resources(), vec![r1]);
    assert!(!grid.resource(r0).unwrap().borrow().is_registered());
    assert_eq!(grid.resource(r0).unwrap().borrow().characteristics().num_failed_machines(), 1);

    grid.step_until_time(13.);
    assert_eq!(grid.gis().borrow().resources(), vec![r1, r0]);
    assert!(grid.resource(r0).unwrap().borrow().is_registered());
}

#[test]
// A second failure of a machine that is already down neither fails nor repairs it again.
fn test_overlapping_failure_is_ignored() {
    let mut grid = grid();
    let r = add_resource(&mut grid, "r", AllocPolicyKind::SpaceShared, 2);
    grid.schedule_failure(r, vec![0], 2., Some(10.));
    grid.schedule_failure(r, vec![0, 1], 5., Some(3.));

    grid.step_until_time(6.);
    let failed = |grid: &GridSimulation, machine_id: u32| {
        let resource = grid.resource(r).unwrap();
        let resource = resource.borrow();
        resource.characteristics().machines.machine(machine_id).unwrap().is_failed()
    };
    assert!(failed(&grid, 0));
    assert!(failed(&grid, 1));

    grid.step_until_time(9.);
    assert!(failed(&grid, 0));
    assert!(!failed(&grid, 1));
    assert!(grid.failures().borrow().is_down(r, 0));

    grid.step_until_time(13.);
    assert!(!failed(&grid, 0));
    assert!(!grid.failures().borrow().is_down(r, 0));
}

fn run_random_failures() -> (u64, Vec<u64>, f64) {
    let config: SimulationConfig = "
seed: 7
resources:
  - name_prefix: r
    count: 2
    machines: 4
    pes_per_machine: 1
    mips: 100.0
    policy: SpaceShared
users:
  - name: u
    gridlets: 20
    length: 2000.0
    resubmit_failed: true
    max_resubmissions: 5
failures:
  mean_time_between_failures: 20.0
  mean_repair_time: 10.0
  max_failed_machines: 2
  until: 200.0
"
    .parse()
    .unwrap();
    let mut grid = GridSimulation::from_config(config).unwrap();
    grid.step_until_no_events();

    assert!(grid.all_users_done());
    let user = grid.user(grid.lookup_id("u")).unwrap();
    let user = user.borrow();
    let summary = user.summary();
    assert_eq!(summary.completed + summary.failed, 20);
    let returned = user.returned_gridlets().iter().map(|g| g.id()).collect();
    let injected = grid.failures().borrow().injected();
    (injected, returned, summary.finish_time.unwrap())
}

#[test]
fn test_random_failures_are_reproducible() {
    let first = run_random_failures();
    let second = run_random_failures();
    assert!(first.0 > 0);
    assert_eq!(first, second);
}
