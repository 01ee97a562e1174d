use gridsim_core::simulation::Simulation;

use gridsim::config::SimulationConfig;
use gridsim::error::ConfigError;
use gridsim::simulation::GridSimulation;
use gridsim::user::UserSummary;

fn run(path: &str) -> (GridSimulation, Vec<(String, UserSummary)>) {
    let config = SimulationConfig::from_file(path).unwrap();
    let mut grid = GridSimulation::from_config(config).unwrap();
    grid.step_until_no_events();
    let summaries = grid.user_summaries();
    (grid, summaries)
}

#[test]
fn test_grid_from_config() {
    let (grid, summaries) = run("test-configs/grid.yaml");

    let names: Vec<String> = grid.resource_ids().into_iter().map(|id| grid.lookup_name(id)).collect();
    assert_eq!(names, vec!["cluster0", "cluster1", "shared"]);
    let users: Vec<&str> = summaries.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(users, vec!["user0", "user1", "user2"]);

    assert!(grid.all_users_done());
    for (_, summary) in summaries.iter() {
        assert_eq!(summary.total, 6);
        assert_eq!(summary.completed + summary.failed + summary.canceled, 6);
        assert!(summary.finish_time.is_some());
    }
    let shared = grid.resource(grid.lookup_id("shared")).unwrap();
    assert_eq!(shared.borrow().calendar().time_zone, 3.);
    assert!(grid.gis().borrow().resources().contains(&grid.lookup_id("cluster1")));
}

#[test]
fn test_same_seed_same_results() {
    let (_, first) = run("test-configs/grid.yaml");
    let (_, second) = run("test-configs/grid.yaml");
    assert_eq!(first, second);
}

#[test]
fn test_invalid_config() {
    let result = SimulationConfig::from_file("test-configs/invalid.yaml");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));

    let result = SimulationConfig::from_file("test-configs/negative-expiry.yaml");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));

    let result = SimulationConfig::from_file("test-configs/missing.yaml");
    assert!(matches!(result, Err(ConfigError::Io { .. })));

    let result = "resources: [".parse::<SimulationConfig>();
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_config_built_in_code_is_validated() {
    let config = SimulationConfig {
        reservation_expiry: -1.,
        ..SimulationConfig::default()
    };
    let result = GridSimulation::new(Simulation::new(123), config);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
