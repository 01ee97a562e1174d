use std::io::Write;
use std::time::Instant;

use clap::Parser;
use env_logger::Builder;

use gridsim::config::SimulationConfig;
use gridsim::simulation::GridSimulation;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Runs a grid simulation described by a YAML config
struct Args {
    /// Path to simulation config
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Stop the simulation at this time
    #[arg(short, long)]
    until: Option<f64>,
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();

    let config = match SimulationConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let mut grid = match GridSimulation::from_config(config) {
        Ok(grid) => grid,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let t = Instant::now();
    match args.until {
        Some(time) => {
            grid.step_until_time(time);
        }
        None => grid.step_until_no_events(),
    }
    let elapsed = t.elapsed().as_secs_f64();

    println!("Simulation finished at {:.3}", grid.current_time());
    println!("Processed {} events in {:.2}s", grid.event_count(), elapsed);
    println!();
    println!("Resources:");
    for id in grid.resource_ids() {
        if let Some(resource) = grid.resource(id) {
            let resource = resource.borrow();
            let stats = resource.stats();
            println!(
                "  {:<12} completed: {:>4}  failed: {:>4}  busy PE time: {:>10.2}  revenue: {:>10.2}",
                resource.name(),
                stats.completed,
                stats.failed,
                stats.busy_pe_time,
                stats.revenue
            );
        }
    }
    println!();
    println!("Users:");
    for (name, summary) in grid.user_summaries() {
        let finish = summary
            .finish_time
            .map_or_else(|| "-".to_string(), |time| format!("{:.3}", time));
        println!(
            "  {:<12} completed: {:>4}/{:<4}  failed: {:>4}  resubmitted: {:>4}  cost: {:>10.2}  finish: {}",
            name, summary.completed, summary.total, summary.failed, summary.resubmitted, summary.total_cost, finish
        );
    }
}
