//! CLI handler for the `plan` subcommand
//!
//! Builds the registry from config and prints the phases the scheduler
//! derives from unit dependencies. Nothing is executed.

use crate::cli::PlanArgs;
use crate::config::Config;
use crate::scheduler::PhaseScheduler;
use crate::unit::UnitRegistry;
use tracing::info;

pub fn execute(args: PlanArgs) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(&args.config)?;
    config.disabled_units.extend(args.disable);
    config.validate()?;

    let registry = UnitRegistry::from_config(&config, None);
    let scheduler = PhaseScheduler::new(&registry)?;
    info!(
        "{} units in {} phases",
        registry.len(),
        scheduler.phases().len()
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(scheduler.phases())?);
        return Ok(());
    }

    let deps = registry.dependency_map();
    println!("\n=== Phase Layout ===\n");
    for phase in scheduler.phases() {
        println!(
            "Phase {} ({})",
            phase.number,
            if phase.parallel { "parallel" } else { "sequential" }
        );
        for unit in &phase.units {
            match deps.get(unit) {
                Some(after) if !after.is_empty() => {
                    println!("  - {} (after {})", unit, after.join(", "))
                }
                _ => println!("  - {}", unit),
            }
        }
    }
    if !config.disabled_units.is_empty() {
        println!("\nDisabled: {}", config.disabled_units.join(", "));
    }
    println!();

    Ok(())
}
