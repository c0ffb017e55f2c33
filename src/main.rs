use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cohortsim::scenario::{Overrides, ScenarioLoader};

#[derive(Debug, Parser)]
#[command(author, version, about = "Cohort-component population simulator")]
struct Cli {
    /// Path to the country scenario YAML file
    #[arg(long, default_value = "scenarios/south_korea.yaml")]
    scenario: PathBuf,

    /// Number of years to simulate (uses scenario default when omitted)
    #[arg(long)]
    years: Option<u32>,

    /// First year of the run (defaults to the scenario baseline year)
    #[arg(long)]
    start_year: Option<i32>,

    /// Override the total fertility rate
    #[arg(long)]
    tfr: Option<f64>,

    /// Override male life expectancy at birth
    #[arg(long)]
    life_expectancy_male: Option<f64>,

    /// Override female life expectancy at birth
    #[arg(long)]
    life_expectancy_female: Option<f64>,

    /// Override annual net migration
    #[arg(long, allow_hyphen_values = true)]
    net_migration: Option<f64>,

    /// Scale every death probability by this factor
    #[arg(long)]
    mortality_multiplier: Option<f64>,

    /// Concentrate migrants in ages 25-34 instead of 20-39
    #[arg(long)]
    concentrated_migration: bool,

    /// Print the full result as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loader = ScenarioLoader::new(".");
    let scenario = loader.load(&cli.scenario)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&scenario.model.logging.level))
        .context("Invalid log level in scenario")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let overrides = Overrides {
        tfr: cli.tfr,
        life_expectancy_male: cli.life_expectancy_male,
        life_expectancy_female: cli.life_expectancy_female,
        net_migration: cli.net_migration,
        mortality_multiplier: cli.mortality_multiplier,
        start_year: cli.start_year,
        years: cli.years,
        concentrated_migration: cli.concentrated_migration.then_some(true),
    };
    let params = scenario.run_params(&overrides);

    let mut engine = scenario.engine()?;
    let initial = scenario.initial_state(&mut engine)?;
    let result = engine.run(&initial, &params)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "{} ({}) | baseline {} | population {:.0}",
        scenario.name, scenario.code, params.start_year, result.baseline.total_population
    );
    if let Some(notes) = &scenario.notes {
        println!("{notes}");
    }
    println!(
        "{:>6} {:>14} {:>12} {:>12} {:>12} {:>8}",
        "year", "population", "births", "deaths", "migration", "warnings"
    );
    for record in result.records() {
        println!(
            "{:>6} {:>14.0} {:>12.0} {:>12.0} {:>12.0} {:>8}",
            record.year,
            record.total_population,
            record.births,
            record.deaths,
            record.migration_applied,
            record.consistency.warnings.len()
        );
    }
    if result.calibration_is_approximate() {
        println!("note: mortality calibration is approximate for at least one sex");
    }
    Ok(())
}
