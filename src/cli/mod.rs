pub mod plan;
pub mod run;
pub mod schema;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tripintel")]
#[command(
    author,
    version,
    about = "Plan-execute-reflect orchestrator for per-city travel intelligence"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose/debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a trip request and stream events as JSON lines
    Run(RunArgs),

    /// Print the phase layout of the registered units
    Plan(PlanArgs),

    /// Print JSON Schema for config validation
    Schema,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Trip request file (YAML or JSON)
    #[arg(value_name = "REQUEST")]
    pub request: PathBuf,

    /// Path to config file
    #[arg(short, long, default_value = "tripintel.yaml")]
    pub config: PathBuf,

    /// Use placeholder units instead of the configured backend
    #[arg(long)]
    pub offline: bool,

    /// Override max iterations per city
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Override the quality threshold (0-100)
    #[arg(long)]
    pub quality_threshold: Option<f64>,

    /// Override max parallel units
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override output directory
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Skip writing report files
    #[arg(long)]
    pub no_report: bool,
}

#[derive(Parser, Clone)]
pub struct PlanArgs {
    /// Path to config file
    #[arg(short, long, default_value = "tripintel.yaml")]
    pub config: PathBuf,

    /// Disable units for this plan (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub disable: Vec<String>,

    /// Print phases as JSON
    #[arg(long)]
    pub json: bool,
}
