use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use tripintel::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Only show logs with --verbose; stdout carries the event stream
    let filter = if cli.verbose {
        EnvFilter::new("tripintel=debug")
    } else {
        EnvFilter::new("tripintel=warn")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => cli::run::execute(args).await,
        Commands::Plan(args) => cli::plan::execute(args),
        Commands::Schema => cli::schema::execute(),
    }
}
