//! `taflex` — lifelong pickup-and-delivery planning on grid warehouses.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod generate;
mod plan;

#[derive(Parser)]
#[command(name = "taflex", version, about = "Lifelong multi-agent pickup-and-delivery planner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assign tasks to agents and print the committed paths.
    Plan(plan::PlanArgs),
    /// Generate a well-formed warehouse map and task file.
    Generate(generate::GenerateArgs),
}

fn main() -> anyhow::Result<()> {
    // logs go to stderr; stdout carries the committed paths
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taflex=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Command::Plan(args) => plan::run(args),
        Command::Generate(args) => generate::run(args),
    }
}
