//! Ironloop CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Initialize the config directory
//! - `run`     — Execute one agent run for a task

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ironloop",
    about = "Ironloop — an autonomous coding-assistant agent loop",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Run the agent on a task
    Run {
        /// The task to perform
        task: String,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,

        /// Skip the planning stage
        #[arg(long)]
        no_plan: bool,

        /// Ask before every tool call
        #[arg(long)]
        approve: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Run {
            task,
            model,
            no_plan,
            approve,
        } => commands::run::run(task, model, no_plan, approve).await?,
    }

    Ok(())
}
