//! CLI front-end for the agent-based TDD task orchestrator.

mod commands;
mod config;
mod stub_executor;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{blueprint::BlueprintCommand, checkpoint::CheckpointCommand, queen::QueenCommand, tree::TreeCommand};

/// apiary: agent-based TDD task orchestrator
#[derive(Parser, Debug)]
#[command(name = "apiary")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Author and approve blueprints
    #[command(subcommand)]
    Blueprint(BlueprintCommand),
    /// Derive and inspect task trees
    #[command(subcommand)]
    Tree(TreeCommand),
    /// Drive the coordinator main loop
    #[command(subcommand)]
    Queen(QueenCommand),
    /// Time-travel over task-tree state
    #[command(subcommand)]
    Checkpoint(CheckpointCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Blueprint(BlueprintCommand::New(args)) => commands::blueprint::new(args),
        Commands::Blueprint(BlueprintCommand::Show(args)) => commands::blueprint::show(args),
        Commands::Blueprint(BlueprintCommand::Approve(args)) => commands::blueprint::approve(args),
        Commands::Blueprint(BlueprintCommand::Reject(args)) => commands::blueprint::reject(args),

        Commands::Tree(TreeCommand::Generate(args)) => commands::tree::generate(args),
        Commands::Tree(TreeCommand::Status(args)) => commands::tree::status(args),

        Commands::Queen(QueenCommand::Run(args)) => commands::queen::run(args).await,
        Commands::Queen(QueenCommand::Tick(args)) => commands::queen::tick(args).await,
        Commands::Queen(QueenCommand::Stop) => commands::queen::stop(),

        Commands::Checkpoint(CheckpointCommand::Create(args)) => commands::checkpoint::create(args),
        Commands::Checkpoint(CheckpointCommand::Rollback(args)) => commands::checkpoint::rollback(args),
        Commands::Checkpoint(CheckpointCommand::Timeline(args)) => commands::checkpoint::timeline(args),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "command failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    Ok(())
}
