use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "nugget")]
#[command(version, about = "Build orchestration engine for nuggets")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Directory holding .nugget/nugget.toml (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a plan file (JSON or YAML) and print its execution order
    Plan { file: PathBuf },
    /// Print the order in which a spec's deploy units would be deployed
    DeployOrder { file: PathBuf },
    /// Run a full session with dry-run collaborators, printing events as JSON lines
    Simulate {
        /// Plan file (JSON or YAML)
        #[arg(long)]
        plan: PathBuf,

        /// Spec file (JSON or YAML); an empty spec when omitted
        #[arg(long)]
        spec: Option<PathBuf>,

        /// Approve every gate instead of declining it
        #[arg(long)]
        yes: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default nugget.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    nugget::logging::init(cli.verbose, cli.json_logs);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Plan { file } => cmd::cmd_plan(&project_dir, file)?,
        Commands::DeployOrder { file } => cmd::cmd_deploy_order(file)?,
        Commands::Simulate { plan, spec, yes } => {
            cmd::cmd_simulate(&project_dir, plan, spec.as_deref(), *yes).await?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
