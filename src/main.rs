use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use riskaudit::audit_config::AuditConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "riskaudit")]
#[command(version, about = "Risk-limiting election audits")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Threads for sample size estimation. Overrides audit.toml.
    #[arg(long, global = true)]
    pub nthreads: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an audit record from an election definition
    Init {
        /// Election definition (contests, card manifest, pools) as JSON
        election: PathBuf,
    },
    /// Start the next round, or evaluate the current one once reviews are in
    Round,
    /// Show audit progress
    Status,
    /// Estimate the next round's sample sizes without drawing them
    Estimate,
    /// Recompute the record and report discrepancies
    Verify,
    /// Stop auditing a contest or one of its assertions
    Remove {
        contest: String,
        /// Assertion index within the contest
        #[arg(short, long)]
        assertion: Option<usize>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default audit.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = AuditConfig::with_cli_args(project_dir, cli.verbose, cli.nthreads)?;

    match &cli.command {
        Commands::Init { election } => cmd::cmd_init(&config, election)?,
        Commands::Round => cmd::cmd_round(&config).await?,
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Estimate => cmd::cmd_estimate(&config)?,
        Commands::Verify => cmd::cmd_verify(&config)?,
        Commands::Remove { contest, assertion } => cmd::cmd_remove(&config, contest, *assertion)?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
