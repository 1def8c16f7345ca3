use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use splitfair::config::SplitfairConfig;
use splitfair::logging::{DebugLog, init_tracing};

mod cmd;

#[derive(Parser)]
#[command(name = "splitfair")]
#[command(version, about = "Shared household bookkeeping with live-synced lists")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding splitfair.toml (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Add penalty points to a housemate and show the consequence
    Penalty {
        /// Housemate name
        #[arg(long)]
        person: String,

        /// Points to add; repeat to add several times
        #[arg(long = "add", required = true, allow_negative_numbers = true)]
        add: Vec<i64>,
    },
    /// Split an amount equally between housemates
    Split {
        /// Amount, e.g. 42.50
        #[arg(long)]
        amount: String,

        /// Comma-separated participants, in remainder order
        #[arg(long, value_delimiter = ',', required = true)]
        people: Vec<String>,
    },
    /// Run live lists against an in-memory backend and print each snapshot
    Demo {
        /// User whose notification feed is shown
        #[arg(long, default_value = "userA")]
        viewer: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration
    Validate,
    /// Write a default splitfair.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SplitfairConfig::new(cli.config.clone(), cli.verbose)?;

    let logging = config.logging();
    let debug_log = DebugLog::new(logging.debug_buffer);
    let _guard = init_tracing(&logging, Some(debug_log.clone()))?;

    match &cli.command {
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
        Commands::Penalty { person, add } => cmd::cmd_penalty(&config, person, add)?,
        Commands::Split { amount, people } => cmd::cmd_split(amount, people)?,
        Commands::Demo { viewer } => cmd::cmd_demo(&config, viewer, &debug_log).await?,
    }

    Ok(())
}
