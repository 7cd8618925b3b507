use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ignition")]
#[command(version)]
#[command(about = "Bring up your workstation: VPN, folders, IDEs, apps and browsers", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also write a debug log to the state directory's logs folder
    #[arg(long, global = true, env = "IGNITION_LOG_FILE")]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Launch everything in the configuration
    Run(RunArgs),

    /// Show what a run would do without launching anything
    Plan(PlanArgs),

    /// Show recent runs
    History {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Success rate, average duration and trend of recent runs
    Summary {
        /// Only consider the last N runs
        #[arg(long, value_name = "N")]
        last: Option<usize>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage stored credentials
    #[command(subcommand)]
    Secret(SecretCommand),

    /// Inspect and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Number of workers for concurrent phases
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Do not record this run in the history
    #[arg(long)]
    pub no_record: bool,

    /// Only show what would be launched
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Default)]
pub struct PlanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
}

/// Profile and target selection shared by `run` and `plan`
#[derive(Args, Debug, Default, Clone)]
pub struct SelectionArgs {
    /// Apply a profile overlay from profiles/<NAME>.toml
    #[arg(short, long, value_name = "NAME")]
    pub profile: Option<String>,

    /// Do not connect the VPN
    #[arg(long)]
    pub skip_vpn: bool,

    /// Do not launch browsers
    #[arg(long, conflicts_with = "browsers_only")]
    pub skip_browsers: bool,

    /// Launch browsers only
    #[arg(long)]
    pub browsers_only: bool,
}

#[derive(Subcommand)]
pub enum SecretCommand {
    /// Store a secret in the system keyring
    Set {
        /// Service name referenced by `credential` in the config
        service: String,

        /// Read the secret from stdin instead of prompting
        #[arg(long)]
        stdin: bool,
    },

    /// Remove a stored secret
    Delete {
        service: String,
    },

    /// Show where a secret would be resolved from
    Status {
        service: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show config, profile and state locations
    Path,

    /// Load the configuration and check targets, dependencies and phases
    Validate {
        /// Profile to validate together with the base file
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Write a starter configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
