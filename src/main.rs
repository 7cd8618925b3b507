mod cli;
mod commands;
mod config;
mod environment;
mod launcher;
mod logfile;
mod paths;
mod probe;
mod progress;
mod runner;
mod signal;
mod state;
mod ui;
mod vault;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Config file from `--config`
    pub config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let mut logger = env_logger::Builder::new();
    logger
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None);

    // The log file takes over from stderr and records at least debug output
    if cli.log_file {
        match paths::log_dir().and_then(|dir| logfile::open(&logfile::today(&dir))) {
            Ok(file) => {
                logger
                    .filter_level(log_level.max(log::LevelFilter::Debug))
                    .format_timestamp_secs()
                    .target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => ui::warn(&format!("Could not open the log file: {e:#}")),
        }
    }
    logger.init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
    };
    log::trace!("verbosity {}", ctx.verbose);

    match cli.command {
        Command::Run(args) => commands::run::run(&ctx, args),
        Command::Plan(args) => commands::run::plan(&ctx, args),
        Command::History { limit } => commands::history::history(limit),
        Command::Summary { last, json } => commands::history::summary(last, json),
        Command::Secret(cmd) => commands::secret::run(cmd),
        Command::Config(cmd) => commands::config::run(&ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ignition", &mut io::stdout());
            Ok(())
        }
    }
}
