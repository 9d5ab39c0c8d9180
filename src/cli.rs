use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{config::Config, error::Error, filter::registry, server};

/// The command line interface for the port hub.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Log level on stdout.
    /// `RUST_LOG` may narrow it down further.
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log to daily rolling files in this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log level for the log files.
    #[arg(long, default_value_t = Level::DEBUG)]
    pub log_file_level: Level,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// What to hand to [`crate::logging::init`] for file logging.
    pub fn file_logging(&self) -> Option<(Level, PathBuf)> {
        self.log_dir.clone().map(|dir| (self.log_file_level, dir))
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),

    /// Show the ports, routes and filters of the given configuration,
    /// without opening any ports.
    Report,

    /// List the available filter types.
    Filters,
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

/// Run a command which does not start the hub.
pub fn handle_command(command: Commands, config: Option<&Config>) -> Result<(), Error> {
    match command {
        Commands::Examples(Examples::Config) => {
            println!("{}", Config::example().serialize_pretty()?);
        }
        Commands::Report => {
            let config = config.ok_or_else(|| {
                Error::BadConfig("A configuration file is needed for a report".into())
            })?;

            for line in server::report(config)? {
                println!("{line}");
            }
        }
        Commands::Filters => {
            for name in registry::NAMES {
                println!("{name:<8}{}", registry::describe(name).unwrap_or_default());
            }
        }
    }

    Ok(())
}
