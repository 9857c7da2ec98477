//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fleet manager for a pool of game server processes.
#[derive(Debug, Parser)]
#[command(name = "gamekeeper", version, about)]
pub struct Cli {
    /// Directory holding config.json and the pid pin-file.
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Supervise the fleet (default when no command is given).
    Run,

    /// Validate the configuration and report findings.
    Validate,

    /// Inspect or edit the configuration document.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the merged configuration as JSON.
    Show,

    /// Set one game-server field by its JSON key (e.g. `svr_total 5`).
    Set { key: String, value: String },
}
