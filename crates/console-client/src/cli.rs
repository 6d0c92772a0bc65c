//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console_core::TracingConfig;
use console_server::EntryFiles;

/// console - Host a control console or talk to one
#[derive(Debug, Parser)]
#[command(name = "console")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CONSOLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Console endpoint, overriding the configured one
    #[arg(long, env = "CONSOLE_URL")]
    pub url: Option<String>,

    /// RPC timeout in seconds, overriding the configured one
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Logging preset for this invocation. `config_debug` is the `debug`
    /// setting of the configuration file.
    pub fn tracing_config(&self, config_debug: bool) -> TracingConfig {
        match (&self.command, self.debug || config_debug) {
            (_, true) => TracingConfig::cli_debug(),
            (Command::Serve { .. }, false) => TracingConfig::daemon(),
            _ => TracingConfig::cli_quiet(),
        }
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a console hub over WebSocket in the foreground
    Serve {
        /// Address to bind, overriding the configured one
        #[arg(long)]
        listen: Option<String>,

        /// Serve development assets of entries
        #[arg(long)]
        dev: bool,

        /// Publish a UI entry (can be repeated)
        ///
        /// Either a path, a comma-separated list of paths, or
        /// `dev=<path>,prod=<path>`.
        #[arg(long = "entry", value_parser = parse_entry, action = clap::ArgAction::Append)]
        entries: Vec<EntryFiles>,
    },

    /// Invoke one remote method and print its result
    Call {
        /// Method name
        method: String,

        /// Arguments, each parsed as JSON or else taken as a string
        args: Vec<String>,
    },

    /// Mirror the console state and print every update
    Watch {
        /// Only print these keys (can be repeated)
        #[arg(long, action = clap::ArgAction::Append)]
        key: Vec<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

/// Parses an `--entry` value.
pub fn parse_entry(value: &str) -> Result<EntryFiles, String> {
    if value.contains('=') {
        let mut dev = None;
        let mut prod = None;
        for part in value.split(',') {
            match part.split_once('=') {
                Some(("dev", path)) if !path.is_empty() => dev = Some(path.to_string()),
                Some(("prod", path)) if !path.is_empty() => prod = Some(path.to_string()),
                _ => return Err(format!("expected dev=<path>,prod=<path>, got '{}'", value)),
            }
        }
        return match (dev, prod) {
            (Some(dev), Some(prod)) => Ok(EntryFiles::Modes { dev, prod }),
            _ => Err(format!("both dev and prod paths are required in '{}'", value)),
        };
    }

    let mut paths: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect();
    match paths.len() {
        0 => Err("entry path must not be empty".to_string()),
        1 => Ok(EntryFiles::Single(paths.remove(0))),
        _ => Ok(EntryFiles::List(paths)),
    }
}
