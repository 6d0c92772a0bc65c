//! console CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use console_client::cli::{Cli, Command, ConfigAction};
use console_client::commands;
use console_client::config::ClientConfig;
use console_client::error::{ClientError, ClientResult};
use console_core::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_config(&cli);

    let config_debug = config.as_ref().is_ok_and(|config| config.debug);
    if let Err(e) = init_tracing(cli.tracing_config(config_debug)) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> ClientResult<ClientConfig> {
    let mut config = if let Some(ref path) = cli.config {
        ClientConfig::load_from(path).map_err(ClientError::Config)?
    } else {
        ClientConfig::load().map_err(ClientError::Config)?
    };
    if let Some(ref url) = cli.url {
        config.connection.url = url.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.connection.request_timeout_secs = timeout;
    }
    Ok(config)
}

async fn run(cli: Cli, config: ClientConfig) -> ClientResult<()> {
    match cli.command {
        Command::Serve {
            listen,
            dev,
            entries,
        } => commands::serve::run(&config, listen, dev, entries).await,
        Command::Call { method, args } => commands::call::run(&config, &method, &args).await,
        Command::Watch { key } => commands::watch::run(&config, &key).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
