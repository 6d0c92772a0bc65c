//! Call command: invokes one remote method.

use serde_json::Value;
use tracing::debug;

use crate::client::{ClientOptions, ConsoleClient};
use crate::config::ClientConfig;
use crate::connector::{Connector, WebSocketConnector};
use crate::error::ClientResult;

/// Parses a command-line argument as JSON, falling back to a plain string.
pub fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Connects once, calls `method`, and returns its value.
pub async fn call<C: Connector>(
    connector: C,
    mut options: ClientOptions,
    method: &str,
    args: Vec<Value>,
) -> ClientResult<Value> {
    // one-shot: never reconnect
    options.max_reconnect_attempts = Some(0);
    let client = ConsoleClient::connect(connector, options).await?;
    debug!(method = %method, args = args.len(), "Calling");
    let value = client.send(method, args).await;
    client.shutdown();
    value
}

/// Runs `console call`.
pub async fn run(config: &ClientConfig, method: &str, args: &[String]) -> ClientResult<()> {
    let connector = WebSocketConnector::new(&config.connection.url)?;
    let args = args.iter().map(|raw| parse_arg(raw)).collect();
    let value = call(connector, config.connection.client_options(), method, args).await?;

    match value {
        Value::String(text) => println!("{}", text),
        Value::Null => {}
        other => println!(
            "{}",
            serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string())
        ),
    }
    Ok(())
}
