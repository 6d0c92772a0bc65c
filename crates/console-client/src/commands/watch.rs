//! Watch command: mirrors the console state to stdout.

use std::io::Write;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::client::{ClientEvent, ClientOptions, ConsoleClient};
use crate::config::ClientConfig;
use crate::connector::{Connector, WebSocketConnector};
use crate::error::{ClientError, ClientResult};

/// Prints every update of the selected keys to `out` until the client
/// stops. A server restart starts over with a fresh client.
pub async fn watch<C, W>(
    connector: C,
    options: ClientOptions,
    keys: &[String],
    out: &mut W,
) -> ClientResult<()>
where
    C: Connector + Clone,
    W: Write + Send,
{
    let selected = |key: &str| keys.is_empty() || keys.iter().any(|k| k == key);

    loop {
        let client = ConsoleClient::connect(connector.clone(), options.clone()).await?;
        let mut events = client.subscribe();
        for (key, value) in client.store().loaded() {
            if selected(key) {
                writeln!(out, "{} = {}", key, value)?;
            }
        }

        loop {
            match events.recv().await {
                Ok(ClientEvent::Data { key, value }) if selected(key.as_str()) => {
                    writeln!(out, "{} = {}", key, value)?;
                }
                Ok(ClientEvent::Patch { key, value }) if selected(key.as_str()) => {
                    writeln!(out, "{} += {}", key, value)?;
                }
                Ok(ClientEvent::Broadcast(envelope)) if selected(envelope.kind.as_str()) => {
                    writeln!(out, "[{}] {}", envelope.kind, envelope.body)?;
                }
                Ok(ClientEvent::Closed { reconnecting: true }) => {
                    info!("Connection lost, reconnecting");
                }
                Ok(ClientEvent::Closed { reconnecting: false }) => return Err(ClientError::Closed),
                Ok(ClientEvent::ReloadRequired { previous, current }) => {
                    info!(
                        previous = %previous,
                        current = %current,
                        "Console restarted, starting over"
                    );
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Fell behind on updates"),
                Err(RecvError::Closed) => return Err(ClientError::Closed),
            }
        }
        out.flush()?;
    }
}

/// Runs `console watch` until interrupted.
pub async fn run(config: &ClientConfig, keys: &[String]) -> ClientResult<()> {
    let connector = WebSocketConnector::new(&config.connection.url)?;
    let mut stdout = std::io::stdout();
    tokio::select! {
        result = watch(connector, config.connection.client_options(), keys, &mut stdout) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}
