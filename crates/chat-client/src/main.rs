//! Chat client entry point
//!
//! Connects to the gateway and logs every event until Ctrl-C.
//!
//! Run with:
//! ```bash
//! CHAT_TOKEN=... cargo run -p chat-client
//! ```

use anyhow::Context;
use chat_client::ChatClient;
use chat_common::{try_init_tracing_with_config, ClientConfig, TracingConfig};
use chat_gateway::GatewayEvent;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(config).await {
        error!(error = %format!("{e:#}"), "Client failed");
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    info!(app = %config.app.name, env = ?config.app.env, "Configuration loaded");

    let client = ChatClient::new(config).context("failed to build client")?;
    let mut events = client.gateway().subscribe();
    client.connect().await.context("failed to connect")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(GatewayEvent::Dispatch(dispatch)) => {
                    info!(event = %dispatch.name, seq = ?dispatch.sequence, "Dispatch");
                }
                Some(GatewayEvent::Disconnected(info)) if info.is_fatal() => {
                    error!(code = ?info.code, reason = %info.reason, "Gateway rejected the session");
                    break;
                }
                Some(GatewayEvent::Disconnected(info)) => {
                    warn!(code = ?info.code, reason = %info.reason, "Gateway disconnected");
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
