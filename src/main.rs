//! Chat relay server.
//!
//! Accepts TCP clients speaking the line protocol described in
//! `chat_relay::protocol` and relays direct and group messages between them.

use chat_relay::{Config, Server};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_directive())),
        )
        .init();

    let server = match Server::bind(&config.server_config()).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
    ExitCode::SUCCESS
}
