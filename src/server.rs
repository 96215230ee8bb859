//! Connection acceptor: binds the listener and spawns one session per client.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::groups::GroupStore;
use crate::history::HistoryStore;
use crate::relay::{self, RelayState};

/// A bound relay server. Every failure in [`Server::bind`] is fatal.
pub struct Server {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl Server {
    /// Open both stores and bind the listening socket.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let groups = GroupStore::open(&config.db_path)?;
        let names = groups.group_names().await;
        info!("Loaded groups: {names:?}");

        let history = HistoryStore::open(&config.history_dir).await?;
        info!("History directory: {}", history.dir().display());

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| Error::Bind { addr: config.bind_addr, source })?;

        Ok(Self {
            listener,
            state: Arc::new(RelayState::new(groups, history)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<RelayState> {
        self.state.clone()
    }

    /// Accept connections forever. Accept errors are logged and skipped.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Server listening on {addr}"),
            Err(e) => error!("Listener has no local address: {e}"),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(relay::handle_connection(stream, addr, state));
                }
                Err(e) => error!("Accept failed: {e}"),
            }
        }
    }
}
