//! Live mapping of username → connected client.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Identifies one accepted connection for its whole lifetime.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh connection id.
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Sending side of a client's outbound line queue.
///
/// The session's writer task owns the receiving side and writes each line to
/// the socket, so enqueueing never blocks on a slow peer.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<String>) -> Self {
        Self { id, tx }
    }

    /// Queue one line for this client. `false` once the connection is gone.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.tx.send(line.into()).is_ok()
    }
}

/// Connected clients by username. At most one handle per name.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `username` to `handle`, returning the handle it displaced, if any.
    pub fn register(&self, username: &str, handle: ClientHandle) -> Option<ClientHandle> {
        self.lock().insert(username.to_string(), handle)
    }

    /// Remove `username` only while it still maps to connection `id`.
    ///
    /// A session displaced by a later registration must not evict its
    /// replacement when it shuts down.
    pub fn deregister(&self, username: &str, id: ConnectionId) -> bool {
        let mut clients = self.lock();
        match clients.get(username) {
            Some(handle) if handle.id == id => {
                clients.remove(username);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, username: &str) -> Option<ClientHandle> {
        self.lock().get(username).cloned()
    }

    /// Best-effort delivery of one line. No ack, no retry.
    pub fn deliver(&self, username: &str, line: &str) -> bool {
        self.lookup(username).is_some_and(|handle| handle.send(line))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ClientHandle>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }
}
