//! Core relay logic: per-connection sessions and command dispatch.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::groups::GroupStore;
use crate::history::{HistoryStore, MessageRecord};
use crate::protocol::{self, Command, CommandError};
use crate::registry::{ClientHandle, ClientRegistry, next_connection_id};

/// Shared relay state. Each store synchronises itself; there is no lock
/// spanning all three.
pub struct RelayState {
    /// Connected clients by username.
    pub registry: ClientRegistry,
    /// Persistent group memberships (SQLite).
    pub groups: GroupStore,
    /// Persistent per-user message logs.
    pub history: HistoryStore,
}

impl RelayState {
    pub fn new(groups: GroupStore, history: HistoryStore) -> Self {
        Self {
            registry: ClientRegistry::new(),
            groups,
            history,
        }
    }
}

/// Whether the session keeps reading after a command.
enum Flow {
    Continue,
    Exit,
}

/// Handle a single client connection from first line to close.
pub async fn handle_connection<S>(stream: S, addr: SocketAddr, state: Arc<RelayState>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    // Spawn a task to write queued lines to this client.
    let (tx, rx) = mpsc::unbounded_channel();
    let write_task = tokio::spawn(write_lines(writer, rx));
    let handle = ClientHandle::new(next_connection_id(), tx);

    // The first line names the user.
    let username = match lines.next_line().await {
        Ok(Some(line)) => protocol::normalize_username(&line),
        Ok(None) => {
            debug!("{addr} closed before sending a username");
            finish(handle, write_task).await;
            return;
        }
        Err(e) => {
            warn!("{addr} read failed before registration: {e}");
            finish(handle, write_task).await;
            return;
        }
    };
    if username.is_empty() {
        handle.send(protocol::error("Username required"));
        finish(handle, write_task).await;
        return;
    }

    state.registry.register(&username, handle.clone());
    info!("{username} connected from {addr}");

    match run_session(&state, &username, &handle, &mut lines).await {
        Ok(()) => {}
        Err(Error::Io(e)) if is_disconnect(&e) => info!("{username} disconnected abruptly"),
        Err(e) => error!("{addr} ({username}) error: {e}"),
    }

    // Clean up regardless of how the session ended.
    if state.registry.deregister(&username, handle.id) {
        info!("{username} disconnected");
    }
    finish(handle, write_task).await;
}

/// Replay history, then read and dispatch commands until exit or EOF.
async fn run_session<R>(
    state: &RelayState,
    username: &str,
    handle: &ClientHandle,
    lines: &mut Lines<BufReader<R>>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    for record in state.history.history_of(username).await? {
        handle.send(protocol::history(&record)?);
    }
    handle.send(protocol::WELCOME);

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!("{username} → {line}");

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                handle.send(protocol::error(e));
                continue;
            }
        };

        match dispatch(state, username, handle, command).await? {
            Flow::Continue => {}
            Flow::Exit => break,
        }
    }
    Ok(())
}

async fn dispatch(
    state: &RelayState,
    username: &str,
    handle: &ClientHandle,
    command: Command,
) -> Result<Flow> {
    match command {
        Command::Group { name, members } => {
            state.groups.create_or_replace(&name, &members).await?;
            handle.send(protocol::group_created(&name, &members));
        }
        Command::Send { to, text } => {
            if !state.registry.deliver(&to, &protocol::direct(username, &text)) {
                debug!("{to} is offline; message kept for replay");
            }
            let record = MessageRecord::direct(username, &to, &text);
            state.history.append(username, &record).await?;
            if to != username {
                state.history.append(&to, &record).await?;
            }
        }
        Command::SendGroup { group, text } => {
            if let Err(e) = send_group(state, username, &group, &text).await? {
                handle.send(protocol::error(e));
            }
        }
        Command::Exit => return Ok(Flow::Exit),
    }
    Ok(Flow::Continue)
}

/// Forward a group message to online members and record it once per member.
///
/// The outer `Result` carries persistence failures; the inner one carries
/// rejections that are reported to the sender.
async fn send_group(
    state: &RelayState,
    username: &str,
    group: &str,
    text: &str,
) -> Result<std::result::Result<(), CommandError>> {
    let Some(members) = state.groups.members_of(group).await else {
        return Ok(Err(CommandError::NoSuchGroup));
    };
    if !state.groups.is_member(group, username).await {
        return Ok(Err(CommandError::NotAMember));
    }

    let line = protocol::group(username, group, text);
    let record = MessageRecord::group(username, group, text);
    for member in &members {
        if let Some(client) = state.registry.lookup(member) {
            if !client.send(line.as_str()) {
                warn!("{member} send failed: connection closed");
            }
        }
        state.history.append(member, &record).await?;
    }
    Ok(Ok(()))
}

/// Drain the outbound queue onto the socket, then close the write side.
async fn write_lines<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!("write failed, dropping remaining output: {e}");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Drop this session's sender and wait for queued lines to flush.
///
/// Handles cloned into the registry are removed before this runs, so the
/// writer sees the queue close once any in-flight deliveries finish.
async fn finish(handle: ClientHandle, write_task: tokio::task::JoinHandle<()>) {
    drop(handle);
    let _ = write_task.await;
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    )
}
