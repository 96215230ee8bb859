//! # chat-relay
//!
//! A minimal multi-user chat relay over a newline-delimited text protocol:
//! - Username registration on the first line of each connection
//! - Direct and group messages, delivered live to online users
//! - Groups persisted to SQLite and reloaded at startup
//! - Per-user message history, replayed on every connect
//!
//! There is no authentication and no encryption; the relay trusts the
//! username a client announces.

pub mod config;
pub mod error;
pub mod groups;
pub mod history;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;

pub use config::{Config, ServerConfig};
pub use error::{Error, Result};
pub use server::Server;
