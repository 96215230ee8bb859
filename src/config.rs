use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Multi-user chat relay server
#[derive(Parser, Clone, Debug)]
#[command(name = "chat-relay", version, about = "Multi-user line-protocol chat relay")]
pub struct Config {
    /// IP address to bind
    #[arg(long, env = "CHAT_RELAY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// Port to bind
    #[arg(long, env = "CHAT_RELAY_PORT", default_value_t = 9000)]
    pub port: u16,

    /// Directory holding per-user history logs
    #[arg(long, env = "CHAT_RELAY_HISTORY_DIR", default_value = "chat_history")]
    pub history_dir: PathBuf,

    /// Path to the SQLite database holding groups
    #[arg(long, env = "CHAT_RELAY_DB", default_value = "chat.db")]
    pub db: PathBuf,

    /// Minimum log level (RUST_LOG overrides it when set)
    #[arg(
        long,
        env = "CHAT_RELAY_LOG_LEVEL",
        value_enum,
        ignore_case = true,
        default_value_t = LogLevel::Info
    )]
    pub log_level: LogLevel,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    #[value(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// What the server core needs, resolved once at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub history_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Config {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::new(self.bind_address, self.port),
            history_dir: self.history_dir.clone(),
            db_path: self.db.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::parse_from(["chat-relay"]);
        let server = config.server_config();
        assert_eq!(server.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(server.history_dir, PathBuf::from("chat_history"));
        assert_eq!(server.db_path, PathBuf::from("chat.db"));
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "chat-relay",
            "--bind-address",
            "127.0.0.1",
            "--port",
            "4000",
            "--db",
            "/tmp/groups.db",
            "--log-level",
            "WARNING",
        ]);
        assert_eq!(config.server_config().bind_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.server_config().db_path, PathBuf::from("/tmp/groups.db"));
        assert_eq!(config.log_level.as_directive(), "warn");
    }
}
