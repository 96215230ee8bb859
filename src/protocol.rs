//! Line protocol: client commands and server reply lines.
//!
//! Every frame is one UTF-8 line terminated by `\n`. The first line a client
//! sends is its username; every later line is a command.
//!
//! Client → server:
//! - `/group <name> <member>...`: create or replace a group
//! - `/send <user> <text...>`: direct message
//! - `/sendgroup <group> <text...>`: group message
//! - `/exit`: end the session
//!
//! Server → client: `[INFO] ...`, `[ERROR] ...`, `[<sender>] <text>`,
//! `[<sender> to <group>] <text>`, `[HISTORY] <json>` and the welcome line.

use thiserror::Error;

use crate::history::MessageRecord;

/// Sent once after history replay.
pub const WELCOME: &str = "Welcome to the chat server!";

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replace the membership of `name` with `members`.
    Group { name: String, members: Vec<String> },
    /// Direct message to one user.
    Send { to: String, text: String },
    /// Message to every member of a group.
    SendGroup { group: String, text: String },
    /// End the session.
    Exit,
}

/// Rejected command. The `Display` text is what the client sees after
/// `[ERROR] `; the session carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Invalid /group usage")]
    InvalidGroup,

    #[error("Invalid /send usage")]
    InvalidSend,

    #[error("Invalid /sendgroup usage")]
    InvalidSendGroup,

    #[error("Unknown command")]
    Unknown,

    #[error("Group doesn't exist")]
    NoSuchGroup,

    #[error("You are not a member of this group")]
    NotAMember,
}

impl Command {
    /// Parse one (already trimmed) input line.
    ///
    /// The command word must match exactly; `/groups` is unknown, not `/group`.
    /// Message text is the remaining words joined by single spaces.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_ascii_whitespace();
        let Some(head) = words.next() else {
            return Err(CommandError::Unknown);
        };

        match head {
            "/group" => {
                let name = words.next().ok_or(CommandError::InvalidGroup)?;
                let mut members: Vec<String> = Vec::new();
                for member in words.map(normalize_username) {
                    if !members.contains(&member) {
                        members.push(member);
                    }
                }
                Ok(Command::Group { name: name.to_string(), members })
            }
            "/send" => {
                let to = words.next().ok_or(CommandError::InvalidSend)?;
                let text = join_words(words).ok_or(CommandError::InvalidSend)?;
                Ok(Command::Send { to: normalize_username(to), text })
            }
            "/sendgroup" => {
                let group = words.next().ok_or(CommandError::InvalidSendGroup)?;
                let text = join_words(words).ok_or(CommandError::InvalidSendGroup)?;
                Ok(Command::SendGroup { group: group.to_string(), text })
            }
            "/exit" if words.next().is_none() => Ok(Command::Exit),
            _ => Err(CommandError::Unknown),
        }
    }
}

fn join_words<'a>(words: impl Iterator<Item = &'a str>) -> Option<String> {
    let text = words.collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Usernames are compared trimmed and lower-cased everywhere.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn info(message: &str) -> String {
    format!("[INFO] {message}")
}

pub fn error(message: impl std::fmt::Display) -> String {
    format!("[ERROR] {message}")
}

/// Direct message as seen by the recipient.
pub fn direct(sender: &str, text: &str) -> String {
    format!("[{sender}] {text}")
}

/// Group message as seen by each member.
pub fn group(sender: &str, group: &str, text: &str) -> String {
    format!("[{sender} to {group}] {text}")
}

/// One replayed history record.
pub fn history(record: &MessageRecord) -> Result<String, serde_json::Error> {
    Ok(format!("[HISTORY] {}", serde_json::to_string(record)?))
}

/// Acknowledgement for `/group`.
pub fn group_created(name: &str, members: &[String]) -> String {
    info(&format!("Group '{name}' created with: {}", members.join(", ")))
}
