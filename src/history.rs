//! Per-user message history, replayed when a user connects.
//!
//! Each user has an append-only JSON Lines log at
//! `<dir>/<encoded-username>.jsonl`. A legacy `<username>.json` file holding
//! one JSON array of records is read first when present, so histories written
//! in the older whole-file format still replay.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

/// One stored message. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server-assigned ISO-8601 time of persistence.
    pub timestamp: String,
    pub sender: String,
    /// Set for direct messages.
    pub recipient: Option<String>,
    /// Set for group messages.
    pub group: Option<String>,
    pub content: String,
}

impl MessageRecord {
    /// A direct message record stamped with the current time.
    pub fn direct(sender: &str, recipient: &str, content: &str) -> Self {
        Self {
            timestamp: now_iso8601(),
            sender: sender.to_string(),
            recipient: Some(recipient.to_string()),
            group: None,
            content: content.to_string(),
        }
    }

    /// A group message record stamped with the current time.
    pub fn group(sender: &str, group: &str, content: &str) -> Self {
        Self {
            timestamp: now_iso8601(),
            sender: sender.to_string(),
            recipient: None,
            group: Some(group.to_string()),
            content: content.to_string(),
        }
    }
}

/// Durable per-user history logs.
pub struct HistoryStore {
    dir: PathBuf,
    /// One lock per user; appends for the same user never interleave.
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl HistoryStore {
    /// Open the store, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            user_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every record stored for `username`, oldest first. Empty if none.
    pub async fn history_of(&self, username: &str) -> Result<Vec<MessageRecord>> {
        let lock = self.user_lock(username);
        let result = {
            let _guard = lock.lock().await;
            self.read_all(username).await
        };
        self.release_lock(username, lock);
        result
    }

    /// Append one record to `username`'s log and flush it to disk.
    pub async fn append(&self, username: &str, record: &MessageRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let lock = self.user_lock(username);
        let result = {
            let _guard = lock.lock().await;
            self.write_line(username, &line).await
        };
        self.release_lock(username, lock);
        result?;

        debug!(
            "Saved message for {username} from {} → {}",
            record.sender,
            record
                .recipient
                .as_deref()
                .or(record.group.as_deref())
                .unwrap_or("self")
        );
        Ok(())
    }

    async fn read_all(&self, username: &str) -> Result<Vec<MessageRecord>> {
        let mut records = self.read_legacy(username).await?;
        let path = self.log_path(username);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|source| Error::CorruptHistory {
                path: path.display().to_string(),
                line: index + 1,
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }

    async fn write_line(&self, username: &str, line: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(username))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Whole-array `.json` files were named after the raw username; look there
    /// first, then under the encoded stem.
    async fn read_legacy(&self, username: &str) -> Result<Vec<MessageRecord>> {
        let encoded = encode_username(username);
        let mut stems = Vec::with_capacity(2);
        if is_safe_file_stem(username) {
            stems.push(username.to_string());
        }
        if !stems.contains(&encoded) {
            stems.push(encoded);
        }

        for stem in stems {
            let path = self.dir.join(format!("{stem}.json"));
            match tokio::fs::read(&path).await {
                Ok(bytes) => return Ok(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Vec::new())
    }

    fn log_path(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", encode_username(username)))
    }

    fn user_lock(&self, username: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(username.to_string()).or_default().clone()
    }

    /// Forget the lock for `username` once nobody else holds or awaits it.
    /// Clones are only taken under the map mutex, so the count check is exact.
    fn release_lock(&self, username: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(username);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.user_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A raw username is usable as a file stem when it names exactly one entry
/// inside the history directory.
fn is_safe_file_stem(username: &str) -> bool {
    !username.is_empty()
        && username != "."
        && username != ".."
        && !username.contains(['/', '\\', '\0'])
}

/// Map a username onto a file stem that stays inside the history directory.
/// `[a-z0-9_-]` pass through, every other byte becomes `%XX`.
fn encode_username(username: &str) -> String {
    let mut out = String::with_capacity(username.len());
    for byte in username.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
