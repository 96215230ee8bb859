//! Named groups, persisted to SQLite and held in memory for lookups.

use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::Result;

/// Group memberships backed by a `groups(group_name, username)` table.
pub struct GroupStore {
    conn: Mutex<Connection>,
    /// Loaded at open, replaced per group after each successful commit.
    groups: RwLock<HashMap<String, Vec<String>>>,
}

impl GroupStore {
    /// Open or create the database at the given path and load all groups.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Enable WAL mode for better concurrent read/write performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS groups (
                group_name TEXT NOT NULL,
                username   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_groups_name
                ON groups(group_name);",
        )?;

        let groups = load_groups(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            groups: RwLock::new(groups),
        })
    }

    /// Replace the membership of `name` wholesale.
    ///
    /// The new rows are committed before the in-memory view changes, so other
    /// sessions never observe a membership that is not on disk.
    pub async fn create_or_replace(&self, name: &str, members: &[String]) -> Result<()> {
        let mut groups = self.groups.write().await;
        {
            let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM groups WHERE group_name = ?1", params![name])?;
            {
                let mut insert =
                    tx.prepare("INSERT INTO groups (group_name, username) VALUES (?1, ?2)")?;
                for member in members {
                    insert.execute(params![name, member])?;
                }
            }
            tx.commit()?;
        }
        groups.insert(name.to_string(), members.to_vec());
        info!("Group '{name}' saved with: {}", members.join(", "));
        Ok(())
    }

    /// Members of `name` in the order they were given, or `None` if no such group.
    pub async fn members_of(&self, name: &str) -> Option<Vec<String>> {
        self.groups.read().await.get(name).cloned()
    }

    pub async fn is_member(&self, name: &str, user: &str) -> bool {
        self.groups
            .read()
            .await
            .get(name)
            .is_some_and(|members| members.iter().any(|m| m == user))
    }

    /// Names of all known groups, sorted.
    pub async fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

fn load_groups(conn: &Connection) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare("SELECT group_name, username FROM groups ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut loaded: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (group, user) = row?;
        loaded.entry(group).or_default().push(user);
    }
    Ok(loaded)
}
