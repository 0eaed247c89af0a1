//! Registered-user store: one SQLite table behind a mutex.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tracing::info;

use crate::{domain::UserId, errors::Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_id     INTEGER PRIMARY KEY,
    username    TEXT,
    first_name  TEXT,
    last_name   TEXT,
    joined_utc  TEXT
);
";

/// A stored user. Fields are frozen at first registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    /// RFC 3339, UTC, seconds precision.
    pub joined_utc: String,
}

/// Profile fields observed on an incoming interaction.
#[derive(Clone, Debug, Default)]
pub struct UserProfile {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

pub struct UserStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl UserStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // WAL mode: readers never block the single writer.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;

        info!("User store opened at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::External(format!("store lock poisoned: {e}")))
    }

    /// Insert the user unless already present. Returns `true` if a row was created.
    pub fn register_if_absent(&self, profile: &UserProfile, joined_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO users (user_id, username, first_name, last_name, joined_utc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                profile.user_id,
                profile.username.as_deref().unwrap_or(""),
                profile.first_name.as_deref().unwrap_or(""),
                profile.last_name.as_deref().unwrap_or(""),
                joined_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get(&self, user_id: UserId) -> Result<Option<UserRecord>> {
        use rusqlite::OptionalExtension;

        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT user_id, username, first_name, last_name, joined_utc
                 FROM users WHERE user_id = ?1",
                [user_id.0],
                map_user,
            )
            .optional()?;
        Ok(row)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Most recently joined first.
    pub fn recent(&self, limit: usize) -> Result<Vec<UserRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, username, first_name, last_name, joined_utc
             FROM users ORDER BY joined_utc DESC, user_id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map([limit], map_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every record, oldest first.
    pub fn all(&self) -> Result<Vec<UserRecord>> {
        let conn = self.lock()?;
        query_all(&conn)
    }

    /// Snapshot of every registered id, taken once.
    pub fn recipient_ids(&self) -> Result<Vec<UserId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY joined_utc, user_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(UserId))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Write a consistent point-in-time copy of the store to `dest`.
    ///
    /// `VACUUM INTO` reads inside a single transaction, so the copy never
    /// observes a half-applied write. `dest` must not exist yet.
    pub fn snapshot_to(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Err(Error::InvalidArtifact {
                path: dest.to_path_buf(),
                reason: "snapshot target already exists".to_string(),
            });
        }
        let conn = self.lock()?;
        conn.execute("VACUUM INTO ?1", [dest.to_string_lossy().as_ref()])?;
        Ok(())
    }

    /// Replace every row with the contents of the SQLite file at `src`.
    pub fn restore_from(&self, src: &Path) -> Result<usize> {
        let rows = Self::read_backup(src)?;
        self.replace_all(&rows)?;
        info!(rows = rows.len(), "User store restored from {}", src.display());
        Ok(rows.len())
    }

    /// Read every user row from a backup file without touching the live store.
    ///
    /// Fails with [`Error::InvalidArtifact`] unless `src` is a SQLite
    /// database carrying a compatible `users` table.
    pub fn read_backup(src: &Path) -> Result<Vec<UserRecord>> {
        let invalid = |reason: String| Error::InvalidArtifact {
            path: src.to_path_buf(),
            reason,
        };

        let source = Connection::open_with_flags(src, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| invalid(format!("not a readable database: {e}")))?;
        query_all(&source).map_err(|e| invalid(format!("no usable users table: {e}")))
    }

    /// Swap the table contents for `rows` in one transaction.
    pub fn replace_all(&self, rows: &[UserRecord]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM users", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO users (user_id, username, first_name, last_name, joined_utc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for r in rows {
                insert.execute(rusqlite::params![
                    r.user_id,
                    r.username,
                    r.first_name,
                    r.last_name,
                    r.joined_utc
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }
}

/// Run a synchronous store or filesystem job off the async workers.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::External(format!("blocking task failed: {e}")))?
}

fn query_all(conn: &Connection) -> Result<Vec<UserRecord>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, username, first_name, last_name, joined_utc
         FROM users ORDER BY joined_utc, user_id",
    )?;
    let rows = stmt
        .query_map([], map_user)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.get(0)?,
        username: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        first_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        last_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        joined_utc: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
    })
}
