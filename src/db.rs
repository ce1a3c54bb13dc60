use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub seq: i64,
    pub payload: String,
    pub queued_at: String,
}

/// SQLite store shared by the host callback thread and the dispatcher.
///
/// Holds the dispatch queue and the settings table. Other processes (the CLI
/// subcommands) open the same file to enqueue actions, so writes wait on the
/// busy timeout instead of failing.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn drop_queue_table(&self) -> Result<()> {
        self.conn()?.execute_batch("DROP TABLE dispatch_queue")?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dispatch_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                queued_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn enqueue(&self, payload: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO dispatch_queue (payload, queued_at) VALUES (?1, ?2)",
            params![payload, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Removes and returns the oldest entry in one transaction.
    pub fn take_oldest(&self) -> Result<Option<QueueRow>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let row = tx
            .query_row(
                "SELECT seq, payload, queued_at FROM dispatch_queue ORDER BY seq ASC LIMIT 1",
                [],
                |row| {
                    Ok(QueueRow {
                        seq: row.get(0)?,
                        payload: row.get(1)?,
                        queued_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        // The row is gone before it is dispatched. A crash mid-dispatch
        // loses that entry, which is acceptable since startup purges the
        // queue anyway.
        if let Some(row) = &row {
            tx.execute("DELETE FROM dispatch_queue WHERE seq = ?1", params![row.seq])?;
        }
        tx.commit()?;
        Ok(row)
    }

    pub fn queue_len(&self) -> Result<usize> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM dispatch_queue", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn purge_queue(&self) -> Result<usize> {
        let removed = self.conn()?.execute("DELETE FROM dispatch_queue", [])?;
        Ok(removed)
    }

    pub fn list_entries(&self) -> Result<Vec<QueueRow>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT seq, payload, queued_at FROM dispatch_queue ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(QueueRow {
                seq: row.get(0)?,
                payload: row.get(1)?,
                queued_at: row.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
