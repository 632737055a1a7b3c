//! Storage for the self-hosted backend: account-scoped day rows with
//! server-assigned timestamps, plus the token → account mapping the HTTP
//! layer authenticates against.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{is_date_key, now_ms};

/// One stored backend row. The payload is kept as the JSON the client
/// pushed; the server never interprets it beyond checking it is an object.
#[derive(Debug, Clone)]
pub struct HostedRow {
    pub date: String,
    pub data: String,
    pub updated_at_ms: i64,
}

pub struct HostedStore {
    conn: Connection,
}

impl HostedStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let store = HostedStore { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = HostedStore { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS day_rows (
                    account TEXT NOT NULL,
                    date TEXT NOT NULL,
                    data TEXT NOT NULL,
                    updated_at_ms INTEGER NOT NULL,
                    PRIMARY KEY (account, date)
                );

                CREATE TABLE IF NOT EXISTS accounts (
                    token TEXT PRIMARY KEY,
                    account_id TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Accounts ---

    pub fn account_for_token(&self, token: &str) -> Result<Option<String>> {
        let account = self
            .conn
            .query_row(
                "SELECT account_id FROM accounts WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()?;
        Ok(account)
    }

    /// Register a token, creating a fresh account id for it.
    pub fn create_account(&self, token: &str) -> Result<String> {
        let account_id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO accounts (token, account_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, account_id, Utc::now().to_rfc3339()],
        )?;
        Ok(account_id)
    }

    // --- Day rows ---

    pub fn row_updated_at(&self, account: &str, date_key: &str) -> Result<Option<i64>> {
        let ts = self
            .conn
            .query_row(
                "SELECT updated_at_ms FROM day_rows WHERE account = ?1 AND date = ?2",
                params![account, date_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    /// Upsert a row, assigning a fresh `updated_at` that is strictly
    /// greater than the row's previous timestamp whatever the wall clock
    /// says. Returns the assigned timestamp.
    pub fn upsert_row(&self, account: &str, date_key: &str, data: &str) -> Result<i64> {
        if !is_date_key(date_key) {
            bail!("Invalid date key '{date_key}'. Use YYYY-MM-DD");
        }
        let previous = self.row_updated_at(account, date_key)?;
        let ts = now_ms().max(previous.unwrap_or(0) + 1);
        self.conn.execute(
            "INSERT INTO day_rows (account, date, data, updated_at_ms) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account, date) DO UPDATE
             SET data = excluded.data, updated_at_ms = excluded.updated_at_ms",
            params![account, date_key, data, ts],
        )?;
        Ok(ts)
    }

    /// All rows for an account in `[start_key, end_key]` inclusive, newest
    /// date first.
    pub fn list_range(&self, account: &str, start_key: &str, end_key: &str) -> Result<Vec<HostedRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, data, updated_at_ms FROM day_rows
             WHERE account = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date DESC",
        )?;
        let rows = stmt
            .query_map(params![account, start_key, end_key], |row| {
                Ok(HostedRow {
                    date: row.get(0)?,
                    data: row.get(1)?,
                    updated_at_ms: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
