use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};

use crate::migrate;
use crate::models::{DayRecord, Settings, is_date_key, now_ms, today_key};

const SETTINGS_FLAG: &str = "settings";
const MIGRATION_OFFERED_FLAG: &str = "migration_offered";
const LAST_SYNC_FLAG: &str = "last_sync_ms";

/// Durable local store: one row per day record, sync metadata kept in a
/// separate table so sync-originated writes can stamp remote timestamps,
/// and a small key-value table for flags and settings.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS days (
                    date TEXT PRIMARY KEY,
                    data TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS flags (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            // Sync metadata arrived with the sync engine: per-day local
            // last-modified timestamps, stored apart from the records so a
            // pulled record can carry the remote timestamp instead.
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sync_meta (
                    date TEXT PRIMARY KEY,
                    updated_at_ms INTEGER NOT NULL
                );

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Day records ---

    /// Read the record for a date key, upgrading older shapes and merging
    /// canonical defaults. A never-logged date yields the empty record.
    pub fn read_record(&self, date_key: &str) -> Result<DayRecord> {
        if !is_date_key(date_key) {
            bail!("Invalid date key '{date_key}'. Use YYYY-MM-DD");
        }
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM days WHERE date = ?1",
                params![date_key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            None => Ok(DayRecord::empty()),
            Some(s) => {
                // Undecodable stored JSON degrades to the empty record;
                // it never aborts a read or a sync pass.
                let value = serde_json::from_str(&s).unwrap_or(serde_json::Value::Null);
                Ok(migrate::upgrade_record(value))
            }
        }
    }

    /// Persist a record and stamp its local last-modified metadata with the
    /// current wall-clock, in one transaction.
    pub fn write_record(&self, date_key: &str, record: &DayRecord) -> Result<()> {
        self.write_record_stamped(date_key, record, now_ms())
    }

    /// Persist a record that arrived from the server, stamping the row's
    /// remote `updated_at` instead of wall-clock time. On the next sync
    /// pass the record is indistinguishable from "already synced at that
    /// server time", which is what makes re-running sync idempotent.
    pub fn write_record_from_sync(
        &self,
        date_key: &str,
        record: &DayRecord,
        remote_ts_ms: i64,
    ) -> Result<()> {
        self.write_record_stamped(date_key, record, remote_ts_ms)
    }

    fn write_record_stamped(&self, date_key: &str, record: &DayRecord, ts_ms: i64) -> Result<()> {
        if !is_date_key(date_key) {
            bail!("Invalid date key '{date_key}'. Use YYYY-MM-DD");
        }
        let data = serde_json::to_string(record).context("Failed to serialize day record")?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO days (date, data) VALUES (?1, ?2)
             ON CONFLICT(date) DO UPDATE SET data = excluded.data",
            params![date_key, data],
        )?;
        tx.execute(
            "INSERT INTO sync_meta (date, updated_at_ms) VALUES (?1, ?2)
             ON CONFLICT(date) DO UPDATE SET updated_at_ms = excluded.updated_at_ms",
            params![date_key, ts_ms],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Every stored date key, filtered to the canonical `YYYY-MM-DD` shape.
    pub fn list_known_date_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT date FROM days ORDER BY date")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys.into_iter().filter(|k| is_date_key(k)).collect())
    }

    pub fn local_updated_at(&self, date_key: &str) -> Result<Option<i64>> {
        let ts = self
            .conn
            .query_row(
                "SELECT updated_at_ms FROM sync_meta WHERE date = ?1",
                params![date_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    /// Overwrite today with a fresh empty record and clear today's
    /// metadata. The remote row, if any, is left alone; an empty record
    /// never wins a push.
    pub fn reset_today(&self) -> Result<()> {
        let today = today_key();
        let data = serde_json::to_string(&DayRecord::empty())?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO days (date, data) VALUES (?1, ?2)
             ON CONFLICT(date) DO UPDATE SET data = excluded.data",
            params![today, data],
        )?;
        tx.execute("DELETE FROM sync_meta WHERE date = ?1", params![today])?;
        tx.commit()?;
        Ok(())
    }

    // --- Flags ---

    fn get_flag(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM flags WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_flag(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO flags (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Whether the first-sync bootstrap decision has already been shown or
    /// resolved on this device.
    pub fn migration_offered(&self) -> Result<bool> {
        Ok(self.get_flag(MIGRATION_OFFERED_FLAG)?.as_deref() == Some("true"))
    }

    pub fn set_migration_offered(&self) -> Result<()> {
        self.set_flag(MIGRATION_OFFERED_FLAG, "true")
    }

    /// Epoch-ms time of the last successful full sync. Advisory only.
    pub fn last_sync_ms(&self) -> Result<Option<i64>> {
        Ok(self
            .get_flag(LAST_SYNC_FLAG)?
            .and_then(|v| v.parse::<i64>().ok()))
    }

    pub fn set_last_sync_ms(&self, ts_ms: i64) -> Result<()> {
        self.set_flag(LAST_SYNC_FLAG, &ts_ms.to_string())
    }

    // --- Settings ---

    pub fn settings(&self) -> Result<Settings> {
        match self.get_flag(SETTINGS_FLAG)? {
            None => Ok(Settings::default()),
            Some(s) => {
                let value = serde_json::from_str(&s).unwrap_or(serde_json::Value::Null);
                Ok(migrate::upgrade_settings(value))
            }
        }
    }

    pub fn set_settings(&self, settings: &Settings) -> Result<()> {
        let data = serde_json::to_string(settings).context("Failed to serialize settings")?;
        self.set_flag(SETTINGS_FLAG, &data)
    }

    // --- Test access ---

    /// Insert a raw day row without touching sync metadata. Simulates data
    /// written by client versions that predate the metadata table.
    #[cfg(test)]
    pub(crate) fn insert_raw_day(&self, date_key: &str, json: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO days (date, data) VALUES (?1, ?2)
             ON CONFLICT(date) DO UPDATE SET data = excluded.data",
            params![date_key, json],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn delete_day(&self, date_key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM days WHERE date = ?1", params![date_key])?;
        self.conn
            .execute("DELETE FROM sync_meta WHERE date = ?1", params![date_key])?;
        Ok(())
    }
}
