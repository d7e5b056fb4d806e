use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{AppliedChanges, RangeStore, RecordCounts, StoreError, StoreResult};
use crate::models::address::{
    AddressRecord, NewAddress, NewLogEntry, SourceType, UpdateLogEntry, UpdateType,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const RECORD_COLUMNS: &str = "id, bot_name, source_type, ip_address, ip_range_start, ip_range_end,
     source_url, is_active, last_updated, created_at";

const LOG_COLUMNS: &str = "id, bot_name, update_type, changes_count, error_message, source_url,
     duration_seconds, created_at";

#[derive(Debug, thiserror::Error)]
#[error("unexpected stored value {0:?}")]
struct UnexpectedValue(String);

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(&raw, TS_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AddressRecord> {
    let source_type: String = row.get(2)?;
    let source_type = SourceType::from_str_name(&source_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            Box::new(UnexpectedValue(source_type.clone())),
        )
    })?;

    Ok(AddressRecord {
        id: row.get(0)?,
        bot_name: row.get(1)?,
        source_type,
        address: row.get(3)?,
        range_start: row.get(4)?,
        range_end: row.get(5)?,
        source_url: row.get(6)?,
        is_active: row.get::<_, i32>(7)? != 0,
        last_updated: parse_ts(8, row.get(8)?)?,
        created_at: parse_ts(9, row.get(9)?)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<UpdateLogEntry> {
    let update_type: String = row.get(2)?;
    let update_type = UpdateType::from_str_name(&update_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            Box::new(UnexpectedValue(update_type.clone())),
        )
    })?;

    Ok(UpdateLogEntry {
        id: row.get(0)?,
        bot_name: row.get(1)?,
        update_type,
        changes_count: row.get::<_, i64>(3)? as u32,
        error_message: row.get(4)?,
        source_url: row.get(5)?,
        duration_seconds: row.get::<_, i64>(6)? as u64,
        created_at: parse_ts(7, row.get(7)?)?,
    })
}

/// SQLite-backed [`RangeStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn new(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS ai_bot_ip_ranges (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                bot_name        TEXT NOT NULL,
                source_type     TEXT NOT NULL,
                ip_address      TEXT NOT NULL,
                ip_range_start  TEXT,
                ip_range_end    TEXT,
                source_url      TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                last_updated    TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                UNIQUE(bot_name, ip_address)
            );

            CREATE INDEX IF NOT EXISTS ix_ai_bot_ip_ranges_ip_address
                ON ai_bot_ip_ranges (ip_address);
            CREATE INDEX IF NOT EXISTS ix_ai_bot_ip_ranges_active
                ON ai_bot_ip_ranges (is_active);

            CREATE TABLE IF NOT EXISTS ip_range_update_log (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                bot_name          TEXT NOT NULL,
                update_type       TEXT NOT NULL,
                changes_count     INTEGER NOT NULL DEFAULT 0,
                error_message     TEXT,
                source_url        TEXT,
                duration_seconds  INTEGER NOT NULL DEFAULT 0,
                created_at        TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS ix_ip_range_update_log_bot_name
                ON ip_range_update_log (bot_name);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub(crate) fn backdate_logs(&self, bot_name: &str, ts: DateTime<Utc>) {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ip_range_update_log SET created_at = ?1 WHERE bot_name = ?2",
            params![format_ts(ts), bot_name],
        )
        .unwrap();
    }
}

impl RangeStore for SqliteStore {
    fn active_records(&self) -> StoreResult<Vec<AddressRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM ai_bot_ip_ranges WHERE is_active = 1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn active_addresses_for_bot(&self, bot_name: &str) -> StoreResult<HashSet<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ip_address FROM ai_bot_ip_ranges WHERE bot_name = ?1 AND is_active = 1",
        )?;
        let rows = stmt.query_map(params![bot_name], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
    }

    /// Never waits: a connection held by a sync run reports `Unavailable`.
    fn find_active_by_address(&self, address: &str) -> StoreResult<Option<AddressRecord>> {
        let conn = self
            .conn
            .try_lock()
            .ok_or_else(|| StoreError::Unavailable("connection busy".into()))?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM ai_bot_ip_ranges
                     WHERE ip_address = ?1 AND is_active = 1
                     ORDER BY id ASC LIMIT 1"
                ),
                params![address],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn get_record(&self, bot_name: &str, address: &str) -> StoreResult<Option<AddressRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM ai_bot_ip_ranges
                     WHERE bot_name = ?1 AND ip_address = ?2"
                ),
                params![bot_name, address],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn apply_changes(
        &self,
        bot_name: &str,
        source_url: Option<&str>,
        additions: &[NewAddress],
        removals: &[String],
    ) -> StoreResult<AppliedChanges> {
        let now = format_ts(Utc::now());
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut applied = AppliedChanges::default();

        {
            let mut upsert = tx.prepare(
                "INSERT INTO ai_bot_ip_ranges
                 (bot_name, source_type, ip_address, ip_range_start, ip_range_end,
                  source_url, is_active, last_updated, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
                 ON CONFLICT(bot_name, ip_address) DO UPDATE SET
                    source_type    = excluded.source_type,
                    ip_range_start = excluded.ip_range_start,
                    ip_range_end   = excluded.ip_range_end,
                    source_url     = excluded.source_url,
                    is_active      = 1,
                    last_updated   = excluded.last_updated",
            )?;
            for addition in additions {
                applied.added += upsert.execute(params![
                    bot_name,
                    addition.source_type.as_str(),
                    addition.address,
                    addition.range_start,
                    addition.range_end,
                    source_url,
                    now,
                ])? as u32;
            }

            let mut deactivate = tx.prepare(
                "UPDATE ai_bot_ip_ranges SET is_active = 0, last_updated = ?1
                 WHERE bot_name = ?2 AND ip_address = ?3 AND is_active = 1",
            )?;
            for address in removals {
                applied.deactivated +=
                    deactivate.execute(params![now, bot_name, address])? as u32;
            }
        }

        tx.commit()?;
        Ok(applied)
    }

    fn append_log(&self, entry: &NewLogEntry<'_>) -> StoreResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ip_range_update_log
             (bot_name, update_type, changes_count, error_message, source_url,
              duration_seconds, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.bot_name,
                entry.update_type.as_str(),
                entry.changes_count as i64,
                entry.error_message,
                entry.source_url,
                entry.duration_seconds as i64,
                format_ts(Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent_logs(&self, limit: usize) -> StoreResult<Vec<UpdateLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM ip_range_update_log ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], log_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn latest_log_per_bot(&self) -> StoreResult<Vec<UpdateLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM ip_range_update_log
             WHERE id IN (SELECT MAX(id) FROM ip_range_update_log GROUP BY bot_name)
             ORDER BY bot_name ASC"
        ))?;
        let rows = stmt.query_map([], log_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM ip_range_update_log WHERE created_at < ?1",
            params![format_ts(cutoff)],
        )?;
        Ok(deleted)
    }

    fn record_counts(&self) -> StoreResult<RecordCounts> {
        let conn = self.conn.lock();
        let (active, inactive) = conn.query_row(
            "SELECT COALESCE(SUM(is_active = 1), 0), COALESCE(SUM(is_active = 0), 0)
             FROM ai_bot_ip_ranges",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(RecordCounts {
            active: active as u64,
            inactive: inactive as u64,
        })
    }

    fn active_counts_by_bot(&self, bot_name_like: Option<&str>) -> StoreResult<Vec<(String, u64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT bot_name, COUNT(*) FROM ai_bot_ip_ranges
             WHERE is_active = 1 AND bot_name LIKE ?1
             GROUP BY bot_name ORDER BY bot_name ASC",
        )?;
        let pattern = bot_name_like.unwrap_or("%");
        let rows = stmt.query_map(params![pattern], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
