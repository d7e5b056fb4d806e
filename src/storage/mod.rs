pub mod sqlite;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::address::{AddressRecord, NewAddress, NewLogEntry, UpdateLogEntry};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of one transactional apply step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppliedChanges {
    /// Rows inserted or flipped back to active.
    pub added: u32,
    /// Rows flipped to inactive.
    pub deactivated: u32,
}

impl AppliedChanges {
    pub fn total(&self) -> u32 {
        self.added + self.deactivated
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub active: u64,
    pub inactive: u64,
}

/// Durable store of AI-crawler address records and the update log.
///
/// The synchronizer is the only writer of address records. Implementations
/// must apply one `apply_changes` call atomically: either every addition and
/// deactivation is committed or none is.
pub trait RangeStore: Send + Sync {
    fn active_records(&self) -> StoreResult<Vec<AddressRecord>>;

    /// Active addresses owned by exactly `bot_name`.
    fn active_addresses_for_bot(&self, bot_name: &str) -> StoreResult<HashSet<String>>;

    /// Any active record whose address equals `address` literally.
    fn find_active_by_address(&self, address: &str) -> StoreResult<Option<AddressRecord>>;

    fn get_record(&self, bot_name: &str, address: &str) -> StoreResult<Option<AddressRecord>>;

    fn apply_changes(
        &self,
        bot_name: &str,
        source_url: Option<&str>,
        additions: &[NewAddress],
        removals: &[String],
    ) -> StoreResult<AppliedChanges>;

    fn append_log(&self, entry: &NewLogEntry<'_>) -> StoreResult<i64>;

    /// Most recent entries first.
    fn recent_logs(&self, limit: usize) -> StoreResult<Vec<UpdateLogEntry>>;

    fn latest_log_per_bot(&self) -> StoreResult<Vec<UpdateLogEntry>>;

    /// Returns the number of deleted log rows.
    fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    fn record_counts(&self) -> StoreResult<RecordCounts>;

    /// Active record count per bot, optionally filtered with a SQL `LIKE`
    /// pattern on the bot name.
    fn active_counts_by_bot(&self, bot_name_like: Option<&str>) -> StoreResult<Vec<(String, u64)>>;
}
