//! Address-list synchronization: fetch, diff against the store, apply,
//! log, and rebuild the IP index.

pub mod parse;
pub mod synchronizer;

use serde::Serialize;
use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("unknown source '{name}' (available: {})", .available.join(", "))]
    UnknownSource { name: String, available: Vec<String> },
}

/// Result of one source run, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub source: String,
    pub bot_name: String,
    pub source_url: String,
    pub success: bool,
    /// Distinct literals the source returned.
    pub fetched: u32,
    pub added: u32,
    pub deactivated: u32,
    /// Literals skipped because they were neither an IP nor a CIDR network.
    pub invalid: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Informational note for runs that succeeded without usable data.
    pub notice: Option<String>,
    /// Whether the run's update-log entry was written.
    pub logged: bool,
}

impl SyncReport {
    pub fn changes(&self) -> u32 {
        self.added + self.deactivated
    }

    /// Persisted and logged, so the index may be rebuilt from the store.
    pub fn applied(&self) -> bool {
        self.success && self.logged
    }
}

/// Aggregate of a concurrent run over every configured source.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub index_rebuilt: bool,
    pub sources: Vec<SyncReport>,
}

impl BatchReport {
    pub fn from_reports(sources: Vec<SyncReport>, index_rebuilt: bool) -> Self {
        let successful = sources.iter().filter(|r| r.success).count();
        Self {
            total: sources.len(),
            successful,
            failed: sources.len() - successful,
            index_rebuilt,
            sources,
        }
    }
}
