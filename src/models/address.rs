use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an address record entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A single IPv4/IPv6 address published in an address list.
    DirectIp,
    /// A CIDR network published in an address list.
    Cidr,
    /// An address extracted from a scraped, semi-structured page.
    Derived,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::DirectIp => "direct_ip",
            SourceType::Cidr => "cidr",
            SourceType::Derived => "derived",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "direct_ip" => Some(Self::DirectIp),
            "cidr" => Some(Self::Cidr),
            "derived" => Some(Self::Derived),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted AI-crawler address or network.
///
/// `(bot_name, address)` is unique. Records are never deleted; a withdrawn
/// address is kept with `is_active = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: i64,
    pub bot_name: String,
    pub source_type: SourceType,
    pub address: String,
    pub range_start: Option<String>,
    pub range_end: Option<String>,
    pub source_url: Option<String>,
    pub is_active: bool,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// An address about to be inserted or reactivated by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAddress {
    pub address: String,
    pub source_type: SourceType,
    pub range_start: Option<String>,
    pub range_end: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Scheduled or batch download of a published address list.
    FullUpdate,
    /// Scrape-based refresh.
    ManualUpdate,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::FullUpdate => "full_update",
            UpdateType::ManualUpdate => "manual_update",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "full_update" => Some(Self::FullUpdate),
            "manual_update" => Some(Self::ManualUpdate),
            _ => None,
        }
    }
}

/// Append-only audit row, one per synchronizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    pub id: i64,
    pub bot_name: String,
    pub update_type: UpdateType,
    pub changes_count: u32,
    pub error_message: Option<String>,
    pub source_url: Option<String>,
    pub duration_seconds: u64,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when appending to the update log.
#[derive(Debug, Clone)]
pub struct NewLogEntry<'a> {
    pub bot_name: &'a str,
    pub update_type: UpdateType,
    pub changes_count: u32,
    pub error_message: Option<&'a str>,
    pub source_url: Option<&'a str>,
    pub duration_seconds: u64,
}
