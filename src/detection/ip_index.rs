use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::settings::DetectionConfig;
use crate::models::address::{AddressRecord, SourceType};
use crate::storage::{RangeStore, StoreResult};

// ---------------------------------------------------------------------------
// BotFamily – index partition key
// ---------------------------------------------------------------------------

/// Normalized grouping of raw bot names. Declaration order is query order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum BotFamily {
    #[serde(rename = "ChatGPT User")]
    ChatGptUser,
    #[serde(rename = "GPTBot")]
    GptBot,
    #[serde(rename = "SearchBot")]
    SearchBot,
    #[serde(rename = "Other AI")]
    OtherAi,
}

impl BotFamily {
    pub const ALL: [BotFamily; 4] = [
        BotFamily::ChatGptUser,
        BotFamily::GptBot,
        BotFamily::SearchBot,
        BotFamily::OtherAi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BotFamily::ChatGptUser => "ChatGPT User",
            BotFamily::GptBot => "GPTBot",
            BotFamily::SearchBot => "SearchBot",
            BotFamily::OtherAi => "Other AI",
        }
    }

    /// Bucket a stored bot name. Rules are checked in order; the first
    /// substring hit decides.
    pub fn classify(bot_name: &str) -> Self {
        let name = bot_name.to_lowercase();
        if name.contains("chatgpt") || name.contains("user") {
            BotFamily::ChatGptUser
        } else if name.contains("gptbot") {
            BotFamily::GptBot
        } else if name.contains("search") {
            BotFamily::SearchBot
        } else {
            BotFamily::OtherAi
        }
    }
}

// ---------------------------------------------------------------------------
// IpMatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpMatch {
    pub is_match: bool,
    pub bot_name: Option<String>,
    pub source_type: Option<SourceType>,
}

impl IpMatch {
    pub fn none() -> Self {
        Self {
            is_match: false,
            bot_name: None,
            source_type: None,
        }
    }

    fn hit(bot_name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            is_match: true,
            bot_name: Some(bot_name.into()),
            source_type: Some(source_type),
        }
    }
}

// ---------------------------------------------------------------------------
// IndexSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct FamilyEntries {
    addresses: HashSet<String>,
    networks: Vec<IpNet>,
}

/// One immutable, fully built view of the active address records.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    families: BTreeMap<BotFamily, FamilyEntries>,
    built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    pub fn empty() -> Self {
        Self::build(&[])
    }

    /// Build a snapshot from `records`, ignoring inactive ones.
    pub fn build(records: &[AddressRecord]) -> Self {
        let mut families: BTreeMap<BotFamily, FamilyEntries> = BotFamily::ALL
            .iter()
            .map(|family| (*family, FamilyEntries::default()))
            .collect();

        for record in records.iter().filter(|r| r.is_active) {
            let entries = families
                .entry(BotFamily::classify(&record.bot_name))
                .or_default();
            entries.addresses.insert(record.address.clone());

            if record.source_type == SourceType::Cidr {
                if let Ok(net) = record.address.parse::<IpNet>() {
                    entries.networks.push(net);
                }
            }
        }

        Self {
            families,
            built_at: Utc::now(),
        }
    }

    /// Look up `ip` by exact literal, then optionally by network containment.
    pub fn query(&self, ip: &str, match_networks: bool) -> IpMatch {
        if ip.is_empty() {
            return IpMatch::none();
        }

        for (family, entries) in &self.families {
            if entries.addresses.contains(ip) {
                return IpMatch::hit(family.as_str(), SourceType::DirectIp);
            }
        }

        if match_networks {
            if let Ok(addr) = ip.trim().parse::<IpAddr>() {
                for (family, entries) in &self.families {
                    if entries.networks.iter().any(|net| net.contains(&addr)) {
                        return IpMatch::hit(family.as_str(), SourceType::Cidr);
                    }
                }
            }
        }

        IpMatch::none()
    }

    #[cfg(test)]
    pub fn addresses(&self, family: BotFamily) -> Option<&HashSet<String>> {
        self.families.get(&family).map(|e| &e.addresses)
    }

    /// Address count per family, in query order.
    pub fn family_counts(&self) -> Vec<(BotFamily, usize)> {
        self.families
            .iter()
            .map(|(family, entries)| (*family, entries.addresses.len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.families.values().map(|e| e.addresses.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}

// ---------------------------------------------------------------------------
// IpRangeIndex – snapshot coordinator
// ---------------------------------------------------------------------------

/// Owns the live [`IndexSnapshot`].
///
/// Readers load the current snapshot without locking. Rebuilds construct a
/// new snapshot off to the side and publish it with a single swap; they are
/// serialized so at most one is in flight.
pub struct IpRangeIndex {
    live: ArcSwap<IndexSnapshot>,
    rebuild_lock: Mutex<()>,
    store: Arc<dyn RangeStore>,
    store_fallback: bool,
    match_networks: bool,
}

impl IpRangeIndex {
    /// Create the index and load it from the store. A store failure leaves
    /// the index empty until the next successful rebuild.
    pub fn init(store: Arc<dyn RangeStore>, config: &DetectionConfig) -> Self {
        let index = Self {
            live: ArcSwap::from_pointee(IndexSnapshot::empty()),
            rebuild_lock: Mutex::new(()),
            store,
            store_fallback: config.store_fallback,
            match_networks: config.match_networks,
        };

        if let Err(e) = index.rebuild() {
            error!(error = %e, "Failed to load IP ranges from store, starting with an empty index");
        }

        index
    }

    /// Rebuild from the store's active records and publish the result.
    /// Returns the number of indexed addresses.
    pub fn rebuild(&self) -> StoreResult<usize> {
        let _guard = self.rebuild_lock.lock();
        let records = self.store.active_records()?;
        let snapshot = IndexSnapshot::build(&records);
        let count = snapshot.len();
        self.live.store(Arc::new(snapshot));
        info!(addresses = count, "IP range index rebuilt");
        Ok(count)
    }

    pub fn current(&self) -> Arc<IndexSnapshot> {
        self.live.load_full()
    }

    /// Query the live snapshot, falling back to an exact-match store lookup
    /// when enabled. Never fails.
    pub fn query(&self, ip: &str) -> IpMatch {
        let hit = self.live.load().query(ip, self.match_networks);
        if hit.is_match || !self.store_fallback || ip.is_empty() {
            return hit;
        }

        match self.store.find_active_by_address(ip) {
            Ok(Some(record)) => {
                debug!(ip = ip, bot = %record.bot_name, "IP matched via store fallback");
                IpMatch::hit(record.bot_name, record.source_type)
            }
            Ok(None) => IpMatch::none(),
            Err(e) => {
                debug!(ip = ip, error = %e, "Store fallback lookup failed");
                IpMatch::none()
            }
        }
    }
}
