use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::parse::{classify_literal, extract_section, parse_address_list, scrape_ipv4};
use super::{BatchReport, SyncError, SyncReport};
use crate::config::settings::{ScrapeConfig, SourceConfig, SyncConfig};
use crate::detection::ip_index::{BotFamily, IpRangeIndex};
use crate::models::address::{NewLogEntry, SourceType, UpdateLogEntry, UpdateType};
use crate::storage::{RangeStore, RecordCounts, StoreResult};

/// Name reported for runs of the crawlers-info scrape.
pub const SCRAPE_SOURCE_NAME: &str = "crawlers_info";

#[derive(Debug, Clone, Copy, Default)]
struct PersistOutcome {
    added: u32,
    deactivated: u32,
    invalid: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyCount {
    pub family: BotFamily,
    pub addresses: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotCount {
    pub bot_name: String,
    pub active: u64,
}

/// Point-in-time view of the live index and the store behind it.
#[derive(Debug, Clone, Serialize)]
pub struct RangeStats {
    pub families: Vec<FamilyCount>,
    pub indexed_total: usize,
    pub index_built_at: DateTime<Utc>,
    pub records: RecordCounts,
    pub by_bot: Vec<BotCount>,
    pub latest_updates: Vec<UpdateLogEntry>,
}

/// Keeps the store and the IP index in line with the external sources.
///
/// Every run writes exactly one update-log entry. Runs never return an
/// error; failures are carried in the [`SyncReport`].
pub struct Synchronizer {
    store: Arc<dyn RangeStore>,
    index: Arc<IpRangeIndex>,
    client: reqwest::Client,
    timeout_secs: u64,
    sources: Vec<SourceConfig>,
    scrape: ScrapeConfig,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn RangeStore>,
        index: Arc<IpRangeIndex>,
        sync: &SyncConfig,
        scrape: &ScrapeConfig,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(sync.timeout_secs))
            .user_agent(sync.user_agent.clone())
            .build()?;

        Ok(Self {
            store,
            index,
            client,
            timeout_secs: sync.timeout_secs,
            sources: sync.sources.clone(),
            scrape: scrape.clone(),
        })
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    pub fn scrape_config(&self) -> &ScrapeConfig {
        &self.scrape
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Sync one list source. Does not rebuild the index.
    pub async fn sync_source(&self, source: &SourceConfig) -> SyncReport {
        let started = Instant::now();
        let bot_name = source.effective_bot_name();
        let mut report = empty_report(&source.name, &bot_name, &source.url);

        let outcome = match self.fetch(&source.url).await {
            Ok(body) => {
                let fetched = parse_address_list(&body);
                report.fetched = fetched.len() as u32;
                self.persist(&bot_name, &source.url, &fetched, None, true)
            }
            Err(e) => Err(e),
        };

        self.finish(report, outcome, UpdateType::FullUpdate, started)
    }

    /// Sync every configured source concurrently. The index is rebuilt once
    /// if at least one source was persisted and logged.
    pub async fn update_all(&self) -> BatchReport {
        info!(sources = self.sources.len(), "Updating all IP range sources");

        let reports = join_all(self.sources.iter().map(|s| self.sync_source(s))).await;
        let index_rebuilt = reports.iter().any(SyncReport::applied) && self.rebuild_index();
        let batch = BatchReport::from_reports(reports, index_rebuilt);

        info!(
            total = batch.total,
            successful = batch.successful,
            failed = batch.failed,
            "IP range update finished"
        );
        batch
    }

    /// Sync the source called `name` and rebuild the index on success.
    pub async fn update_source(&self, name: &str) -> Result<SyncReport, SyncError> {
        let source = self
            .sources
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SyncError::UnknownSource {
                name: name.to_string(),
                available: self.sources.iter().map(|s| s.name.clone()).collect(),
            })?;

        let report = self.sync_source(source).await;
        if report.applied() {
            self.rebuild_index();
        }
        Ok(report)
    }

    /// Refresh ChatGPT-User addresses from the crawlers-info page.
    ///
    /// A page without the section markers, or with no usable addresses in the
    /// section, is an informational zero-change run and deactivates nothing.
    pub async fn refresh_chatgpt(&self) -> SyncReport {
        let started = Instant::now();
        let cfg = &self.scrape;
        let mut report = empty_report(SCRAPE_SOURCE_NAME, &cfg.bot_name, &cfg.url);

        let outcome = match self.fetch(&cfg.url).await {
            Ok(page) => match extract_section(&page, &cfg.start_marker, &cfg.end_marker) {
                Some(section) => {
                    let ips = scrape_ipv4(section);
                    report.fetched = ips.len() as u32;
                    if ips.is_empty() {
                        report.notice = Some("no addresses found in section".to_string());
                    }
                    let deactivate = !ips.is_empty();
                    self.persist(&cfg.bot_name, &cfg.url, &ips, Some(SourceType::Derived), deactivate)
                }
                None => {
                    info!(
                        url = %cfg.url,
                        marker = %cfg.start_marker,
                        "Address section not found on scraped page"
                    );
                    report.notice = Some(format!("'{}' section not found", cfg.start_marker));
                    Ok(PersistOutcome::default())
                }
            },
            Err(e) => Err(e),
        };

        let report = self.finish(report, outcome, UpdateType::ManualUpdate, started);
        if report.applied() {
            self.rebuild_index();
        }
        report
    }

    /// Delete update-log entries older than `days`. Idempotent.
    pub fn cleanup_logs(&self, days: u32) -> StoreResult<usize> {
        let cutoff = Utc::now() - TimeDelta::days(i64::from(days));
        let deleted = self.store.delete_logs_before(cutoff)?;
        info!(deleted = deleted, days = days, "Old update log entries removed");
        Ok(deleted)
    }

    /// Live index counts plus store totals. `bot_filter` narrows the per-bot
    /// counts to names containing it.
    pub fn stats(&self, bot_filter: Option<&str>) -> StoreResult<RangeStats> {
        let snapshot = self.index.current();
        let like = bot_filter.map(|f| format!("%{}%", f));

        let by_bot = self
            .store
            .active_counts_by_bot(like.as_deref())?
            .into_iter()
            .map(|(bot_name, active)| BotCount { bot_name, active })
            .collect();

        Ok(RangeStats {
            families: snapshot
                .family_counts()
                .into_iter()
                .map(|(family, addresses)| FamilyCount { family, addresses })
                .collect(),
            indexed_total: snapshot.len(),
            index_built_at: snapshot.built_at(),
            records: self.store.record_counts()?,
            by_bot,
            latest_updates: self.store.latest_log_per_bot()?,
        })
    }

    /// Most recent update-log entries first.
    pub fn recent_logs(&self, limit: usize) -> StoreResult<Vec<UpdateLogEntry>> {
        self.store.recent_logs(limit)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn fetch(&self, url: &str) -> Result<String, SyncError> {
        debug!(url = url, "Fetching address list");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| self.transport_error(url, e))
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout_secs,
            }
        } else {
            SyncError::Http(e)
        }
    }

    /// Diff `fetched` against the bot's active addresses and apply the result
    /// in one store transaction.
    fn persist(
        &self,
        bot_name: &str,
        source_url: &str,
        fetched: &BTreeSet<String>,
        source_type: Option<SourceType>,
        deactivate: bool,
    ) -> Result<PersistOutcome, SyncError> {
        let existing = self.store.active_addresses_for_bot(bot_name)?;

        let mut additions = Vec::new();
        let mut invalid = 0u32;
        for literal in fetched.iter().filter(|l| !existing.contains(*l)) {
            match classify_literal(literal) {
                Some(mut address) => {
                    if let Some(st) = source_type {
                        address.source_type = st;
                    }
                    additions.push(address);
                }
                None => {
                    invalid += 1;
                    debug!(bot = bot_name, literal = %literal, "Skipping invalid address literal");
                }
            }
        }

        let removals: Vec<String> = if deactivate {
            existing
                .iter()
                .filter(|a| !fetched.contains(*a))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        if additions.is_empty() && removals.is_empty() {
            return Ok(PersistOutcome {
                invalid,
                ..PersistOutcome::default()
            });
        }

        let applied = self
            .store
            .apply_changes(bot_name, Some(source_url), &additions, &removals)?;
        debug!(bot = bot_name, changes = applied.total(), "Address changes committed");

        Ok(PersistOutcome {
            added: applied.added,
            deactivated: applied.deactivated,
            invalid,
        })
    }

    /// Fill in the report and write the run's single log entry.
    fn finish(
        &self,
        mut report: SyncReport,
        outcome: Result<PersistOutcome, SyncError>,
        update_type: UpdateType,
        started: Instant,
    ) -> SyncReport {
        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(persisted) => {
                report.success = true;
                report.added = persisted.added;
                report.deactivated = persisted.deactivated;
                report.invalid = persisted.invalid;
                info!(
                    source = %report.source,
                    bot = %report.bot_name,
                    added = report.added,
                    deactivated = report.deactivated,
                    invalid = report.invalid,
                    "Source synchronized"
                );
            }
            Err(e) => {
                error!(
                    source = %report.source,
                    bot = %report.bot_name,
                    error = %e,
                    "Source synchronization failed"
                );
                report.error = Some(e.to_string());
            }
        }

        let entry = NewLogEntry {
            bot_name: &report.bot_name,
            update_type,
            changes_count: report.changes(),
            error_message: report.error.as_deref(),
            source_url: Some(report.source_url.as_str()),
            duration_seconds: elapsed.as_secs(),
        };
        match self.store.append_log(&entry) {
            Ok(_) => report.logged = true,
            Err(e) => {
                warn!(source = %report.source, error = %e, "Failed to write update log entry")
            }
        }

        report
    }

    fn rebuild_index(&self) -> bool {
        match self.index.rebuild() {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "IP index rebuild failed, keeping previous snapshot");
                false
            }
        }
    }
}

fn empty_report(source: &str, bot_name: &str, url: &str) -> SyncReport {
    SyncReport {
        source: source.to_string(),
        bot_name: bot_name.to_string(),
        source_url: url.to_string(),
        success: false,
        fetched: 0,
        added: 0,
        deactivated: 0,
        invalid: 0,
        duration_ms: 0,
        error: None,
        notice: None,
        logged: false,
    }
}
