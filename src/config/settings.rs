use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::defaults;

/// Accepted format for daily trigger times (UTC).
pub const TIME_OF_DAY_FORMAT: &str = "%H:%M";

/// Top-level configuration for the botwatch service.
/// Deserializes from a TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::default_admin_api_config")]
    pub admin_api: AdminApiConfig,

    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,

    #[serde(default = "defaults::default_detection_config")]
    pub detection: DetectionConfig,

    #[serde(default = "defaults::default_sync_config")]
    pub sync: SyncConfig,

    #[serde(default = "defaults::default_scrape_config")]
    pub scrape: ScrapeConfig,

    #[serde(default = "defaults::default_scheduler_config")]
    pub scheduler: SchedulerConfig,
}

impl Settings {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Load `path` if it exists, otherwise fall back to built-in defaults.
    /// The flag reports whether the file was found.
    pub fn load_or_default(path: &str) -> Result<(Self, bool)> {
        if Path::new(path).exists() {
            Ok((Self::load(path)?, true))
        } else {
            Ok((Self::default(), false))
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content).context("Failed to parse TOML")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("scheduler.ip_update_at", &self.scheduler.ip_update_at),
            ("scheduler.chatgpt_refresh_at", &self.scheduler.chatgpt_refresh_at),
            ("scheduler.cleanup_at", &self.scheduler.cleanup_at),
        ] {
            parse_time_of_day(value).with_context(|| format!("{} = {:?}", field, value))?;
        }

        if self.scheduler.poll_interval_secs == 0 {
            bail!("scheduler.poll_interval_secs must be greater than zero");
        }
        if self.sync.timeout_secs == 0 {
            bail!("sync.timeout_secs must be greater than zero");
        }

        let mut seen = std::collections::HashSet::new();
        for source in &self.sync.sources {
            if !seen.insert(source.name.as_str()) {
                bail!("duplicate sync source name: {}", source.name);
            }
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_api: defaults::default_admin_api_config(),
            logging: defaults::default_logging_config(),
            storage: defaults::default_storage_config(),
            detection: defaults::default_detection_config(),
            sync: defaults::default_sync_config(),
            scrape: defaults::default_scrape_config(),
            scheduler: defaults::default_scheduler_config(),
        }
    }
}

/// Parse an `HH:MM` trigger time.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), TIME_OF_DAY_FORMAT)
        .with_context(|| format!("expected HH:MM, got {:?}", value))
}

/// Admin REST API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminApiConfig {
    #[serde(default = "defaults::default_admin_enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::default_admin_bind")]
    pub bind: String,

    #[serde(default = "defaults::default_api_key")]
    pub api_key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    pub level: String,

    #[serde(default = "defaults::default_log_file")]
    pub file: String,

    #[serde(default)]
    pub json: bool,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_sqlite_path")]
    pub sqlite_path: String,
}

/// Detection lookup behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Query the store on an index miss.
    #[serde(default = "defaults::default_store_fallback")]
    pub store_fallback: bool,

    /// Test IPs against indexed CIDR networks when no literal matches.
    #[serde(default)]
    pub match_networks: bool,
}

/// Address-list synchronization.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "defaults::default_sync_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::default_sync_user_agent")]
    pub user_agent: String,

    #[serde(default = "defaults::default_sync_sources")]
    pub sources: Vec<SourceConfig>,
}

/// One external address-list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    /// Bot name stamped on every record from this source. Derived from
    /// `name` when omitted.
    #[serde(default)]
    pub bot_name: Option<String>,
}

impl SourceConfig {
    pub fn effective_bot_name(&self) -> String {
        match &self.bot_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => derive_bot_name(&self.name),
        }
    }
}

/// `chatgpt_user` -> `Chatgpt User`, `openai_all` -> `OpenAI All`.
fn derive_bot_name(source_name: &str) -> String {
    source_name
        .split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            if word.eq_ignore_ascii_case("openai") {
                return "OpenAI".to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The crawlers-info page scraped for ChatGPT-User addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "defaults::default_scrape_url")]
    pub url: String,

    #[serde(default = "defaults::default_scrape_bot_name")]
    pub bot_name: String,

    #[serde(default = "defaults::default_scrape_start_marker")]
    pub start_marker: String,

    #[serde(default = "defaults::default_scrape_end_marker")]
    pub end_marker: String,
}

/// Daily job triggers, all in UTC.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "defaults::default_scheduler_enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "defaults::default_ip_update_at")]
    pub ip_update_at: String,

    #[serde(default = "defaults::default_chatgpt_refresh_at")]
    pub chatgpt_refresh_at: String,

    #[serde(default = "defaults::default_cleanup_at")]
    pub cleanup_at: String,

    #[serde(default = "defaults::default_log_retention_days")]
    pub log_retention_days: u32,
}
