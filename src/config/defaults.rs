use super::settings::{
    AdminApiConfig, DetectionConfig, LoggingConfig, SchedulerConfig, ScrapeConfig, SourceConfig,
    StorageConfig, SyncConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_admin_api_config() -> AdminApiConfig {
    AdminApiConfig {
        enabled: default_admin_enabled(),
        bind: default_admin_bind(),
        api_key: default_api_key(),
    }
}

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file: default_log_file(),
        json: false,
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        sqlite_path: default_sqlite_path(),
    }
}

pub fn default_detection_config() -> DetectionConfig {
    DetectionConfig {
        store_fallback: default_store_fallback(),
        match_networks: false,
    }
}

pub fn default_sync_config() -> SyncConfig {
    SyncConfig {
        timeout_secs: default_sync_timeout(),
        user_agent: default_sync_user_agent(),
        sources: default_sync_sources(),
    }
}

pub fn default_scrape_config() -> ScrapeConfig {
    ScrapeConfig {
        url: default_scrape_url(),
        bot_name: default_scrape_bot_name(),
        start_marker: default_scrape_start_marker(),
        end_marker: default_scrape_end_marker(),
    }
}

pub fn default_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        enabled: default_scheduler_enabled(),
        poll_interval_secs: default_poll_interval(),
        ip_update_at: default_ip_update_at(),
        chatgpt_refresh_at: default_chatgpt_refresh_at(),
        cleanup_at: default_cleanup_at(),
        log_retention_days: default_log_retention_days(),
    }
}

// ---------------------------------------------------------------------------
// AdminApiConfig field defaults
// ---------------------------------------------------------------------------

pub fn default_admin_enabled() -> bool {
    true
}

pub fn default_admin_bind() -> String {
    "127.0.0.1:9090".to_string()
}

pub fn default_api_key() -> String {
    // Empty disables the admin API; main refuses to serve it unauthenticated.
    String::new()
}

// ---------------------------------------------------------------------------
// LoggingConfig / StorageConfig field defaults
// ---------------------------------------------------------------------------

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_file() -> String {
    "/var/log/botwatch/botwatch.log".to_string()
}

pub fn default_sqlite_path() -> String {
    "/var/lib/botwatch/botwatch.db".to_string()
}

// ---------------------------------------------------------------------------
// DetectionConfig field defaults
// ---------------------------------------------------------------------------

pub fn default_store_fallback() -> bool {
    true
}

// ---------------------------------------------------------------------------
// SyncConfig field defaults
// ---------------------------------------------------------------------------

pub fn default_sync_timeout() -> u64 {
    30
}

pub fn default_sync_user_agent() -> String {
    format!("botwatch/{}", env!("CARGO_PKG_VERSION"))
}

const OPENAI_RANGES_BASE: &str =
    "https://raw.githubusercontent.com/FabrizioCafolla/openai-crawlers-ip-ranges/main/openai";

pub fn default_sync_sources() -> Vec<SourceConfig> {
    [
        ("chatgpt_user", "openai-ip-ranges-chatgpt-user.txt", "ChatGPT User"),
        ("gptbot", "openai-ip-ranges-gptbot.txt", "GPTBot"),
        ("searchbot", "openai-ip-ranges-searchbot.txt", "OAI-SearchBot"),
        ("openai_all", "openai-ip-ranges-all.txt", "OpenAI"),
    ]
    .into_iter()
    .map(|(name, file, bot_name)| SourceConfig {
        name: name.to_string(),
        url: format!("{}/{}", OPENAI_RANGES_BASE, file),
        bot_name: Some(bot_name.to_string()),
    })
    .collect()
}

// ---------------------------------------------------------------------------
// ScrapeConfig field defaults
// ---------------------------------------------------------------------------

pub fn default_scrape_url() -> String {
    "https://crawlers-info.de/bots_info/973bdf5bbc8784a0b8204b9ca4aa5aae".to_string()
}

pub fn default_scrape_bot_name() -> String {
    "ChatGPT-User".to_string()
}

pub fn default_scrape_start_marker() -> String {
    "IP addresses:".to_string()
}

pub fn default_scrape_end_marker() -> String {
    "Countries:".to_string()
}

// ---------------------------------------------------------------------------
// SchedulerConfig field defaults
// ---------------------------------------------------------------------------

pub fn default_scheduler_enabled() -> bool {
    true
}

pub fn default_poll_interval() -> u64 {
    60
}

pub fn default_ip_update_at() -> String {
    "05:00".to_string()
}

pub fn default_chatgpt_refresh_at() -> String {
    "06:00".to_string()
}

pub fn default_cleanup_at() -> String {
    "02:00".to_string()
}

pub fn default_log_retention_days() -> u32 {
    30
}
