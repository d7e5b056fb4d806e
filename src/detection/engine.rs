use std::sync::Arc;

use tracing::debug;

use super::ip_index::{IpMatch, IpRangeIndex};
use super::patterns::PatternCatalog;
use crate::models::detection::{DetectionMethod, DetectionResult};

/// Category reported when only the IP signal fired.
pub const IP_ONLY_CATEGORY: &str = "IP Detected";

/// Combines the User-Agent catalog and the IP index into one verdict.
#[derive(Clone)]
pub struct DetectionEngine {
    catalog: Arc<PatternCatalog>,
    index: Arc<IpRangeIndex>,
}

impl DetectionEngine {
    pub fn new(catalog: Arc<PatternCatalog>, index: Arc<IpRangeIndex>) -> Self {
        Self { catalog, index }
    }

    /// Classify a visitor. The User-Agent decides category and name whenever
    /// it matches; the IP alone only contributes an `IP_` prefixed name.
    pub fn detect(&self, user_agent: &str, ip_address: &str) -> DetectionResult {
        let ua_hit = self.catalog.match_user_agent(user_agent);
        let ip_hit = self.index.query(ip_address);

        let result = combine(ua_hit.map(|m| (m.category, m.bot_name())), ip_hit);
        if result.is_bot() {
            debug!(
                method = %result.detection_method,
                bot = %result.bot_name,
                ip = ip_address,
                "AI crawler detected"
            );
        }
        result
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }
}

fn combine(ua: Option<(&'static str, String)>, ip: IpMatch) -> DetectionResult {
    let ip_source_type = if ip.is_match { ip.source_type } else { None };

    match (ua, ip.is_match) {
        (Some((category, name)), true) => DetectionResult {
            bot_category: Some(category.to_string()),
            bot_name: name,
            detection_method: DetectionMethod::Both,
            ip_source_type,
        },
        (Some((category, name)), false) => DetectionResult {
            bot_category: Some(category.to_string()),
            bot_name: name,
            detection_method: DetectionMethod::UserAgent,
            ip_source_type: None,
        },
        (None, true) => DetectionResult {
            bot_category: Some(IP_ONLY_CATEGORY.to_string()),
            bot_name: format!("IP_{}", ip.bot_name.unwrap_or_default()),
            detection_method: DetectionMethod::IpAddress,
            ip_source_type,
        },
        (None, false) => DetectionResult::human(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::DetectionConfig;
    use crate::models::address::{NewAddress, SourceType};
    use crate::storage::testing::FlakyStore;
    use crate::storage::RangeStore;

    const BROWSER_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:126.0) Gecko/20100101 Firefox/126.0";

    fn engine_with(bot: &str, addresses: &[&str]) -> DetectionEngine {
        let store = Arc::new(FlakyStore::new());
        let additions: Vec<NewAddress> = addresses
            .iter()
            .map(|a| NewAddress {
                address: a.to_string(),
                source_type: SourceType::DirectIp,
                range_start: None,
                range_end: None,
            })
            .collect();
        store.inner.apply_changes(bot, None, &additions, &[]).unwrap();

        let config = DetectionConfig {
            store_fallback: false,
            match_networks: false,
        };
        let index = Arc::new(IpRangeIndex::init(store, &config));
        DetectionEngine::new(Arc::new(PatternCatalog::new().unwrap()), index)
    }

    #[test]
    fn test_both_signals_use_user_agent_identity() {
        let engine = engine_with("GPTBot", &["20.171.206.7"]);
        let result = engine.detect("Mozilla/5.0 (compatible; ClaudeBot/1.0)", "20.171.206.7");
        assert_eq!(result.detection_method, DetectionMethod::Both);
        assert_eq!(result.bot_category.as_deref(), Some("Claude"));
        assert_eq!(result.bot_name, "ClaudeBot");
        assert_eq!(result.ip_source_type, Some(SourceType::DirectIp));
    }

    #[test]
    fn test_user_agent_only() {
        let engine = engine_with("GPTBot", &["20.171.206.7"]);
        let result = engine.detect("PerplexityBot/1.0", "8.8.8.8");
        assert_eq!(result.detection_method, DetectionMethod::UserAgent);
        assert_eq!(result.bot_category.as_deref(), Some("Perplexity"));
        assert_eq!(result.bot_name, "PerplexityBot");
        assert_eq!(result.ip_source_type, None);
    }

    #[test]
    fn test_ip_only_gets_prefixed_family_name() {
        let engine = engine_with("GPTBot", &["20.171.206.7"]);
        let result = engine.detect(BROWSER_UA, "20.171.206.7");
        assert_eq!(result.detection_method, DetectionMethod::IpAddress);
        assert_eq!(result.bot_category.as_deref(), Some(IP_ONLY_CATEGORY));
        assert_eq!(result.bot_name, "IP_GPTBot");
    }

    #[test]
    fn test_neither_signal_is_human() {
        let engine = engine_with("GPTBot", &["20.171.206.7"]);
        assert_eq!(engine.detect(BROWSER_UA, "8.8.8.8"), DetectionResult::human());
        assert_eq!(engine.detect("", ""), DetectionResult::human());
    }

    #[test]
    fn test_detection_survives_store_outage() {
        let store = Arc::new(FlakyStore::new());
        store.fail_reads.store(true, std::sync::atomic::Ordering::SeqCst);
        let config = DetectionConfig {
            store_fallback: true,
            match_networks: false,
        };
        let index = Arc::new(IpRangeIndex::init(store, &config));
        let engine = DetectionEngine::new(Arc::new(PatternCatalog::new().unwrap()), index);

        let result = engine.detect("GPTBot/1.1", "1.2.3.4");
        assert_eq!(result.detection_method, DetectionMethod::UserAgent);
        assert_eq!(engine.detect(BROWSER_UA, "1.2.3.4"), DetectionResult::human());
    }
}
