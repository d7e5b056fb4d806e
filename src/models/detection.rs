use std::fmt;

use serde::{Deserialize, Serialize};

use super::address::SourceType;

/// Which signal(s) produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    None,
    UserAgent,
    IpAddress,
    Both,
}

impl DetectionMethod {
    pub fn is_bot(&self) -> bool {
        !matches!(self, DetectionMethod::None)
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMethod::None => write!(f, "none"),
            DetectionMethod::UserAgent => write!(f, "user_agent"),
            DetectionMethod::IpAddress => write!(f, "ip_address"),
            DetectionMethod::Both => write!(f, "both"),
        }
    }
}

/// Verdict for one visitor. Not persisted here; the caller decides what to
/// store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bot_category: Option<String>,
    /// Empty when nothing matched.
    pub bot_name: String,
    pub detection_method: DetectionMethod,
    /// Source type of the IP evidence, when the IP matched.
    pub ip_source_type: Option<SourceType>,
}

impl DetectionResult {
    pub fn human() -> Self {
        Self {
            bot_category: None,
            bot_name: String::new(),
            detection_method: DetectionMethod::None,
            ip_source_type: None,
        }
    }

    pub fn is_bot(&self) -> bool {
        self.detection_method.is_bot()
    }
}
