use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;

use crate::sync::{BatchReport, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    IpUpdate,
    #[serde(rename = "chatgpt_ip_update")]
    ChatgptRefresh,
    Cleanup,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::IpUpdate => "ip_update",
            JobKind::ChatgptRefresh => "chatgpt_ip_update",
            JobKind::Cleanup => "cleanup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success { message: String },
    Error { message: String },
}

impl JobOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        JobOutcome::Success {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        JobOutcome::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            JobOutcome::Success { message } | JobOutcome::Error { message } => message,
        }
    }

    /// Any failed source makes the batch an error; the message names each
    /// failure.
    pub fn from_batch(batch: &BatchReport) -> Self {
        if batch.failed == 0 {
            return JobOutcome::success(format!(
                "{}/{} sources updated",
                batch.successful, batch.total
            ));
        }

        let failures: Vec<String> = batch
            .sources
            .iter()
            .filter(|r| !r.success)
            .map(|r| format!("{}: {}", r.source, r.error.as_deref().unwrap_or("unknown error")))
            .collect();
        JobOutcome::error(format!(
            "{}/{} sources failed ({})",
            batch.failed,
            batch.total,
            failures.join("; ")
        ))
    }

    pub fn from_report(report: &SyncReport) -> Self {
        if report.success {
            let mut message = format!("{} added, {} deactivated", report.added, report.deactivated);
            if let Some(notice) = &report.notice {
                message.push_str(&format!(" ({})", notice));
            }
            JobOutcome::success(message)
        } else {
            JobOutcome::error(format!(
                "{}: {}",
                report.source,
                report.error.as_deref().unwrap_or("unknown error")
            ))
        }
    }
}

/// One registered job and its run history.
#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub name: JobKind,
    /// Daily trigger time, UTC.
    pub fire_at: NaiveTime,
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<JobOutcome>,
    /// `None` while the scheduler is stopped.
    pub next_fire: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn new(name: JobKind, fire_at: NaiveTime) -> Self {
        Self {
            name,
            fire_at,
            last_run: None,
            last_outcome: None,
            next_fire: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(source: &str, success: bool, error: Option<&str>) -> SyncReport {
        SyncReport {
            source: source.to_string(),
            bot_name: "GPTBot".to_string(),
            source_url: "http://127.0.0.1/list".to_string(),
            success,
            fetched: 2,
            added: if success { 2 } else { 0 },
            deactivated: 0,
            invalid: 0,
            duration_ms: 5,
            error: error.map(str::to_string),
            notice: None,
            logged: true,
        }
    }

    #[test]
    fn test_batch_outcome_names_failed_sources() {
        let batch = BatchReport::from_reports(
            vec![
                report("gptbot", true, None),
                report("searchbot", false, Some("HTTP 502 from http://127.0.0.1/list")),
            ],
            true,
        );
        let outcome = JobOutcome::from_batch(&batch);
        assert!(!outcome.is_success());
        assert_eq!(
            outcome.message(),
            "1/2 sources failed (searchbot: HTTP 502 from http://127.0.0.1/list)"
        );
    }

    #[test]
    fn test_clean_batch_is_success() {
        let batch = BatchReport::from_reports(vec![report("gptbot", true, None)], true);
        assert_eq!(JobOutcome::from_batch(&batch), JobOutcome::success("1/1 sources updated"));
    }

    #[test]
    fn test_report_outcome_includes_notice() {
        let mut r = report("crawlers_info", true, None);
        r.added = 0;
        r.notice = Some("'IP addresses:' section not found".to_string());
        assert_eq!(
            JobOutcome::from_report(&r).message(),
            "0 added, 0 deactivated ('IP addresses:' section not found)"
        );
    }

    #[test]
    fn test_job_names() {
        assert_eq!(JobKind::IpUpdate.as_str(), "ip_update");
        assert_eq!(JobKind::ChatgptRefresh.as_str(), "chatgpt_ip_update");
        assert_eq!(
            serde_json::to_value(JobKind::ChatgptRefresh).unwrap(),
            serde_json::json!("chatgpt_ip_update")
        );
    }
}
