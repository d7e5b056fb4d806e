//! Daily trigger scheduler for the synchronization jobs.

pub mod jobs;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::settings::{parse_time_of_day, SchedulerConfig};
use crate::sync::synchronizer::Synchronizer;
pub use jobs::{JobKind, JobOutcome, JobState};

struct PollTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub registered_jobs: usize,
    pub scheduled_jobs: usize,
    pub poll_interval_secs: u64,
    pub jobs: Vec<JobState>,
}

/// Drives the synchronizer on fixed daily triggers (UTC).
///
/// A single background task wakes every `poll_interval` and runs the jobs
/// whose fire time has passed. Manual triggers run in the caller's task and
/// leave the schedule alone. Stopping only ends the polling loop: a job that
/// is already running finishes and records its outcome.
pub struct Scheduler {
    sync: Arc<Synchronizer>,
    jobs: Mutex<Vec<JobState>>,
    task: Mutex<Option<PollTask>>,
    poll_interval: Duration,
    retention_days: u32,
}

impl Scheduler {
    pub fn new(sync: Arc<Synchronizer>, config: &SchedulerConfig) -> Result<Self> {
        let jobs = vec![
            JobState::new(JobKind::IpUpdate, parse_time_of_day(&config.ip_update_at)?),
            JobState::new(
                JobKind::ChatgptRefresh,
                parse_time_of_day(&config.chatgpt_refresh_at)?,
            ),
            JobState::new(JobKind::Cleanup, parse_time_of_day(&config.cleanup_at)?),
        ];

        Ok(Self {
            sync,
            jobs: Mutex::new(jobs),
            task: Mutex::new(None),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            retention_days: config.log_retention_days,
        })
    }

    /// Start the polling task. Returns `false` if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            warn!("Scheduler already running");
            return false;
        }

        let now = Utc::now();
        for job in self.jobs.lock().iter_mut() {
            job.next_fire = Some(next_fire_after(job.fire_at, now));
        }

        let (shutdown, mut stopped) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stopped.changed() => break,
                }
                if *stopped.borrow() {
                    break;
                }
                // Not raced against shutdown: the loop exits only after this returns.
                this.run_due(Utc::now()).await;
            }
            debug!("Scheduler loop exited");
        });
        *task = Some(PollTask { handle, shutdown });

        info!(
            jobs = self.jobs.lock().len(),
            poll_secs = self.poll_interval.as_secs(),
            "Scheduler started"
        );
        true
    }

    /// Stop the polling task. Returns `false` if it was not running.
    ///
    /// Does not wait: a job in flight runs to completion in the background.
    pub fn stop(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            warn!("Scheduler is not running");
            return false;
        };
        // Err only if the loop already exited.
        let _ = task.shutdown.send(true);

        for job in self.jobs.lock().iter_mut() {
            job.next_fire = None;
        }
        info!("Scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.handle.is_finished())
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.is_running();
        let jobs = self.jobs.lock().clone();
        SchedulerStatus {
            running,
            registered_jobs: jobs.len(),
            scheduled_jobs: if running {
                jobs.iter().filter(|j| j.next_fire.is_some()).count()
            } else {
                0
            },
            poll_interval_secs: self.poll_interval.as_secs(),
            jobs,
        }
    }

    pub async fn trigger_update_all_now(&self) -> JobOutcome {
        self.trigger(JobKind::IpUpdate).await
    }

    pub async fn trigger_chatgpt_refresh_now(&self) -> JobOutcome {
        self.trigger(JobKind::ChatgptRefresh).await
    }

    pub async fn trigger_cleanup_now(&self) -> JobOutcome {
        self.trigger(JobKind::Cleanup).await
    }

    /// Run `kind` immediately. The job's next fire time is unchanged.
    pub async fn trigger(&self, kind: JobKind) -> JobOutcome {
        info!(job = kind.as_str(), "Manual job trigger");
        let outcome = self.run_job(kind).await;
        self.record(kind, Utc::now(), &outcome, None);
        outcome
    }

    /// Run every job whose fire time is at or before `now`, then move it to
    /// its next daily slot.
    async fn run_due(&self, now: DateTime<Utc>) {
        let due: Vec<JobKind> = self
            .jobs
            .lock()
            .iter()
            .filter(|j| j.next_fire.is_some_and(|at| at <= now))
            .map(|j| j.name)
            .collect();

        for kind in due {
            info!(job = kind.as_str(), "Scheduled job firing");
            let outcome = self.run_job(kind).await;
            let finished = Utc::now();
            let fire_at = self.jobs.lock().iter().find(|j| j.name == kind).map(|j| j.fire_at);
            let next = fire_at.map(|at| next_fire_after(at, finished.max(now)));
            self.record(kind, finished, &outcome, next);
        }
    }

    async fn run_job(&self, kind: JobKind) -> JobOutcome {
        let outcome = guarded(async {
            match kind {
                JobKind::IpUpdate => JobOutcome::from_batch(&self.sync.update_all().await),
                JobKind::ChatgptRefresh => JobOutcome::from_report(&self.sync.refresh_chatgpt().await),
                JobKind::Cleanup => match self.sync.cleanup_logs(self.retention_days) {
                    Ok(deleted) => JobOutcome::success(format!("{} log entries deleted", deleted)),
                    Err(e) => JobOutcome::error(e.to_string()),
                },
            }
        })
        .await;

        if outcome.is_success() {
            info!(job = kind.as_str(), result = outcome.message(), "Job finished");
        } else {
            error!(job = kind.as_str(), error = outcome.message(), "Job failed");
        }
        outcome
    }

    fn record(
        &self,
        kind: JobKind,
        at: DateTime<Utc>,
        outcome: &JobOutcome,
        next_fire: Option<DateTime<Utc>>,
    ) {
        let running = self.is_running();
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.iter_mut().find(|j| j.name == kind) {
            job.last_run = Some(at);
            job.last_outcome = Some(outcome.clone());
            if next_fire.is_some() && running {
                job.next_fire = next_fire;
            }
        }
    }

    #[cfg(test)]
    fn force_due(&self, at: DateTime<Utc>) {
        for job in self.jobs.lock().iter_mut() {
            job.next_fire = Some(at);
        }
    }
}

/// Await `fut`, turning a panic into an error outcome.
async fn guarded<F>(fut: F) -> JobOutcome
where
    F: Future<Output = JobOutcome>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => JobOutcome::error(format!("job panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// First instant strictly after `now` at `fire_at` UTC.
pub fn next_fire_after(fire_at: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive().and_time(fire_at).and_utc();
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::defaults;
    use crate::config::settings::{DetectionConfig, ScrapeConfig, SourceConfig, SyncConfig};
    use crate::detection::ip_index::IpRangeIndex;
    use crate::storage::testing::FlakyStore;
    use crate::storage::RangeStore;

    fn scheduler_with(sources: Vec<SourceConfig>) -> Arc<Scheduler> {
        scheduler_over(
            Arc::new(FlakyStore::new()),
            sources,
            1,
            defaults::default_scheduler_config(),
        )
    }

    fn scheduler_over(
        store: Arc<FlakyStore>,
        sources: Vec<SourceConfig>,
        timeout_secs: u64,
        config: SchedulerConfig,
    ) -> Arc<Scheduler> {
        let detection = DetectionConfig {
            store_fallback: false,
            match_networks: false,
        };
        let index = Arc::new(IpRangeIndex::init(store.clone(), &detection));
        let sync_config = SyncConfig {
            timeout_secs,
            user_agent: "botwatch-test".to_string(),
            sources,
        };
        let scrape = ScrapeConfig {
            url: "http://127.0.0.1:9/page".to_string(),
            ..defaults::default_scrape_config()
        };
        let sync = Arc::new(Synchronizer::new(store, index, &sync_config, &scrape).unwrap());
        Arc::new(Scheduler::new(sync, &config).unwrap())
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_next_fire_later_today() {
        let fire = NaiveTime::from_hms_opt(5, 0, 0).unwrap();
        assert_eq!(next_fire_after(fire, at(4, 59, 0)), at(5, 0, 0));
    }

    #[test]
    fn test_next_fire_rolls_to_tomorrow() {
        let fire = NaiveTime::from_hms_opt(5, 0, 0).unwrap();
        let tomorrow = Utc.with_ymd_and_hms(2026, 3, 15, 5, 0, 0).unwrap();
        assert_eq!(next_fire_after(fire, at(5, 0, 0)), tomorrow);
        assert_eq!(next_fire_after(fire, at(23, 30, 0)), tomorrow);
    }

    #[tokio::test]
    async fn test_double_start_keeps_scheduled_count() {
        let scheduler = scheduler_with(Vec::new());
        assert!(scheduler.start());
        let first = scheduler.status();
        assert!(!scheduler.start());
        let second = scheduler.status();

        assert!(second.running);
        assert_eq!(first.scheduled_jobs, 3);
        assert_eq!(second.scheduled_jobs, first.scheduled_jobs);
        assert_eq!(second.registered_jobs, 3);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let scheduler = scheduler_with(Vec::new());
        assert!(!scheduler.stop());
        scheduler.start();
        assert!(scheduler.stop());
        assert!(!scheduler.stop());

        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.scheduled_jobs, 0);
        assert_eq!(status.registered_jobs, 3);
        assert!(status.jobs.iter().all(|j| j.next_fire.is_none()));
    }

    #[tokio::test]
    async fn test_manual_trigger_records_outcome_without_rescheduling() {
        let scheduler = scheduler_with(Vec::new());
        scheduler.start();
        let before = scheduler.status();

        let outcome = scheduler.trigger_cleanup_now().await;
        assert!(outcome.is_success());

        let after = scheduler.status();
        let cleanup = after.jobs.iter().find(|j| j.name == JobKind::Cleanup).unwrap();
        assert!(cleanup.last_run.is_some());
        assert_eq!(cleanup.last_outcome.as_ref(), Some(&outcome));
        let before_cleanup = before.jobs.iter().find(|j| j.name == JobKind::Cleanup).unwrap();
        assert_eq!(cleanup.next_fire, before_cleanup.next_fire);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_failed_source_surfaces_in_outcome() {
        let scheduler = scheduler_with(vec![SourceConfig {
            name: "unreachable".to_string(),
            url: "http://127.0.0.1:9/list".to_string(),
            bot_name: Some("GPTBot".to_string()),
        }]);

        match scheduler.trigger_update_all_now().await {
            JobOutcome::Error { message } => assert!(message.contains("unreachable")),
            other => panic!("expected error, got {other:?}"),
        }

        let refresh = scheduler.trigger_chatgpt_refresh_now().await;
        assert!(!refresh.is_success());
    }

    #[tokio::test]
    async fn test_due_jobs_run_and_move_to_next_day() {
        let scheduler = scheduler_with(Vec::new());
        scheduler.start();
        let now = Utc::now();
        scheduler.force_due(now - TimeDelta::minutes(1));

        scheduler.run_due(now).await;

        let status = scheduler.status();
        assert_eq!(status.scheduled_jobs, 3);
        for job in &status.jobs {
            assert!(job.last_run.is_some(), "{} did not run", job.name.as_str());
            assert!(job.next_fire.unwrap() > now);
        }
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_stop_lets_running_job_finish() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let signal = entered.clone();
        let app = axum::Router::new().route(
            "/list",
            axum::routing::get(move || {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    "20.0.53.96\n"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = Arc::new(FlakyStore::new());
        let scheduler = scheduler_over(
            store.clone(),
            vec![SourceConfig {
                name: "gptbot".to_string(),
                url: format!("http://{addr}/list"),
                bot_name: Some("GPTBot".to_string()),
            }],
            5,
            SchedulerConfig {
                poll_interval_secs: 1,
                ..defaults::default_scheduler_config()
            },
        );

        scheduler.start();
        scheduler.force_due(Utc::now() - TimeDelta::minutes(1));
        tokio::time::timeout(Duration::from_secs(5), entered.notified())
            .await
            .expect("scheduled update never reached the source");
        assert!(scheduler.stop());

        let finished = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = scheduler.status();
                let job = status.jobs.iter().find(|j| j.name == JobKind::IpUpdate).unwrap();
                if let Some(outcome) = job.last_outcome.clone() {
                    return (outcome, job.next_fire);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("job in flight was cancelled by stop");

        assert!(finished.0.is_success());
        assert_eq!(finished.1, None);
        assert!(!scheduler.status().running);

        let logs: Vec<_> = store
            .inner
            .recent_logs(10)
            .unwrap()
            .into_iter()
            .filter(|l| l.bot_name == "GPTBot")
            .collect();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].changes_count, 1);
    }

    async fn explode() -> JobOutcome {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicking_job_becomes_error_outcome() {
        let outcome = guarded(explode()).await;
        assert_eq!(outcome, JobOutcome::error("job panicked: boom"));
    }
}
