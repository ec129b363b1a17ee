use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

/// A named recurring task
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique name within a registry
    fn name(&self) -> &str;

    /// Cron expression or `@every <n><ms|s|m|h>`
    fn schedule(&self) -> &str;

    async fn execute(&self) -> Result<()>;
}

/// Parsed schedule expression
#[derive(Debug, Clone)]
pub enum Schedule {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Accepts 5-field cron (seconds pinned to 0), 6/7-field cron, cron
    /// shorthands such as `@daily`, and `@every 30s`
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();

        if let Some(rest) = expr.strip_prefix("@every") {
            return Ok(Schedule::Every(parse_interval(rest.trim())?));
        }

        let full = if expr.split_whitespace().count() == 5 {
            format!("0 {}", expr)
        } else {
            expr.to_string()
        };
        let schedule = cron::Schedule::from_str(&full).map_err(|e| anyhow!("invalid schedule '{}': {}", expr, e))?;
        Ok(Schedule::Cron(Box::new(schedule)))
    }

    /// Wait from `now` until the next firing
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Schedule::Every(period) => Some(*period),
            Schedule::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                (next - now).to_std().ok()
            }
        }
    }
}

fn parse_interval(spec: &str) -> Result<Duration> {
    let split = spec.find(|c: char| !c.is_ascii_digit()).unwrap_or(spec.len());
    let (amount, unit) = spec.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| anyhow!("invalid interval '{}': expected <n><ms|s|m|h>", spec))?;
    if amount == 0 {
        bail!("interval '{}' must be positive", spec);
    }

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount * 60),
        "h" => Duration::from_secs(amount * 3_600),
        other => bail!("unknown interval unit '{}' in '{}'", other, spec),
    };
    Ok(duration)
}

/// Snapshot of a job's execution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Firings that executed the body
    pub runs: u64,
    /// Firings dropped because the previous run was still in flight
    pub skips: u64,
    pub failures: u64,
    pub last_duration_ms: u64,
}

#[derive(Default)]
struct JobCounters {
    runs: AtomicU64,
    skips: AtomicU64,
    failures: AtomicU64,
    last_duration_ms: AtomicU64,
}

struct JobInner {
    job: Arc<dyn Job>,
    is_running: AtomicBool,
    counters: JobCounters,
}

/// Clears the running flag however the body exits
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl JobInner {
    /// Run wrapper: skip if a previous run is in flight, otherwise execute and time it
    async fn fire(self: Arc<Self>) -> bool {
        let name = self.job.name();
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.counters.skips.fetch_add(1, Ordering::SeqCst);
            warn!("Job '{}' is still running, skipping this firing", name);
            return false;
        }
        let _guard = RunningGuard(&self.is_running);

        self.counters.runs.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let result = self.job.execute().await;
        let elapsed = started.elapsed().as_millis() as u64;
        self.counters.last_duration_ms.store(elapsed, Ordering::SeqCst);

        match result {
            Ok(()) => info!("Job '{}' completed in {}ms", name, elapsed),
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::SeqCst);
                error!("Job '{}' failed after {}ms: {:#}", name, elapsed, e);
            }
        }
        true
    }
}

/// A job bound to its parsed schedule and ticker task
pub struct ScheduledJob {
    inner: Arc<JobInner>,
    schedule: Schedule,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledJob {
    pub fn new(job: Arc<dyn Job>) -> Result<Self> {
        let schedule = Schedule::parse(job.schedule()).map_err(|e| anyhow!("job '{}': {}", job.name(), e))?;
        Ok(Self {
            inner: Arc::new(JobInner {
                job,
                is_running: AtomicBool::new(false),
                counters: JobCounters::default(),
            }),
            schedule,
            ticker: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.job.name()
    }

    pub fn cron_expression(&self) -> &str {
        self.inner.job.schedule()
    }

    /// A body is in flight right now
    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    pub async fn is_started(&self) -> bool {
        self.ticker.lock().await.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Begin firing on schedule; no-op when already started
    pub async fn start(&self) {
        let mut ticker = self.ticker.lock().await;
        if ticker.as_ref().map_or(false, |h| !h.is_finished()) {
            debug!("Job '{}' already started", self.name());
            return;
        }

        let inner = Arc::clone(&self.inner);
        let schedule = self.schedule.clone();
        *ticker = Some(tokio::spawn(async move {
            match &schedule {
                Schedule::Every(period) => {
                    let period = *period;
                    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        interval.tick().await;
                        tokio::spawn(Arc::clone(&inner).fire());
                    }
                }
                Schedule::Cron(_) => loop {
                    let Some(delay) = schedule.next_delay(Utc::now()) else {
                        warn!("Job '{}' has no upcoming firing, ticker exiting", inner.job.name());
                        break;
                    };
                    tokio::time::sleep(delay).await;
                    tokio::spawn(Arc::clone(&inner).fire());
                },
            }
        }));

        info!("Started job '{}' ({})", self.name(), self.cron_expression());
    }

    /// Cancel future firings; an in-flight run finishes on its own
    pub async fn stop(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
            info!("Stopped job '{}'", self.name());
        }
    }

    /// Fire once now through the run wrapper; false when skipped
    pub async fn run_now(&self) -> bool {
        Arc::clone(&self.inner).fire().await
    }

    pub fn stats(&self) -> JobStats {
        let c = &self.inner.counters;
        JobStats {
            runs: c.runs.load(Ordering::SeqCst),
            skips: c.skips.load(Ordering::SeqCst),
            failures: c.failures.load(Ordering::SeqCst),
            last_duration_ms: c.last_duration_ms.load(Ordering::SeqCst),
        }
    }
}

/// Ordered registry of named jobs, passed around explicitly
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<Vec<ScheduledJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and start a job, replacing (and stopping) any job with the same name
    pub async fn add_job(&self, job: Arc<dyn Job>) -> Result<()> {
        let scheduled = ScheduledJob::new(job)?;
        let mut jobs = self.jobs.write().await;

        if let Some(existing) = jobs.iter_mut().find(|j| j.name() == scheduled.name()) {
            existing.stop().await;
            *existing = scheduled;
            existing.start().await;
            info!("Replaced job '{}'", existing.name());
        } else {
            scheduled.start().await;
            jobs.push(scheduled);
        }
        Ok(())
    }

    /// Stop and evict by name; returns whether a job existed
    pub async fn remove_job(&self, name: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(position) = jobs.iter().position(|j| j.name() == name) else {
            return false;
        };
        let job = jobs.remove(position);
        job.stop().await;
        true
    }

    pub async fn start_all(&self) {
        for job in self.jobs.read().await.iter() {
            job.start().await;
        }
    }

    pub async fn stop_all(&self) {
        for job in self.jobs.read().await.iter() {
            job.stop().await;
        }
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.jobs.read().await.iter().any(|j| j.name() == name)
    }

    pub async fn job_names(&self) -> Vec<String> {
        self.jobs.read().await.iter().map(|j| j.name().to_string()).collect()
    }

    pub async fn stats(&self, name: &str) -> Option<JobStats> {
        self.jobs.read().await.iter().find(|j| j.name() == name).map(|j| j.stats())
    }

    pub async fn run_now(&self, name: &str) -> Option<bool> {
        let jobs = self.jobs.read().await;
        let job = jobs.iter().find(|j| j.name() == name)?;
        Some(job.run_now().await)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}
