//! Worker - runs every job on its cadence until stopped
//!
//! One task per job. Runs of the same job never overlap; ticks missed while a
//! run is in progress are skipped. A failing or panicking run is logged and
//! counted, and the job keeps its schedule.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cadence::Cadence;
use crate::error::{Result, WorkerError};
use crate::job::{Job, JobStats};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

// tokio intervals reject a zero period
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Worker<C: Send + Sync + 'static> {
    container: Arc<C>,
    jobs: Vec<Arc<dyn Job<C>>>,
    stats: Vec<Arc<JobStats>>,
    state: Mutex<WorkerState>,
    loops: Mutex<Vec<(String, JoinHandle<()>)>>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_grace: Duration,
}

impl<C: Send + Sync + 'static> Worker<C> {
    /// The job set is fixed for the lifetime of the worker
    pub fn new(container: Arc<C>, jobs: Vec<Arc<dyn Job<C>>>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let stats = jobs.iter().map(|_| Arc::new(JobStats::default())).collect();
        Self {
            container,
            jobs,
            stats,
            state: Mutex::new(WorkerState::Idle),
            loops: Mutex::new(Vec::new()),
            shutdown_tx,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn jobs_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|job| job.name().to_string()).collect()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// Spawn one loop per job. Only valid from `Idle`.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != WorkerState::Idle {
            return Err(WorkerError::InvalidState {
                action: "start",
                state: *state,
            });
        }

        let mut loops = self.loops.lock();
        for (job, stats) in self.jobs.iter().zip(&self.stats) {
            info!(job = %job.name(), cadence = %job.cadence(), "Scheduling job");
            let handle = tokio::spawn(run_loop(
                job.clone(),
                self.container.clone(),
                stats.clone(),
                self.shutdown_tx.subscribe(),
            ));
            loops.push((job.name().to_string(), handle));
        }

        *state = WorkerState::Running;
        info!(jobs = self.jobs.len(), "Worker started");
        Ok(())
    }

    /// Signal every loop, wait for in-flight runs up to the grace period,
    /// then abort what is left. Safe to call in any state.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, WorkerState::Stopped)
        };
        if previous != WorkerState::Running {
            return;
        }

        let _ = self.shutdown_tx.send(());

        let loops: Vec<(String, JoinHandle<()>)> = std::mem::take(&mut *self.loops.lock());
        let deadline = Instant::now() + self.shutdown_grace;
        for (name, mut handle) in loops {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(job = %name, "Job did not finish within the grace period, aborting");
                handle.abort();
            }
        }

        info!("Worker stopped");
    }

    /// Per-job counters, in registration order
    pub fn stats(&self) -> Vec<(String, Arc<JobStats>)> {
        self.jobs
            .iter()
            .zip(&self.stats)
            .map(|(job, stats)| (job.name().to_string(), stats.clone()))
            .collect()
    }

    pub fn job_stats(&self, name: &str) -> Option<Arc<JobStats>> {
        self.jobs
            .iter()
            .position(|job| job.name() == name)
            .map(|i| self.stats[i].clone())
    }
}

enum Ticker {
    Interval(tokio::time::Interval),
    Cron {
        cadence: Cadence,
        last_fired: Option<DateTime<Utc>>,
    },
}

/// Next cron fire time, never at or before the previous one even when the
/// wall clock lags the monotonic timer used to sleep
fn next_cron_fire(
    cadence: &Cadence,
    now: DateTime<Utc>,
    last_fired: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let from = last_fired.map_or(now, |last| now.max(last));
    cadence.next_after(from)
}

impl Ticker {
    fn new(cadence: &Cadence) -> Self {
        match cadence {
            Cadence::Every(period) => {
                let period = (*period).max(MIN_PERIOD);
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Ticker::Interval(interval)
            }
            Cadence::Cron(_) => Ticker::Cron {
                cadence: cadence.clone(),
                last_fired: None,
            },
        }
    }

    /// Wait for the next fire time; `false` when there is none
    async fn tick(&mut self) -> bool {
        match self {
            Ticker::Interval(interval) => {
                interval.tick().await;
                true
            }
            Ticker::Cron { cadence, last_fired } => {
                let now = Utc::now();
                let Some(next) = next_cron_fire(cadence, now, *last_fired) else {
                    return false;
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                *last_fired = Some(next);
                true
            }
        }
    }
}

async fn run_loop<C>(
    job: Arc<dyn Job<C>>,
    container: Arc<C>,
    stats: Arc<JobStats>,
    mut shutdown: broadcast::Receiver<()>,
) where
    C: Send + Sync + 'static,
{
    let mut ticker = Ticker::new(job.cadence());

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!(job = %job.name(), "Job loop shutting down");
                break;
            }
            fired = ticker.tick() => {
                if !fired {
                    warn!(job = %job.name(), "Schedule has no upcoming occurrence, job loop ending");
                    break;
                }
            }
        }

        run_once(job.as_ref(), container.as_ref(), &stats).await;
    }
}

async fn run_once<C>(job: &dyn Job<C>, container: &C, stats: &JobStats)
where
    C: Send + Sync + 'static,
{
    let started_at = Utc::now();
    let timer = Instant::now();
    debug!(job = %job.name(), "Job run starting");

    let error = match AssertUnwindSafe(job.run(container)).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{:#}", e)),
        Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
    };

    let elapsed = timer.elapsed();
    let outcome = if error.is_some() { "failure" } else { "success" };
    metrics::counter!("ub_worker_job_runs_total", "job" => job.name().to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!("ub_worker_job_duration_seconds", "job" => job.name().to_string())
        .record(elapsed.as_secs_f64());

    match &error {
        None => info!(job = %job.name(), duration_ms = elapsed.as_millis() as u64, "Job run completed"),
        Some(e) => error!(job = %job.name(), duration_ms = elapsed.as_millis() as u64, error = %e, "Job run failed"),
    }

    stats.record(started_at, error);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cron_does_not_refire_when_clock_lags() {
        let cadence = Cadence::cron("*/10 * * * * *").unwrap();
        let fired = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 10).unwrap();
        let lagging = fired - chrono::Duration::milliseconds(200);

        assert_eq!(cadence.next_after(lagging), Some(fired));
        assert_eq!(
            next_cron_fire(&cadence, lagging, Some(fired)),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 20).unwrap())
        );
    }

    #[test]
    fn test_cron_first_fire_uses_now() {
        let cadence = Cadence::cron("*/10 * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 3).unwrap();
        assert_eq!(
            next_cron_fire(&cadence, now, None),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 10).unwrap())
        );
    }
}
