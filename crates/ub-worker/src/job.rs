use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cadence::Cadence;

/// A recurring background task.
///
/// `C` is the application container handed to every run.
#[async_trait]
pub trait Job<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    fn name(&self) -> &str;

    fn cadence(&self) -> &Cadence;

    async fn run(&self, container: &C) -> anyhow::Result<()>;
}

/// Run counters for a single job
#[derive(Debug, Default)]
pub struct JobStats {
    runs: AtomicU64,
    failures: AtomicU64,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl JobStats {
    /// Completed runs, failed ones included
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        *self.last_run_at.lock()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub(crate) fn record(&self, started_at: DateTime<Utc>, error: Option<String>) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        *self.last_run_at.lock() = Some(started_at);
        if let Some(error) = error {
            self.failures.fetch_add(1, Ordering::Relaxed);
            *self.last_error.lock() = Some(error);
        }
    }
}
