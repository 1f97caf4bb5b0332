//! Recurring jobs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use ub_config::WorkerConfig;
use ub_worker::{Cadence, Job};

use crate::container::Container;
use crate::error::Result;

/// Publishes a fetch request on a cron schedule
pub struct UserSyncJob {
    cadence: Cadence,
}

impl UserSyncJob {
    pub fn new(cadence: Cadence) -> Self {
        Self { cadence }
    }
}

#[async_trait]
impl Job<Container> for UserSyncJob {
    fn name(&self) -> &str {
        "user-sync"
    }

    fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    async fn run(&self, container: &Container) -> anyhow::Result<()> {
        container.user_service.request_fetch(self.name()).await?;
        Ok(())
    }
}

/// Logs how many users are stored
pub struct UserReportJob {
    cadence: Cadence,
}

impl UserReportJob {
    pub fn new(cadence: Cadence) -> Self {
        Self { cadence }
    }
}

#[async_trait]
impl Job<Container> for UserReportJob {
    fn name(&self) -> &str {
        "user-report"
    }

    fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    async fn run(&self, container: &Container) -> anyhow::Result<()> {
        let users = container.user_service.count().await?;
        info!(users, "User report");
        Ok(())
    }
}

/// Jobs enabled by configuration
pub fn build_jobs(config: &WorkerConfig) -> Result<Vec<Arc<dyn Job<Container>>>> {
    let mut jobs: Vec<Arc<dyn Job<Container>>> = Vec::new();

    if config.user_sync_enabled {
        jobs.push(Arc::new(UserSyncJob::new(Cadence::cron(&config.user_sync_cron)?)));
    }
    if config.user_report_enabled {
        jobs.push(Arc::new(UserReportJob::new(Cadence::every(Duration::from_secs(
            config.user_report_interval_secs,
        )))));
    }

    Ok(jobs)
}
