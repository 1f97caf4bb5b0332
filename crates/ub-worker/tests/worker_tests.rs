use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ub_worker::{Cadence, Job, Worker, WorkerError, WorkerState};

#[derive(Default)]
struct Container {
    hits: AtomicUsize,
}

struct CountingJob {
    cadence: Cadence,
}

#[async_trait]
impl Job<Container> for CountingJob {
    fn name(&self) -> &str {
        "counting"
    }

    fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    async fn run(&self, container: &Container) -> anyhow::Result<()> {
        container.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingJob {
    cadence: Cadence,
}

#[async_trait]
impl Job<Container> for FailingJob {
    fn name(&self) -> &str {
        "failing"
    }

    fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    async fn run(&self, _container: &Container) -> anyhow::Result<()> {
        anyhow::bail!("upstream unavailable")
    }
}

struct PanickingJob {
    cadence: Cadence,
}

#[async_trait]
impl Job<Container> for PanickingJob {
    fn name(&self) -> &str {
        "panicking"
    }

    fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    async fn run(&self, _container: &Container) -> anyhow::Result<()> {
        panic!("job exploded");
    }
}

struct SlowJob {
    cadence: Cadence,
    duration: Duration,
    started: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl Job<Container> for SlowJob {
    fn name(&self) -> &str {
        "slow"
    }

    fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    async fn run(&self, _container: &Container) -> anyhow::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn every(ms: u64) -> Cadence {
    Cadence::every(Duration::from_millis(ms))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_jobs_count_stable_across_states() {
    let worker = Worker::new(
        Arc::new(Container::default()),
        vec![
            Arc::new(CountingJob { cadence: every(20) }) as Arc<dyn Job<Container>>,
            Arc::new(FailingJob { cadence: every(20) }),
        ],
    );

    assert_eq!(worker.state(), WorkerState::Idle);
    assert_eq!(worker.jobs_count(), 2);

    worker.start().unwrap();
    assert_eq!(worker.state(), WorkerState::Running);
    assert_eq!(worker.jobs_count(), 2);

    worker.stop().await;
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(worker.jobs_count(), 2);
    assert_eq!(worker.job_names(), vec!["counting".to_string(), "failing".to_string()]);
}

#[tokio::test]
async fn test_start_only_from_idle() {
    let worker = Worker::new(Arc::new(Container::default()), Vec::new());

    worker.start().unwrap();
    let err = worker.start().unwrap_err();
    assert_eq!(
        err,
        WorkerError::InvalidState {
            action: "start",
            state: WorkerState::Running
        }
    );

    worker.stop().await;
    assert!(matches!(
        worker.start(),
        Err(WorkerError::InvalidState { state: WorkerState::Stopped, .. })
    ));
}

#[tokio::test]
async fn test_failing_jobs_do_not_stop_the_worker() {
    let container = Arc::new(Container::default());
    let worker = Worker::new(
        container.clone(),
        vec![
            Arc::new(FailingJob { cadence: every(15) }) as Arc<dyn Job<Container>>,
            Arc::new(PanickingJob { cadence: every(15) }),
            Arc::new(CountingJob { cadence: every(15) }),
        ],
    );
    worker.start().unwrap();

    let failing = worker.job_stats("failing").unwrap();
    let panicking = worker.job_stats("panicking").unwrap();
    wait_until(|| {
        container.hits.load(Ordering::SeqCst) >= 3 && failing.failures() >= 3 && panicking.failures() >= 3
    })
    .await;

    assert_eq!(worker.state(), WorkerState::Running);
    assert_eq!(failing.runs(), failing.failures());
    assert!(failing.last_error().unwrap().contains("upstream unavailable"));
    assert!(panicking.last_error().unwrap().contains("job exploded"));
    assert_eq!(worker.job_stats("counting").unwrap().failures(), 0);

    worker.stop().await;
}

#[tokio::test]
async fn test_interval_job_waits_one_period_before_first_run() {
    let container = Arc::new(Container::default());
    let worker = Worker::new(
        container.clone(),
        vec![Arc::new(CountingJob { cadence: every(400) }) as Arc<dyn Job<Container>>],
    );
    worker.start().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(container.hits.load(Ordering::SeqCst), 0);

    wait_until(|| container.hits.load(Ordering::SeqCst) >= 1).await;
    assert!(worker.job_stats("counting").unwrap().last_run_at().is_some());
    worker.stop().await;
}

#[tokio::test]
async fn test_cron_job_fires() {
    let container = Arc::new(Container::default());
    let worker = Worker::new(
        container.clone(),
        vec![Arc::new(CountingJob {
            cadence: Cadence::cron("* * * * * *").unwrap(),
        }) as Arc<dyn Job<Container>>],
    );
    worker.start().unwrap();

    wait_until(|| container.hits.load(Ordering::SeqCst) >= 1).await;
    worker.stop().await;
}

#[tokio::test]
async fn test_stop_lets_in_flight_run_finish() {
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let worker = Worker::new(
        Arc::new(Container::default()),
        vec![Arc::new(SlowJob {
            cadence: every(10),
            duration: Duration::from_millis(200),
            started: started.clone(),
            finished: finished.clone(),
        }) as Arc<dyn Job<Container>>],
    )
    .with_shutdown_grace(Duration::from_secs(5));
    worker.start().unwrap();

    wait_until(|| started.load(Ordering::SeqCst)).await;
    worker.stop().await;

    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stop_aborts_after_grace_period() {
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let worker = Worker::new(
        Arc::new(Container::default()),
        vec![Arc::new(SlowJob {
            cadence: every(10),
            duration: Duration::from_secs(30),
            started: started.clone(),
            finished: finished.clone(),
        }) as Arc<dyn Job<Container>>],
    )
    .with_shutdown_grace(Duration::from_millis(50));
    worker.start().unwrap();

    wait_until(|| started.load(Ordering::SeqCst)).await;
    tokio::time::timeout(Duration::from_secs(2), worker.stop())
        .await
        .expect("stop should not wait for the full run");

    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_stop_is_idempotent_and_valid_from_idle() {
    let worker = Worker::new(
        Arc::new(Container::default()),
        vec![Arc::new(CountingJob { cadence: every(20) }) as Arc<dyn Job<Container>>],
    );

    worker.stop().await;
    assert_eq!(worker.state(), WorkerState::Stopped);
    worker.stop().await;
    assert_eq!(worker.state(), WorkerState::Stopped);
}
