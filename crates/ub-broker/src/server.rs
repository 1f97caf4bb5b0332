//! Broker server: topology, connection and consumer bindings in one place

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::connection::{ConnectionManager, Topology};
use crate::consumer::{run_binding, BindingContext, Consumer, ConsumerStats};
use crate::driver::BrokerDriver;
use crate::vhost::VirtualHost;
use crate::{BrokerError, Result};

pub const DEFAULT_PREFETCH: u16 = 10;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

struct Binding {
    stats: Arc<ConsumerStats>,
    task: JoinHandle<()>,
}

/// Composes the connection manager with registered consumers.
///
/// Built with `add_vhost` / `declare_queue` / `register_consumer`, then
/// `start()` connects and `start_all_consumers()` begins delivery.
pub struct BrokerServer<C: Send + Sync + 'static> {
    config: BrokerConfig,
    manager: ConnectionManager,
    topology: Topology,
    consumers: Vec<Arc<dyn Consumer<C>>>,
    prefetch: u16,
    shutdown_grace: Duration,
    bindings: Mutex<HashMap<String, Binding>>,
    // Serializes start_all_consumers against stop
    lifecycle: tokio::sync::Mutex<()>,
    shutdown_tx: broadcast::Sender<()>,
    stopped: AtomicBool,
}

impl<C: Send + Sync + 'static> BrokerServer<C> {
    pub fn new(driver: Arc<dyn BrokerDriver>, config: BrokerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            manager: ConnectionManager::new(driver),
            topology: Topology::new(),
            consumers: Vec::new(),
            prefetch: DEFAULT_PREFETCH,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            bindings: Mutex::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            shutdown_tx,
            stopped: AtomicBool::new(false),
        }
    }

    /// Unacked deliveries allowed per binding (also its handler concurrency)
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn add_vhost(&mut self, name: impl Into<String>) -> &mut Self {
        self.topology.add_vhost(name);
        self
    }

    pub fn declare_queue(&mut self, vhost: impl Into<String>, queue: impl Into<String>) -> &mut Self {
        self.topology.declare_queue(vhost, queue);
        self
    }

    /// Register a consumer; its source queue is declared on its vhost
    pub fn register_consumer(&mut self, consumer: Arc<dyn Consumer<C>>) -> &mut Self {
        self.topology.declare_queue(consumer.vhost(), consumer.source());
        self.consumers.push(consumer);
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn consumers_count(&self) -> usize {
        self.consumers.len()
    }

    /// Connect every virtual host and declare the topology
    pub async fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BrokerError::AlreadyStarted);
        }
        self.validate_consumers()?;
        self.manager.start(&self.config, &self.topology).await?;
        Ok(())
    }

    fn validate_consumers(&self) -> Result<()> {
        for (i, consumer) in self.consumers.iter().enumerate() {
            if !self.topology.has_vhost(consumer.vhost()) {
                return Err(BrokerError::topology(
                    consumer.vhost(),
                    format!("consumer '{}' is bound to an unknown virtual host", consumer.name()),
                ));
            }
            if self.consumers[..i].iter().any(|c| c.name() == consumer.name()) {
                return Err(BrokerError::topology(
                    consumer.vhost(),
                    format!("consumer '{}' registered twice", consumer.name()),
                ));
            }
        }
        Ok(())
    }

    pub fn vhost(&self, name: &str) -> Result<Arc<VirtualHost>> {
        self.manager.get_virtual_host(name)
    }

    pub fn is_started(&self) -> bool {
        self.manager.is_started()
    }

    /// Start every registered binding that is not running yet.
    ///
    /// Returns how many bindings were started by this call.
    pub async fn start_all_consumers(&self, container: Arc<C>) -> Result<usize> {
        let _guard = self.lifecycle.lock().await;
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let mut started = 0;
        for consumer in &self.consumers {
            if self.bindings.lock().contains_key(consumer.name()) {
                continue;
            }

            let vhost = self.manager.get_virtual_host(consumer.vhost())?;
            let stream = vhost
                .subscribe(consumer.source(), consumer.name(), self.prefetch)
                .await?;

            let stats = Arc::new(ConsumerStats::default());
            let ctx = BindingContext {
                consumer: consumer.clone(),
                container: container.clone(),
                stats: stats.clone(),
                prefetch: self.prefetch,
            };
            let task = tokio::spawn(run_binding(ctx, stream, self.shutdown_tx.subscribe()));

            self.bindings
                .lock()
                .insert(consumer.name().to_string(), Binding { stats, task });
            started += 1;
        }

        if started > 0 {
            info!(started, total = self.consumers.len(), "Consumers started");
        }
        Ok(started)
    }

    pub fn active_bindings(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn consumer_stats(&self, name: &str) -> Option<Arc<ConsumerStats>> {
        self.bindings.lock().get(name).map(|b| b.stats.clone())
    }

    /// Stop consuming, give in-flight handlers the grace period, then close
    /// every channel. Safe to call more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = self.lifecycle.lock().await;

        let _ = self.shutdown_tx.send(());

        let bindings: Vec<(String, Binding)> = self.bindings.lock().drain().collect();
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;

        for (name, mut binding) in bindings {
            if tokio::time::timeout_at(deadline, &mut binding.task).await.is_err() {
                warn!(consumer = %name, "In-flight handlers did not finish in time, aborting");
                binding.task.abort();
            }
        }

        self.manager.stop().await;
        info!("Broker server stopped");
    }
}
