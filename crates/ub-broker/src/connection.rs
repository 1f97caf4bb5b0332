//! Broker connection lifecycle
//!
//! The manager opens one channel per virtual host through a [`BrokerDriver`],
//! declares the queues of the topology, and keeps the resulting handles in a
//! [`VirtualHostRegistry`]. Startup is all-or-nothing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::BrokerConfig;
use crate::driver::{BrokerDriver, VHostChannel};
use crate::registry::VirtualHostRegistry;
use crate::vhost::VirtualHost;
use crate::{BrokerError, Result};

/// Virtual hosts and the queues declared on each
#[derive(Debug, Clone, Default)]
pub struct Topology {
    vhosts: Vec<String>,
    queues: Vec<(String, String)>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vhost(&mut self, name: impl Into<String>) -> &mut Self {
        self.vhosts.push(name.into());
        self
    }

    pub fn declare_queue(&mut self, vhost: impl Into<String>, queue: impl Into<String>) -> &mut Self {
        let entry = (vhost.into(), queue.into());
        if !self.queues.contains(&entry) {
            self.queues.push(entry);
        }
        self
    }

    pub fn vhosts(&self) -> &[String] {
        &self.vhosts
    }

    pub fn has_vhost(&self, name: &str) -> bool {
        self.vhosts.iter().any(|v| v == name)
    }

    pub fn queues_for<'a>(&'a self, vhost: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.queues
            .iter()
            .filter(move |(v, _)| v == vhost)
            .map(|(_, q)| q.as_str())
    }

    /// Names must be non-empty and unique; every queue needs a known vhost
    pub fn validate(&self) -> Result<()> {
        for (i, name) in self.vhosts.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(BrokerError::topology(name, "virtual host name is empty"));
            }
            if self.vhosts[..i].contains(name) {
                return Err(BrokerError::topology(name, "virtual host declared twice"));
            }
        }
        for (vhost, queue) in &self.queues {
            if !self.has_vhost(vhost) {
                return Err(BrokerError::topology(
                    vhost,
                    format!("queue '{}' references an unknown virtual host", queue),
                ));
            }
            if queue.trim().is_empty() {
                return Err(BrokerError::topology(vhost, "queue name is empty"));
            }
        }
        Ok(())
    }
}

enum State {
    Idle,
    Started(VirtualHostRegistry),
    Stopped,
}

pub struct ConnectionManager {
    driver: Arc<dyn BrokerDriver>,
    state: RwLock<State>,
    // Serializes start/stop; never held by readers
    lifecycle: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn BrokerDriver>) -> Self {
        Self {
            driver,
            state: RwLock::new(State::Idle),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Open every vhost of `topology` and declare its queues.
    ///
    /// On failure every channel opened so far is closed and nothing is
    /// registered; a later `start` may be attempted again.
    pub async fn start(
        &self,
        config: &BrokerConfig,
        topology: &Topology,
    ) -> Result<HashMap<String, Arc<VirtualHost>>> {
        let _guard = self.lifecycle.lock().await;
        if !matches!(*self.state.read(), State::Idle) {
            return Err(BrokerError::AlreadyStarted);
        }

        topology.validate()?;

        let mut opened: Vec<(String, Arc<dyn VHostChannel>)> = Vec::with_capacity(topology.vhosts().len());
        let mut registry = VirtualHostRegistry::new();

        for name in topology.vhosts() {
            match self.open_vhost(config, topology, name, &mut opened).await {
                Ok(vhost) => registry.insert(vhost)?,
                Err(e) => {
                    error!(
                        vhost = %name,
                        driver = self.driver.name(),
                        error = %e,
                        "Broker startup failed, closing opened channels"
                    );
                    close_all(&opened).await;
                    return Err(e);
                }
            }
        }

        let hosts = registry.snapshot();
        info!(
            driver = self.driver.name(),
            host = %config.host,
            port = config.port,
            vhosts = ?registry.names(),
            "Broker connection started"
        );
        *self.state.write() = State::Started(registry);
        Ok(hosts)
    }

    async fn open_vhost(
        &self,
        config: &BrokerConfig,
        topology: &Topology,
        name: &str,
        opened: &mut Vec<(String, Arc<dyn VHostChannel>)>,
    ) -> Result<Arc<VirtualHost>> {
        let channel = self.driver.open(config, name).await?;
        opened.push((name.to_string(), channel.clone()));

        let mut declared = Vec::new();
        for queue in topology.queues_for(name) {
            channel.declare_queue(queue).await?;
            declared.push(queue.to_string());
        }

        info!(vhost = %name, queues = declared.len(), "Virtual host ready");
        Ok(Arc::new(VirtualHost::new(name, channel, declared)))
    }

    pub fn get_virtual_host(&self, name: &str) -> Result<Arc<VirtualHost>> {
        match &*self.state.read() {
            State::Started(registry) => registry.get(name),
            _ => Err(BrokerError::not_found(name)),
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(*self.state.read(), State::Started(_))
    }

    pub fn vhost_names(&self) -> Vec<String> {
        match &*self.state.read() {
            State::Started(registry) => registry.names(),
            _ => Vec::new(),
        }
    }

    /// Close every channel. Safe to call more than once.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *self.state.write(), State::Stopped);
        let State::Started(mut registry) = previous else {
            return;
        };

        for vhost in registry.drain() {
            if let Err(e) = vhost.close().await {
                warn!(vhost = %vhost.name(), error = %e, "Failed to close virtual host channel");
            }
        }
        info!(driver = self.driver.name(), "Broker connection stopped");
    }
}

async fn close_all(opened: &[(String, Arc<dyn VHostChannel>)]) {
    for (name, channel) in opened {
        if let Err(e) = channel.close().await {
            warn!(vhost = %name, error = %e, "Failed to close channel during rollback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;

    fn topology() -> Topology {
        let mut topology = Topology::new();
        topology
            .add_vhost("home")
            .add_vhost("work")
            .declare_queue("home", "user.created")
            .declare_queue("work", "user.fetch-requested");
        topology
    }

    #[tokio::test]
    async fn test_start_registers_every_vhost() {
        let broker = MemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()));

        let hosts = manager.start(&BrokerConfig::default(), &topology()).await.unwrap();
        assert_eq!(hosts.len(), 2);

        let home = manager.get_virtual_host("home").unwrap();
        assert!(home.has_destination("user.created"));
        assert!(!home.has_destination("user.fetch-requested"));
        assert!(manager.get_virtual_host("work").unwrap().is_open());
        assert_eq!(broker.open_channels(), 2);
    }

    #[tokio::test]
    async fn test_refused_vhost_rolls_back() {
        let broker = MemoryBroker::new().refuse_vhost("work");
        let manager = ConnectionManager::new(Arc::new(broker.clone()));

        let err = manager.start(&BrokerConfig::default(), &topology()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Topology { ref vhost, .. } if vhost == "work"));
        assert_eq!(broker.open_channels(), 0);
        assert!(matches!(manager.get_virtual_host("home"), Err(BrokerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_refused_queue_rolls_back() {
        let broker = MemoryBroker::new().refuse_queue("work", "user.fetch-requested");
        let manager = ConnectionManager::new(Arc::new(broker.clone()));

        let err = manager.start(&BrokerConfig::default(), &topology()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Topology { .. }));
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let manager = ConnectionManager::new(Arc::new(MemoryBroker::new()));
        manager.start(&BrokerConfig::default(), &topology()).await.unwrap();
        let err = manager.start(&BrokerConfig::default(), &topology()).await.unwrap_err();
        assert_eq!(err, BrokerError::AlreadyStarted);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let broker = MemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()));
        manager.start(&BrokerConfig::default(), &topology()).await.unwrap();

        manager.stop().await;
        manager.stop().await;

        assert_eq!(broker.open_channels(), 0);
        assert!(!manager.is_started());
        assert!(manager.get_virtual_host("home").is_err());
    }

    #[test]
    fn test_topology_validation() {
        let mut duplicate = Topology::new();
        duplicate.add_vhost("home").add_vhost("home");
        assert!(duplicate.validate().is_err());

        let mut empty = Topology::new();
        empty.add_vhost("");
        assert!(empty.validate().is_err());

        let mut orphan = Topology::new();
        orphan.add_vhost("home").declare_queue("work", "jobs");
        assert!(orphan.validate().is_err());

        assert!(topology().validate().is_ok());
    }
}
