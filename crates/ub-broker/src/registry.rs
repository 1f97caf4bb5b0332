//! Name → virtual host lookup

use std::collections::HashMap;
use std::sync::Arc;

use crate::vhost::VirtualHost;
use crate::{BrokerError, Result};

#[derive(Debug, Default)]
pub struct VirtualHostRegistry {
    hosts: HashMap<String, Arc<VirtualHost>>,
}

impl VirtualHostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vhost; names are unique
    pub fn insert(&mut self, vhost: Arc<VirtualHost>) -> Result<()> {
        let name = vhost.name().to_string();
        if self.hosts.contains_key(&name) {
            return Err(BrokerError::topology(&name, "virtual host registered twice"));
        }
        self.hosts.insert(name, vhost);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<VirtualHost>> {
        self.hosts
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hosts.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hosts.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Arc<VirtualHost>> {
        self.hosts.clone()
    }

    /// Remove and return every vhost
    pub fn drain(&mut self) -> Vec<Arc<VirtualHost>> {
        self.hosts.drain().map(|(_, vhost)| vhost).collect()
    }
}
