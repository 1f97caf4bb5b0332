use std::collections::BTreeSet;
use std::sync::Arc;

use crate::driver::{DeliveryStream, VHostChannel};
use crate::{BrokerError, Result};

/// A named, isolated namespace on the broker with its declared queues.
///
/// Handles are created by the connection manager and shared with producers,
/// consumers and the application container.
pub struct VirtualHost {
    name: String,
    channel: Arc<dyn VHostChannel>,
    queues: BTreeSet<String>,
}

impl VirtualHost {
    pub(crate) fn new(
        name: impl Into<String>,
        channel: Arc<dyn VHostChannel>,
        queues: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            queues: queues.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `queue` was declared on this vhost at startup
    pub fn has_destination(&self, queue: &str) -> bool {
        self.queues.contains(queue)
    }

    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(String::as_str)
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Put raw bytes on a declared queue
    pub async fn publish(&self, destination: &str, body: Vec<u8>) -> Result<()> {
        if !self.has_destination(destination) {
            return Err(BrokerError::publish(
                &self.name,
                destination,
                "destination is not declared on this virtual host",
            ));
        }
        if !self.channel.is_open() {
            return Err(BrokerError::publish(&self.name, destination, "channel is closed"));
        }
        self.channel.publish(destination, body).await
    }

    pub(crate) async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<DeliveryStream> {
        self.channel.subscribe(queue, consumer_tag, prefetch).await
    }

    pub(crate) async fn close(&self) -> Result<()> {
        self.channel.close().await
    }
}

impl std::fmt::Debug for VirtualHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualHost")
            .field("name", &self.name)
            .field("queues", &self.queues)
            .field("open", &self.channel.is_open())
            .finish()
    }
}
