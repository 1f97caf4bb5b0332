//! Broker driver abstraction
//!
//! A driver opens one isolated channel per virtual host. Everything above this
//! module (registry, producers, consumers) is driver agnostic.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::BrokerConfig;
use crate::Result;

/// Stream of deliveries for a single consumer subscription
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Opens per-vhost channels on a physical broker
#[async_trait]
pub trait BrokerDriver: Send + Sync {
    /// Short name for logs (`amqp`, `memory`)
    fn name(&self) -> &'static str;

    /// Connect to `vhost` and return its channel
    async fn open(&self, config: &BrokerConfig, vhost: &str) -> Result<Arc<dyn VHostChannel>>;
}

/// An open, isolated namespace on the broker
#[async_trait]
pub trait VHostChannel: Send + Sync {
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()>;

    /// Subscribe to `queue`; at most `prefetch` deliveries are unacknowledged
    async fn subscribe(&self, queue: &str, consumer_tag: &str, prefetch: u16) -> Result<DeliveryStream>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Settles a delivery with the broker
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message received from a queue
pub struct Delivery {
    pub body: Vec<u8>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            body,
            redelivered,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
