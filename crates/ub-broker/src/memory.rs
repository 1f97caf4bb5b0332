//! In-process broker
//!
//! Mirrors the AMQP semantics the rest of the crate relies on: per-vhost
//! queues, prefetch, ack / nack with requeue, the redelivered flag, and
//! requeue of unsettled deliveries when they are dropped. Used for local
//! development and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::config::{BrokerConfig, Credentials};
use crate::driver::{Acknowledger, BrokerDriver, Delivery, DeliveryStream, VHostChannel};
use crate::{BrokerError, Result};

/// Counters for a single memory queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
    pub published: u64,
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct Inner {
    unreachable: AtomicBool,
    credentials: RwLock<Option<Credentials>>,
    refused_vhosts: DashSet<String>,
    refused_queues: DashSet<(String, String)>,
    rejected_publishes: DashSet<(String, String)>,
    vhosts: DashMap<String, Arc<MemoryVHost>>,
    open_channels: AtomicUsize,
}

/// Shared handle to an in-process broker. Clones see the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject connections whose credentials differ from these
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        *self.inner.credentials.write() = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Refuse every connection attempt
    pub fn unreachable(self) -> Self {
        self.set_reachable(false);
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Refuse connections to a virtual host (as if it did not exist)
    pub fn refuse_vhost(self, vhost: impl Into<String>) -> Self {
        self.inner.refused_vhosts.insert(vhost.into());
        self
    }

    /// Fail declarations of `queue` on `vhost`
    pub fn refuse_queue(self, vhost: impl Into<String>, queue: impl Into<String>) -> Self {
        self.inner.refused_queues.insert((vhost.into(), queue.into()));
        self
    }

    /// Nack every publish to `queue` on `vhost` until switched off again
    pub fn reject_publishes(&self, vhost: &str, queue: &str, reject: bool) {
        let key = (vhost.to_string(), queue.to_string());
        if reject {
            self.inner.rejected_publishes.insert(key);
        } else {
            self.inner.rejected_publishes.remove(&key);
        }
    }

    /// Channels opened and not yet closed
    pub fn open_channels(&self) -> usize {
        self.inner.open_channels.load(Ordering::SeqCst)
    }

    pub fn queue_stats(&self, vhost: &str, queue: &str) -> Option<QueueStats> {
        let vhost = self.inner.vhosts.get(vhost)?;
        let queue = vhost.queues.get(queue)?;
        Some(queue.stats())
    }

    /// Put raw bytes on a declared queue, bypassing producers
    pub fn inject(&self, vhost: &str, queue: &str, body: impl Into<Vec<u8>>) -> Result<()> {
        let host = self
            .inner
            .vhosts
            .get(vhost)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BrokerError::publish(vhost, queue, "unknown vhost"))?;
        let target = host
            .queue(queue)
            .ok_or_else(|| BrokerError::publish(vhost, queue, "no such queue"))?;
        target.push_back(body.into());
        Ok(())
    }

    fn vhost(&self, name: &str) -> Arc<MemoryVHost> {
        self.inner
            .vhosts
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryVHost::new(name)))
            .clone()
    }
}

#[async_trait]
impl BrokerDriver for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, config: &BrokerConfig, vhost: &str) -> Result<Arc<dyn VHostChannel>> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::connection(
                vhost,
                format!("{}:{} is unreachable", config.host, config.port),
            ));
        }

        if let Some(expected) = self.inner.credentials.read().as_ref() {
            if expected != &config.credentials {
                return Err(BrokerError::connection(vhost, "ACCESS_REFUSED: invalid credentials"));
            }
        }

        if self.inner.refused_vhosts.contains(vhost) {
            return Err(BrokerError::topology(vhost, "NOT_ALLOWED: vhost not available"));
        }

        self.inner.open_channels.fetch_add(1, Ordering::SeqCst);
        debug!(vhost = %vhost, "Memory channel opened");

        Ok(Arc::new(MemoryChannel {
            broker: self.clone(),
            vhost: self.vhost(vhost),
            open: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(Notify::new()),
        }))
    }
}

// ============================================================================
// Queues
// ============================================================================

struct MemoryVHost {
    name: String,
    queues: DashMap<String, Arc<MemoryQueue>>,
}

impl MemoryVHost {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queues: DashMap::new(),
        }
    }

    fn queue(&self, name: &str) -> Option<Arc<MemoryQueue>> {
        self.queues.get(name).map(|entry| entry.value().clone())
    }
}

struct Envelope {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct MemoryQueue {
    ready: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    unacked: AtomicUsize,
    published: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    discarded: AtomicU64,
}

impl MemoryQueue {
    fn push_back(&self, body: Vec<u8>) {
        self.published.fetch_add(1, Ordering::SeqCst);
        self.ready.lock().push_back(Envelope {
            body,
            redelivered: false,
        });
        self.notify.notify_one();
    }

    fn requeue(&self, body: Vec<u8>) {
        self.requeued.fetch_add(1, Ordering::SeqCst);
        self.ready.lock().push_front(Envelope {
            body,
            redelivered: true,
        });
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Envelope> {
        let envelope = self.ready.lock().pop_front()?;
        self.unacked.fetch_add(1, Ordering::SeqCst);
        Some(envelope)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            ready: self.ready.lock().len(),
            unacked: self.unacked.load(Ordering::SeqCst),
            published: self.published.load(Ordering::SeqCst),
            acked: self.acked.load(Ordering::SeqCst),
            requeued: self.requeued.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

struct MemoryChannel {
    broker: MemoryBroker,
    vhost: Arc<MemoryVHost>,
    open: Arc<AtomicBool>,
    closed: Arc<Notify>,
}

impl MemoryChannel {
    fn ensure_open(&self, queue: &str) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::publish(&self.vhost.name, queue, "channel is closed"))
        }
    }
}

#[async_trait]
impl VHostChannel for MemoryChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BrokerError::topology(&self.vhost.name, "channel is closed"));
        }
        let key = (self.vhost.name.clone(), queue.to_string());
        if self.broker.inner.refused_queues.contains(&key) {
            return Err(BrokerError::topology(
                &self.vhost.name,
                format!("PRECONDITION_FAILED: cannot declare queue '{}'", queue),
            ));
        }
        self.vhost.queues.entry(queue.to_string()).or_default();
        trace!(vhost = %self.vhost.name, queue = %queue, "Queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        self.ensure_open(queue)?;
        let key = (self.vhost.name.clone(), queue.to_string());
        if self.broker.inner.rejected_publishes.contains(&key) {
            return Err(BrokerError::publish(&self.vhost.name, queue, "publish nacked by broker"));
        }
        let target = self
            .vhost
            .queue(queue)
            .ok_or_else(|| BrokerError::publish(&self.vhost.name, queue, "NOT_FOUND: no queue"))?;
        target.push_back(body);
        Ok(())
    }

    async fn subscribe(&self, queue: &str, _consumer_tag: &str, prefetch: u16) -> Result<DeliveryStream> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BrokerError::topology(&self.vhost.name, "channel is closed"));
        }
        let target = self.vhost.queue(queue).ok_or_else(|| {
            BrokerError::topology(&self.vhost.name, format!("NOT_FOUND: no queue '{}'", queue))
        })?;

        let subscription = Subscription {
            queue: target,
            open: self.open.clone(),
            closed: self.closed.clone(),
            prefetch: Arc::new(Semaphore::new(prefetch.max(1) as usize)),
        };

        let stream = futures::stream::unfold(subscription, |subscription| async move {
            let delivery = subscription.next_delivery().await?;
            Some((Ok(delivery), subscription))
        });

        Ok(stream.boxed())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closed.notify_waiters();
            self.broker.inner.open_channels.fetch_sub(1, Ordering::SeqCst);
            debug!(vhost = %self.vhost.name, "Memory channel closed");
        }
        Ok(())
    }
}

struct Subscription {
    queue: Arc<MemoryQueue>,
    open: Arc<AtomicBool>,
    closed: Arc<Notify>,
    prefetch: Arc<Semaphore>,
}

impl Subscription {
    async fn wait_closed(&self) {
        loop {
            let notified = self.closed.notified();
            if !self.open.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    async fn next_delivery(&self) -> Option<Delivery> {
        let permit = tokio::select! {
            permit = self.prefetch.clone().acquire_owned() => permit.ok()?,
            _ = self.wait_closed() => return None,
        };

        loop {
            let closed = self.closed.notified();
            if !self.open.load(Ordering::SeqCst) {
                return None;
            }

            let ready = self.queue.notify.notified();
            if let Some(envelope) = self.queue.pop() {
                let acker = MemoryAcker {
                    queue: self.queue.clone(),
                    body: envelope.body.clone(),
                    settled: AtomicBool::new(false),
                    _permit: permit,
                };
                return Some(Delivery::new(envelope.body, envelope.redelivered, Box::new(acker)));
            }

            tokio::select! {
                _ = ready => {}
                _ = closed => {}
            }
        }
    }
}

struct MemoryAcker {
    queue: Arc<MemoryQueue>,
    body: Vec<u8>,
    settled: AtomicBool,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        if !self.settled.swap(true, Ordering::SeqCst) {
            self.queue.unacked.fetch_sub(1, Ordering::SeqCst);
            self.queue.acked.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        if !self.settled.swap(true, Ordering::SeqCst) {
            self.queue.unacked.fetch_sub(1, Ordering::SeqCst);
            if requeue {
                self.queue.requeue(self.body.clone());
            } else {
                self.queue.discarded.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        // Unsettled deliveries go back to the queue, as on an AMQP channel close
        if !self.settled.swap(true, Ordering::SeqCst) {
            self.queue.unacked.fetch_sub(1, Ordering::SeqCst);
            self.queue.requeue(std::mem::take(&mut self.body));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn open(broker: &MemoryBroker, vhost: &str) -> Arc<dyn VHostChannel> {
        broker.open(&BrokerConfig::default(), vhost).await.unwrap()
    }

    #[tokio::test]
    async fn test_publish_and_consume() {
        let broker = MemoryBroker::new();
        let channel = open(&broker, "home").await;
        channel.declare_queue("q").await.unwrap();
        channel.publish("q", b"one".to_vec()).await.unwrap();

        let mut stream = channel.subscribe("q", "t", 10).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"one");
        assert!(!delivery.redelivered);

        delivery.ack().await.unwrap();
        let stats = broker.queue_stats("home", "q").unwrap();
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.unacked, 0);
        assert_eq!(stats.ready, 0);
    }

    #[tokio::test]
    async fn test_nack_requeues_with_redelivered_flag() {
        let broker = MemoryBroker::new();
        let channel = open(&broker, "work").await;
        channel.declare_queue("q").await.unwrap();
        channel.publish("q", b"x".to_vec()).await.unwrap();

        let mut stream = channel.subscribe("q", "t", 1).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        first.nack(true).await.unwrap();
        drop(first);

        let second = stream.next().await.unwrap().unwrap();
        assert!(second.redelivered);
        assert_eq!(second.body, b"x");
        second.ack().await.unwrap();

        let stats = broker.queue_stats("work", "q").unwrap();
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_requeued() {
        let broker = MemoryBroker::new();
        let channel = open(&broker, "home").await;
        channel.declare_queue("q").await.unwrap();
        channel.publish("q", b"x".to_vec()).await.unwrap();

        let mut stream = channel.subscribe("q", "t", 1).await.unwrap();
        drop(stream.next().await.unwrap().unwrap());

        let stats = broker.queue_stats("home", "q").unwrap();
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.unacked, 0);
    }

    #[tokio::test]
    async fn test_vhosts_are_isolated() {
        let broker = MemoryBroker::new();
        let home = open(&broker, "home").await;
        let work = open(&broker, "work").await;
        home.declare_queue("shared-name").await.unwrap();

        let err = work.publish("shared-name", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_rejected_publishes_can_be_switched_off() {
        let broker = MemoryBroker::new();
        let channel = open(&broker, "home").await;
        channel.declare_queue("q").await.unwrap();

        broker.reject_publishes("home", "q", true);
        let err = channel.publish("q", b"one".to_vec()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Publish { .. }));

        broker.reject_publishes("home", "q", false);
        channel.publish("q", b"two".to_vec()).await.unwrap();
        assert_eq!(broker.queue_stats("home", "q").unwrap().ready, 1);
    }

    #[tokio::test]
    async fn test_close_ends_subscription() {
        let broker = MemoryBroker::new();
        let channel = open(&broker, "home").await;
        channel.declare_queue("q").await.unwrap();
        let mut stream = channel.subscribe("q", "t", 1).await.unwrap();

        let waiter = tokio::spawn(async move { stream.next().await.is_none() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close().await.unwrap();

        assert!(tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_connection_failures() {
        let unreachable = MemoryBroker::new().unreachable();
        let err = unreachable.open(&BrokerConfig::default(), "home").await.err().unwrap();
        assert!(matches!(err, BrokerError::Connection { .. }));

        let locked = MemoryBroker::new().with_credentials("svc", "right");
        let err = locked.open(&BrokerConfig::default(), "home").await.err().unwrap();
        assert!(matches!(err, BrokerError::Connection { .. }));

        let refused = MemoryBroker::new().refuse_vhost("work");
        let err = refused.open(&BrokerConfig::default(), "work").await.err().unwrap();
        assert!(matches!(err, BrokerError::Topology { .. }));
    }
}
