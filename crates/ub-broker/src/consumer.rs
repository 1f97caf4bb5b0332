//! Consumers and the per-binding delivery loop
//!
//! Handler outcome → settlement:
//! - `Ok(())` → ack
//! - `HandlerError::Recoverable` → nack with requeue
//! - `HandlerError::Unrecoverable` or a panic → logged, then ack so the
//!   message is not redelivered forever

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::driver::{Delivery, DeliveryStream};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Transient failure; the message is requeued
    #[error("Recoverable: {0}")]
    Recoverable(String),

    /// The message can never be processed; it is acked and dropped
    #[error("Unrecoverable: {0}")]
    Unrecoverable(String),
}

impl HandlerError {
    pub fn recoverable(message: impl ToString) -> Self {
        Self::Recoverable(message.to_string())
    }

    pub fn unrecoverable(message: impl ToString) -> Self {
        Self::Unrecoverable(message.to_string())
    }
}

/// Decode a JSON body; malformed input is unrecoverable
pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, HandlerError> {
    serde_json::from_slice(body)
        .map_err(|e| HandlerError::unrecoverable(format!("malformed payload: {}", e)))
}

/// Message handler bound to a source queue on a virtual host.
///
/// `C` is the application container shared by every handler.
#[async_trait]
pub trait Consumer<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    fn name(&self) -> &str;

    fn vhost(&self) -> &str;

    fn source(&self) -> &str;

    async fn handle(&self, body: &[u8], container: &C) -> Result<(), HandlerError>;
}

/// Delivery counters for one binding
#[derive(Debug, Default)]
pub struct ConsumerStats {
    acked: AtomicU64,
    requeued: AtomicU64,
    rejected: AtomicU64,
}

impl ConsumerStats {
    /// Handled successfully
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    /// Recoverable failures sent back to the queue
    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    /// Unrecoverable failures, acked and dropped
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.acked() + self.requeued() + self.rejected()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Acked,
    Requeued,
    Rejected,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Acked => "acked",
            Outcome::Requeued => "requeued",
            Outcome::Rejected => "rejected",
        }
    }
}

/// Run one handler invocation and settle the delivery
async fn process<C>(
    consumer: &dyn Consumer<C>,
    delivery: Delivery,
    container: &C,
    stats: &ConsumerStats,
) where
    C: Send + Sync + 'static,
{
    let result = AssertUnwindSafe(consumer.handle(&delivery.body, container))
        .catch_unwind()
        .await;

    let outcome = match result {
        Ok(Ok(())) => {
            if let Err(e) = delivery.ack().await {
                warn!(consumer = %consumer.name(), error = %e, "Failed to ack delivery");
            }
            Outcome::Acked
        }
        Ok(Err(HandlerError::Recoverable(reason))) => {
            warn!(
                consumer = %consumer.name(),
                redelivered = delivery.redelivered,
                reason = %reason,
                "Recoverable handler failure, requeueing"
            );
            if let Err(e) = delivery.nack(true).await {
                warn!(consumer = %consumer.name(), error = %e, "Failed to nack delivery");
            }
            Outcome::Requeued
        }
        Ok(Err(HandlerError::Unrecoverable(reason))) => {
            error!(
                consumer = %consumer.name(),
                vhost = %consumer.vhost(),
                source = %consumer.source(),
                bytes = delivery.body.len(),
                reason = %reason,
                "Unrecoverable handler failure, dropping message"
            );
            if let Err(e) = delivery.ack().await {
                warn!(consumer = %consumer.name(), error = %e, "Failed to ack delivery");
            }
            Outcome::Rejected
        }
        Err(_) => {
            error!(
                consumer = %consumer.name(),
                vhost = %consumer.vhost(),
                source = %consumer.source(),
                "Handler panicked, dropping message"
            );
            if let Err(e) = delivery.ack().await {
                warn!(consumer = %consumer.name(), error = %e, "Failed to ack delivery");
            }
            Outcome::Rejected
        }
    };

    let counter = match outcome {
        Outcome::Acked => &stats.acked,
        Outcome::Requeued => &stats.requeued,
        Outcome::Rejected => &stats.rejected,
    };
    counter.fetch_add(1, Ordering::Relaxed);

    metrics::counter!(
        "ub_consumer_deliveries_total",
        "consumer" => consumer.name().to_string(),
        "outcome" => outcome.as_str(),
    )
    .increment(1);
}

/// Everything a binding task needs
pub(crate) struct BindingContext<C: Send + Sync + 'static> {
    pub consumer: Arc<dyn Consumer<C>>,
    pub container: Arc<C>,
    pub stats: Arc<ConsumerStats>,
    pub prefetch: u16,
}

/// Pull deliveries until shutdown or the stream ends, running up to
/// `prefetch` handlers at once. In-flight handlers are awaited before
/// returning.
pub(crate) async fn run_binding<C>(
    ctx: BindingContext<C>,
    mut stream: DeliveryStream,
    mut shutdown: broadcast::Receiver<()>,
) where
    C: Send + Sync + 'static,
{
    let name = ctx.consumer.name().to_string();
    let semaphore = Arc::new(Semaphore::new(ctx.prefetch.max(1) as usize));
    let mut in_flight: JoinSet<()> = JoinSet::new();

    info!(
        consumer = %name,
        vhost = %ctx.consumer.vhost(),
        source = %ctx.consumer.source(),
        prefetch = ctx.prefetch,
        "Consumer binding started"
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(consumer = %name, "Shutdown signal received");
                break;
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            next = stream.next() => match next {
                Some(Ok(delivery)) => {
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let consumer = ctx.consumer.clone();
                    let container = ctx.container.clone();
                    let stats = ctx.stats.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        process(consumer.as_ref(), delivery, container.as_ref(), &stats).await;
                    });
                }
                Some(Err(e)) => {
                    error!(consumer = %name, error = %e, "Delivery stream failed");
                    break;
                }
                None => {
                    info!(consumer = %name, "Delivery stream ended");
                    break;
                }
            }
        }
    }

    // Stop receiving before waiting, so nothing new is prefetched
    drop(stream);

    let pending = in_flight.len();
    if pending > 0 {
        debug!(consumer = %name, pending, "Waiting for in-flight handlers");
    }
    while in_flight.join_next().await.is_some() {}

    info!(
        consumer = %name,
        acked = ctx.stats.acked(),
        requeued = ctx.stats.requeued(),
        rejected = ctx.stats.rejected(),
        "Consumer binding stopped"
    );
}
