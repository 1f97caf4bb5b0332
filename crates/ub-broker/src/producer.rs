use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::{encode, Payload};
use crate::vhost::VirtualHost;
use crate::Result;

/// Publishes to one destination queue on one virtual host
#[derive(Debug, Clone)]
pub struct Producer {
    vhost: Arc<VirtualHost>,
    destination: String,
}

impl Producer {
    pub fn new(vhost: Arc<VirtualHost>, destination: impl Into<String>) -> Self {
        Self {
            vhost,
            destination: destination.into(),
        }
    }

    pub fn vhost(&self) -> &str {
        self.vhost.name()
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Encode and publish. Failures are returned as-is; there is no retry.
    pub async fn publish(&self, payload: impl Into<Payload>) -> Result<()> {
        let body = encode(&payload.into());
        let size = body.len();

        match self.vhost.publish(&self.destination, body).await {
            Ok(()) => {
                metrics::counter!(
                    "ub_broker_published_total",
                    "vhost" => self.vhost.name().to_string(),
                    "destination" => self.destination.clone(),
                )
                .increment(1);
                debug!(
                    vhost = %self.vhost.name(),
                    destination = %self.destination,
                    bytes = size,
                    "Message published"
                );
                Ok(())
            }
            Err(e) => {
                metrics::counter!(
                    "ub_broker_publish_failures_total",
                    "vhost" => self.vhost.name().to_string(),
                    "destination" => self.destination.clone(),
                )
                .increment(1);
                warn!(
                    vhost = %self.vhost.name(),
                    destination = %self.destination,
                    error = %e,
                    "Publish failed"
                );
                Err(e)
            }
        }
    }
}
