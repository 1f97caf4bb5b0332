//! RabbitMQ driver (AMQP 0.9.1 via lapin)
//!
//! AMQP binds a virtual host when the connection is opened, so every vhost
//! gets its own connection. Publishing shares one channel per vhost; each
//! subscription gets a dedicated channel with its own QoS.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::driver::{Acknowledger, BrokerDriver, Delivery, DeliveryStream, VHostChannel};
use crate::{BrokerError, Result};

const REPLY_SUCCESS: u16 = 200;
const PERSISTENT: u8 = 2;

/// Driver for a real RabbitMQ broker
#[derive(Debug, Clone, Default)]
pub struct AmqpDriver {
    connection_name: Option<String>,
}

impl AmqpDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name shown in the RabbitMQ management UI
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }
}

/// The server closes the connection with NOT_ALLOWED when the vhost is
/// missing or the user has no access to it.
fn classify_open_error(vhost: &str, text: String) -> BrokerError {
    if text.contains("NOT_ALLOWED") || text.contains("not allowed") {
        BrokerError::topology(vhost, text)
    } else {
        BrokerError::connection(vhost, text)
    }
}

#[async_trait]
impl BrokerDriver for AmqpDriver {
    fn name(&self) -> &'static str {
        "amqp"
    }

    async fn open(&self, config: &BrokerConfig, vhost: &str) -> Result<Arc<dyn VHostChannel>> {
        let mut properties = ConnectionProperties::default();
        if let Some(name) = &self.connection_name {
            properties = properties.with_connection_name(format!("{}:{}", name, vhost).into());
        }

        debug!(url = %config.redacted_url_for(vhost), "Opening AMQP connection");
        let connection = Connection::connect(&config.url_for(vhost), properties)
            .await
            .map_err(|e| classify_open_error(vhost, e.to_string()))?;

        let publish_channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
                return Err(BrokerError::connection(vhost, e));
            }
        };

        // Confirms make publish() report broker-side rejections
        if let Err(e) = publish_channel
            .confirm_select(lapin::options::ConfirmSelectOptions::default())
            .await
        {
            let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
            return Err(BrokerError::connection(vhost, e));
        }

        info!(vhost = %vhost, host = %config.host, port = config.port, "AMQP connection established");

        Ok(Arc::new(AmqpChannel {
            vhost: vhost.to_string(),
            connection,
            publish_channel,
            consumer_channels: parking_lot::Mutex::new(Vec::new()),
        }))
    }
}

struct AmqpChannel {
    vhost: String,
    connection: Connection,
    publish_channel: Channel,
    consumer_channels: parking_lot::Mutex<Vec<Channel>>,
}

#[async_trait]
impl VHostChannel for AmqpChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.publish_channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::topology(&self.vhost, format!("queue '{}': {}", queue, e)))?;
        debug!(vhost = %self.vhost, queue = %queue, "Queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        let confirm = self
            .publish_channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await
            .map_err(|e| BrokerError::publish(&self.vhost, queue, e))?;

        let confirmation = confirm
            .await
            .map_err(|e| BrokerError::publish(&self.vhost, queue, e))?;

        if confirmation.is_nack() {
            return Err(BrokerError::publish(&self.vhost, queue, "broker rejected the message"));
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str, consumer_tag: &str, prefetch: u16) -> Result<DeliveryStream> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::connection(&self.vhost, e))?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::connection(&self.vhost, e))?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::topology(&self.vhost, format!("consume '{}': {}", queue, e)))?;

        self.consumer_channels.lock().push(channel);

        let vhost = self.vhost.clone();
        let stream = consumer.map(move |result| match result {
            Ok(delivery) => Ok(Delivery::new(
                delivery.data,
                delivery.redelivered,
                Box::new(AmqpAcker {
                    vhost: vhost.clone(),
                    acker: delivery.acker,
                }),
            )),
            Err(e) => Err(BrokerError::connection(&vhost, e)),
        });

        Ok(stream.boxed())
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.publish_channel.status().connected()
    }

    async fn close(&self) -> Result<()> {
        let channels: Vec<Channel> = std::mem::take(&mut *self.consumer_channels.lock());
        for channel in channels {
            if channel.status().connected() {
                if let Err(e) = channel.close(REPLY_SUCCESS, "shutdown").await {
                    warn!(vhost = %self.vhost, error = %e, "Failed to close consumer channel");
                }
            }
        }

        if self.publish_channel.status().connected() {
            if let Err(e) = self.publish_channel.close(REPLY_SUCCESS, "shutdown").await {
                warn!(vhost = %self.vhost, error = %e, "Failed to close publish channel");
            }
        }

        if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "shutdown")
                .await
                .map_err(|e| BrokerError::connection(&self.vhost, e))?;
        }

        info!(vhost = %self.vhost, "AMQP connection closed");
        Ok(())
    }
}

struct AmqpAcker {
    vhost: String,
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::connection(&self.vhost, e))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(|e| BrokerError::connection(&self.vhost, e))
    }
}
